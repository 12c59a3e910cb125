//! In-memory collaborators for handler and service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_types::{Coord, LineString};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::repo::TripRepository;
use crate::error::{TripError, TripResult};
use crate::integrations::routes::{ComputedRoute, RouteProvider};
use crate::kafka::LocationPublisher;
use crate::models::message::BusEvent;
use crate::models::history::TripLocationHistory;
use crate::models::settings::TripSettingsConfig;
use crate::models::subscription::ClientSubscribedTrip;
use crate::models::trip::{NewTrip, Trip, TripStatus};

pub fn encode_route(points: &[(f64, f64)]) -> String {
    let line = LineString::from(
        points
            .iter()
            .map(|&(lon, lat)| Coord { x: lon, y: lat })
            .collect::<Vec<_>>(),
    );
    polyline::encode_coordinates(line, 5).unwrap()
}

#[derive(Default)]
struct MemoryState {
    trips: HashMap<String, Trip>,
    history: Vec<TripLocationHistory>,
    subscriptions: HashMap<String, Vec<String>>,
    settings: Option<TripSettingsConfig>,
}

/// `TripRepository` over plain maps, with an injectable failure for the
/// location-write path so atomicity can be exercised end to end.
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    fail_location_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            fail_location_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent `record_location` fail as a whole, committing
    /// nothing, the way an aborted transaction would.
    pub fn fail_location_writes(&self, fail: bool) {
        self.fail_location_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn insert_trip(&self, trip: Trip) {
        let mut state = self.state.lock().await;
        state.trips.insert(trip.trip_id.to_string(), trip);
    }

    pub async fn trip_count(&self) -> usize {
        self.state.lock().await.trips.len()
    }

    pub async fn history_count(&self, trip_id: &str) -> usize {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|h| h.trip_id.to_string() == trip_id)
            .count()
    }

    pub async fn subscribed_set(&self, session_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .subscriptions
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

pub fn sample_trip(points: &[(f64, f64)]) -> Trip {
    let now = Utc::now();
    Trip {
        trip_id: Uuid::new_v4(),
        starting_lon: points[0].0,
        starting_lat: points[0].1,
        destination_lon: points[points.len() - 1].0,
        destination_lat: points[points.len() - 1].1,
        current_lon: None,
        current_lat: None,
        route_polyline: Some(encode_route(points)),
        available_seats: 3,
        is_ride_requests_allowed: true,
        trip_status: TripStatus::Ongoing.as_str().to_string(),
        distance_meters: 0.0,
        duration: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl TripRepository for MemoryRepository {
    async fn get_trip(&self, trip_id: &str) -> TripResult<Option<Trip>> {
        Ok(self.state.lock().await.trips.get(trip_id).cloned())
    }

    async fn create_trip(&self, new_trip: NewTrip) -> TripResult<Trip> {
        let now = Utc::now();
        let trip = Trip {
            trip_id: Uuid::new_v4(),
            starting_lon: new_trip.starting_lon,
            starting_lat: new_trip.starting_lat,
            destination_lon: new_trip.destination_lon,
            destination_lat: new_trip.destination_lat,
            current_lon: None,
            current_lat: None,
            route_polyline: Some(new_trip.route_polyline),
            available_seats: new_trip.available_seats,
            is_ride_requests_allowed: new_trip.is_ride_requests_allowed,
            trip_status: TripStatus::Initiated.as_str().to_string(),
            distance_meters: new_trip.distance_meters,
            duration: new_trip.duration,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .trips
            .insert(trip.trip_id.to_string(), trip.clone());
        Ok(trip)
    }

    async fn record_location(
        &self,
        trip_id: &str,
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
    ) -> TripResult<()> {
        if self.fail_location_writes.load(Ordering::SeqCst) {
            return Err(TripError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.state.lock().await;
        let Some(trip) = state.trips.get(trip_id).map(|t| t.trip_id) else {
            return Err(TripError::NotFound(trip_id.to_string()));
        };
        state.history.push(TripLocationHistory {
            trip_id: trip,
            lat,
            lon,
            timestamp,
        });
        let trip = state.trips.get_mut(trip_id).unwrap();
        trip.current_lat = Some(lat);
        trip.current_lon = Some(lon);
        trip.updated_at = Utc::now();
        Ok(())
    }

    async fn query_candidate_trips(
        &self,
        status_in: &[TripStatus],
        created_since: DateTime<Utc>,
    ) -> TripResult<Vec<Trip>> {
        let statuses: Vec<&str> = status_in.iter().map(|s| s.as_str()).collect();
        Ok(self
            .state
            .lock()
            .await
            .trips
            .values()
            .filter(|t| statuses.contains(&t.trip_status.as_str()))
            .filter(|t| t.created_at >= created_since)
            .filter(|t| t.route_polyline.is_some())
            .cloned()
            .collect())
    }

    async fn location_history(
        &self,
        trip_id: &str,
        limit: i64,
    ) -> TripResult<Vec<TripLocationHistory>> {
        let mut rows: Vec<TripLocationHistory> = self
            .state
            .lock()
            .await
            .history
            .iter()
            .filter(|h| h.trip_id.to_string() == trip_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn get_active_settings(&self) -> TripResult<Option<TripSettingsConfig>> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn seed_settings(&self) -> TripResult<(TripSettingsConfig, bool)> {
        let mut state = self.state.lock().await;
        if let Some(settings) = &state.settings {
            return Ok((settings.clone(), false));
        }
        let defaults = TripSettingsConfig::default();
        state.settings = Some(defaults.clone());
        Ok((defaults, true))
    }

    async fn get_or_create_subscription(
        &self,
        session_id: &str,
    ) -> TripResult<ClientSubscribedTrip> {
        let mut state = self.state.lock().await;
        let subscribed = state
            .subscriptions
            .entry(session_id.to_string())
            .or_default()
            .clone();
        Ok(ClientSubscribedTrip {
            session_id: session_id.to_string(),
            subscribed_to: subscribed,
        })
    }

    async fn add_subscription(&self, session_id: &str, trip_id: &str) -> TripResult<bool> {
        let mut state = self.state.lock().await;
        let set = state.subscriptions.entry(session_id.to_string()).or_default();
        if set.iter().any(|id| id == trip_id) {
            return Ok(false);
        }
        set.push(trip_id.to_string());
        Ok(true)
    }

    async fn remove_subscription(&self, session_id: &str, trip_id: &str) -> TripResult<bool> {
        let mut state = self.state.lock().await;
        let set = state.subscriptions.entry(session_id.to_string()).or_default();
        let before = set.len();
        set.retain(|id| id != trip_id);
        Ok(set.len() != before)
    }
}

/// Route provider returning a canned polyline.
pub struct FixedRouteProvider {
    encoded: String,
}

impl FixedRouteProvider {
    pub fn new(encoded: String) -> Self {
        Self { encoded }
    }
}

#[async_trait]
impl RouteProvider for FixedRouteProvider {
    async fn compute_route(
        &self,
        _origin_lat: f64,
        _origin_lon: f64,
        _destination_lat: f64,
        _destination_lon: f64,
    ) -> TripResult<ComputedRoute> {
        Ok(ComputedRoute {
            encoded_polyline: self.encoded.clone(),
            distance_meters: 12_000.0,
            duration: Some("1200s".to_string()),
        })
    }
}

/// Captures bus events instead of publishing them.
pub struct RecordingPublisher {
    events: Mutex<Vec<BusEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn events(&self) -> Vec<BusEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl LocationPublisher for RecordingPublisher {
    async fn publish(&self, event: &BusEvent) -> TripResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Bus that is always down.
pub struct FailingPublisher;

#[async_trait]
impl LocationPublisher for FailingPublisher {
    async fn publish(&self, _event: &BusEvent) -> TripResult<()> {
        Err(TripError::Transport("broker unavailable".into()))
    }
}

/// Route provider that always fails upstream.
pub struct FailingRouteProvider;

#[async_trait]
impl RouteProvider for FailingRouteProvider {
    async fn compute_route(
        &self,
        _origin_lat: f64,
        _origin_lon: f64,
        _destination_lat: f64,
        _destination_lon: f64,
    ) -> TripResult<ComputedRoute> {
        Err(TripError::Upstream("Unable to compute route".into()))
    }
}
