use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::db::{queries, DbPool};
use crate::error::{TripError, TripResult};
use crate::models::history::TripLocationHistory;
use crate::models::settings::TripSettingsConfig;
use crate::models::subscription::ClientSubscribedTrip;
use crate::models::trip::{NewTrip, Trip, TripStatus};

/// Narrow persistence interface the matching engine and the relay depend on.
///
/// Keeping the relay on this trait (instead of concrete entity modules)
/// breaks the dependency cycle the original system worked around with
/// deferred imports, and lets tests run against an in-memory store.
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn get_trip(&self, trip_id: &str) -> TripResult<Option<Trip>>;

    async fn create_trip(&self, new_trip: NewTrip) -> TripResult<Trip>;

    /// Appends a history record and updates the trip's current point as one
    /// atomic unit. Both writes commit or neither does.
    async fn record_location(
        &self,
        trip_id: &str,
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
    ) -> TripResult<()>;

    async fn query_candidate_trips(
        &self,
        status_in: &[TripStatus],
        created_since: DateTime<Utc>,
    ) -> TripResult<Vec<Trip>>;

    async fn location_history(
        &self,
        trip_id: &str,
        limit: i64,
    ) -> TripResult<Vec<TripLocationHistory>>;

    async fn get_active_settings(&self) -> TripResult<Option<TripSettingsConfig>>;

    /// Get-or-create of the single active settings row. Returns the row and
    /// whether it was newly created.
    async fn seed_settings(&self) -> TripResult<(TripSettingsConfig, bool)>;

    async fn get_or_create_subscription(
        &self,
        session_id: &str,
    ) -> TripResult<ClientSubscribedTrip>;

    /// Idempotent: adding a present id is a no-op. Returns whether the
    /// persisted set changed.
    async fn add_subscription(&self, session_id: &str, trip_id: &str) -> TripResult<bool>;

    /// Idempotent: removing an absent id is a no-op. Returns whether the
    /// persisted set changed.
    async fn remove_subscription(&self, session_id: &str, trip_id: &str) -> TripResult<bool>;
}

pub struct PgTripRepository {
    pool: DbPool,
}

impl PgTripRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Trip ids are opaque strings on the wire; rows are keyed by UUID. An
/// unparsable id can never reference a row, so it reads as absent.
fn parse_trip_id(trip_id: &str) -> Option<Uuid> {
    Uuid::parse_str(trip_id).ok()
}

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn get_trip(&self, trip_id: &str) -> TripResult<Option<Trip>> {
        let Some(id) = parse_trip_id(trip_id) else {
            return Ok(None);
        };
        let trip = sqlx::query_as::<_, Trip>(queries::SELECT_TRIP)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(trip)
    }

    async fn create_trip(&self, new_trip: NewTrip) -> TripResult<Trip> {
        let trip_id = Uuid::new_v4();
        sqlx::query(queries::INSERT_TRIP)
            .bind(trip_id)
            .bind(new_trip.starting_lon)
            .bind(new_trip.starting_lat)
            .bind(new_trip.destination_lon)
            .bind(new_trip.destination_lat)
            .bind(&new_trip.route_polyline)
            .bind(new_trip.available_seats)
            .bind(new_trip.is_ride_requests_allowed)
            .bind(TripStatus::Initiated.as_str())
            .bind(new_trip.distance_meters)
            .bind(&new_trip.duration)
            .execute(&self.pool)
            .await?;

        let now = Utc::now();
        Ok(Trip {
            trip_id,
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
        })
    }

    async fn record_location(
        &self,
        trip_id: &str,
        lat: f64,
        lon: f64,
        timestamp: DateTime<Utc>,
    ) -> TripResult<()> {
        let id = parse_trip_id(trip_id).ok_or_else(|| TripError::NotFound(trip_id.to_string()))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(queries::INSERT_LOCATION_HISTORY)
            .bind(id)
            .bind(lat)
            .bind(lon)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query(queries::UPDATE_TRIP_CURRENT_LOCATION)
            .bind(id)
            .bind(lon)
            .bind(lat)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            // Roll back the orphan history row along with the update.
            tx.rollback().await?;
            return Err(TripError::NotFound(trip_id.to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query_candidate_trips(
        &self,
        status_in: &[TripStatus],
        created_since: DateTime<Utc>,
    ) -> TripResult<Vec<Trip>> {
        let statuses: Vec<String> = status_in.iter().map(|s| s.as_str().to_string()).collect();
        let trips = sqlx::query_as::<_, Trip>(queries::SELECT_CANDIDATE_TRIPS)
            .bind(&statuses)
            .bind(created_since)
            .fetch_all(&self.pool)
            .await?;
        Ok(trips)
    }

    async fn location_history(
        &self,
        trip_id: &str,
        limit: i64,
    ) -> TripResult<Vec<TripLocationHistory>> {
        let Some(id) = parse_trip_id(trip_id) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, TripLocationHistory>(queries::SELECT_LOCATION_HISTORY)
            .bind(id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_active_settings(&self) -> TripResult<Option<TripSettingsConfig>> {
        let settings = sqlx::query_as::<_, TripSettingsConfig>(queries::SELECT_ACTIVE_SETTINGS)
            .fetch_optional(&self.pool)
            .await?;
        Ok(settings)
    }

    async fn seed_settings(&self) -> TripResult<(TripSettingsConfig, bool)> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, TripSettingsConfig>(queries::SELECT_ACTIVE_SETTINGS)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(settings) = existing {
            tx.commit().await?;
            return Ok((settings, false));
        }

        let defaults = TripSettingsConfig::default();
        sqlx::query(queries::INSERT_SETTINGS)
            .bind(defaults.radius_meters)
            .bind(defaults.speed_kmh)
            .bind(defaults.speed_mps)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok((defaults, true))
    }

    async fn get_or_create_subscription(
        &self,
        session_id: &str,
    ) -> TripResult<ClientSubscribedTrip> {
        sqlx::query(queries::ENSURE_SUBSCRIPTION_ROW)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query(queries::SELECT_SUBSCRIPTION)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(ClientSubscribedTrip {
            session_id: row.try_get("session_id")?,
            subscribed_to: row.try_get("subscribed_to")?,
        })
    }

    async fn add_subscription(&self, session_id: &str, trip_id: &str) -> TripResult<bool> {
        let result = sqlx::query(queries::ADD_SUBSCRIPTION)
            .bind(session_id)
            .bind(trip_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_subscription(&self, session_id: &str, trip_id: &str) -> TripResult<bool> {
        let result = sqlx::query(queries::REMOVE_SUBSCRIPTION)
            .bind(session_id)
            .bind(trip_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
