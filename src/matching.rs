use chrono::{DateTime, Utc};
use geo_types::Coord;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{TripError, TripResult};
use crate::geometry;
use crate::models::settings::{TripSettingsConfig, DEFAULT_RADIUS_METERS};
use crate::models::trip::{Trip, TripStatus};

/// Statuses a trip may hold while still accepting riders.
pub const MATCHABLE_STATUSES: [TripStatus; 2] = [TripStatus::Ongoing, TripStatus::Initiated];

/// Inbound matching query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchQuery {
    pub starting_latitude: f64,
    pub starting_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub number_of_seats: i32,
    pub intersection_radius_meters: Option<f64>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// One compatible trip, enriched with corridor distances and derived metrics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TripMatch {
    pub trip_id: String,
    pub pickup_latitude: f64,
    pub pickup_longitude: f64,
    pub dropoff_latitude: f64,
    pub dropoff_longitude: f64,
    pub pickup_distance_meters: f64,
    pub drop_off_distance_meters: f64,
    pub rider_trip_distance_meters: f64,
    pub available_seats: i32,
    pub eta_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub results: Vec<TripMatch>,
    pub total_matches: usize,
}

/// Service for matching trips based on pickup/drop-off location and seats.
#[derive(Debug, Clone)]
pub struct TripRouteMatch {
    pickup: Coord<f64>,
    drop_off: Coord<f64>,
    seats: i32,
    radius_meters: f64,
}

impl TripRouteMatch {
    pub fn from_query(query: &MatchQuery) -> TripResult<Self> {
        if !geometry::validate_coordinates(query.starting_latitude, query.starting_longitude)
            || !geometry::validate_coordinates(
                query.destination_latitude,
                query.destination_longitude,
            )
        {
            return Err(TripError::validation("Invalid coordinates"));
        }
        if query.number_of_seats < 1 {
            return Err(TripError::validation("number_of_seats must be at least 1"));
        }

        Ok(Self {
            pickup: Coord {
                x: query.starting_longitude,
                y: query.starting_latitude,
            },
            drop_off: Coord {
                x: query.destination_longitude,
                y: query.destination_latitude,
            },
            seats: query.number_of_seats,
            radius_meters: query
                .intersection_radius_meters
                .unwrap_or(DEFAULT_RADIUS_METERS),
        })
    }

    /// Filters `trips` down to those whose route carries the rider from
    /// pickup to drop-off, in that order, within the corridor radius.
    ///
    /// Matches carry no implicit ordering; callers paginate as-is.
    pub fn match_trips(
        &self,
        trips: &[Trip],
        settings: &TripSettingsConfig,
    ) -> Vec<TripMatch> {
        let speed_mps = settings.effective_speed_mps();
        let mut matches = Vec::new();

        for trip in trips {
            if !trip.is_ride_requests_allowed || trip.available_seats < self.seats {
                continue;
            }
            let Some(encoded) = trip.route_polyline.as_deref() else {
                continue;
            };
            let route = match geometry::decode_path(encoded) {
                Ok(route) => route,
                Err(e) => {
                    // Corrupt geometry is caught loudly at trip creation; a
                    // bad row must not take the whole query down.
                    warn!(trip_id = %trip.trip_id, "skipping trip with undecodable route: {e}");
                    continue;
                }
            };

            let Some(pickup) = geometry::project_onto_route(&route, self.pickup) else {
                continue;
            };
            let Some(drop_off) = geometry::project_onto_route(&route, self.drop_off) else {
                continue;
            };

            if pickup.distance_meters > self.radius_meters
                || drop_off.distance_meters > self.radius_meters
            {
                continue;
            }
            // Pickup must occur causally before drop-off along the driver's
            // direction of travel; fractional position handles routes that
            // loop or double back.
            if drop_off.fraction <= pickup.fraction {
                continue;
            }

            let route_length = geometry::route_length_meters(&route);
            let (rider_trip_distance_meters, eta_minutes) = derived_metrics(
                pickup.fraction,
                drop_off.fraction,
                route_length,
                speed_mps,
            );

            matches.push(TripMatch {
                trip_id: trip.trip_id.to_string(),
                // The trip's own endpoints, not the rider's query points.
                pickup_latitude: trip.starting_lat,
                pickup_longitude: trip.starting_lon,
                dropoff_latitude: trip.destination_lat,
                dropoff_longitude: trip.destination_lon,
                pickup_distance_meters: pickup.distance_meters,
                drop_off_distance_meters: drop_off.distance_meters,
                rider_trip_distance_meters,
                available_seats: trip.available_seats,
                eta_minutes,
            });
        }

        matches
    }
}

/// Rider-visible distance and ETA for a matched trip.
///
/// The ETA is measured from the route start at the configured average speed;
/// the driver's live position is deliberately not consulted (possible future
/// enhancement).
pub fn derived_metrics(
    pickup_fraction: f64,
    drop_off_fraction: f64,
    route_length_meters: f64,
    speed_mps: f64,
) -> (f64, f64) {
    let rider_trip_distance = (drop_off_fraction - pickup_fraction) * route_length_meters;
    let eta_minutes = (pickup_fraction * route_length_meters) / speed_mps;
    (rider_trip_distance, eta_minutes)
}

/// Zero matches is a valid result: empty page, total 0.
pub fn paginate(matches: Vec<TripMatch>, page: Option<usize>, per_page: Option<usize>) -> MatchResponse {
    let total_matches = matches.len();
    let per_page = per_page.unwrap_or(20).max(1);
    let page = page.unwrap_or(1).max(1);

    // Page numbers come straight from the caller; saturate instead of
    // overflowing on absurd values.
    let offset = page.saturating_sub(1).saturating_mul(per_page);
    let results = matches.into_iter().skip(offset).take(per_page).collect();

    MatchResponse {
        results,
        total_matches,
    }
}

/// Trips eligible for matching: Ongoing or Initiated, created since midnight
/// UTC today.
pub fn candidate_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}
