use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a driver-declared trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripStatus {
    Initiated,
    Ongoing,
    Completed,
    Failed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Initiated => "Initiated",
            TripStatus::Ongoing => "Ongoing",
            TripStatus::Completed => "Completed",
            TripStatus::Failed => "Failed",
        }
    }
}

/// A Trip is a DRIVER-created route that RIDERS can join.
///
/// `route_polyline` is the encoded path as returned by the route provider;
/// the decoded geometry is always derived from it via `geometry::decode_path`
/// so the two cannot drift apart.
#[derive(Debug, Clone, FromRow)]
pub struct Trip {
    pub trip_id: Uuid,
    pub starting_lon: f64,
    pub starting_lat: f64,
    pub destination_lon: f64,
    pub destination_lat: f64,
    pub current_lon: Option<f64>,
    pub current_lat: Option<f64>,
    pub route_polyline: Option<String>,
    pub available_seats: i32,
    pub is_ride_requests_allowed: bool,
    pub trip_status: String,
    pub distance_meters: f64,
    pub duration: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a freshly computed trip.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub starting_lon: f64,
    pub starting_lat: f64,
    pub destination_lon: f64,
    pub destination_lat: f64,
    pub route_polyline: String,
    pub available_seats: i32,
    pub is_ride_requests_allowed: bool,
    pub distance_meters: f64,
    pub duration: Option<String>,
}
