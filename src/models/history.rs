use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only audit record of a trip's accepted location pings. Never
/// mutated or deleted by this core; retrieved newest first.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TripLocationHistory {
    pub trip_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}
