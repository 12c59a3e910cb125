use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Process-wide matching parameters. At most one row is active at a time;
/// the active row is cached without expiry until an explicit re-seed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripSettingsConfig {
    pub radius_meters: f64,
    pub speed_kmh: f64,
    pub speed_mps: f64,
    pub is_active: bool,
}

pub const DEFAULT_RADIUS_METERS: f64 = 500.0;
pub const DEFAULT_SPEED_KMH: f64 = 30.0;

impl TripSettingsConfig {
    /// Effective speed in m/s, falling back to 30 km/h when the precomputed
    /// field is absent or zero.
    pub fn effective_speed_mps(&self) -> f64 {
        if self.speed_mps > 0.0 {
            self.speed_mps
        } else if self.speed_kmh > 0.0 {
            self.speed_kmh * 1000.0 / 3600.0
        } else {
            DEFAULT_SPEED_KMH * 1000.0 / 3600.0
        }
    }
}

impl Default for TripSettingsConfig {
    fn default() -> Self {
        Self {
            radius_meters: DEFAULT_RADIUS_METERS,
            speed_kmh: DEFAULT_SPEED_KMH,
            speed_mps: DEFAULT_SPEED_KMH * 1000.0 / 3600.0,
            is_active: true,
        }
    }
}
