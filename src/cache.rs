use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

pub const SETTINGS_CACHE_KEY: &str = "active_trip_settings";
pub const SESSION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

/// Process-wide key/value cache with optional per-entry TTL.
///
/// Holds the active match settings (no expiry, invalidated only by an
/// explicit re-seed) and the per-session subscribed-trip mirror (1-hour TTL,
/// refreshed on every mutation). Expired entries are dropped lazily on read.
pub struct TtlCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !expired(entry) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        self.entries.write().await.remove(key);
        None
    }

    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

fn expired(entry: &Entry) -> bool {
    entry
        .expires_at
        .map(|at| Instant::now() >= at)
        .unwrap_or(false)
}
