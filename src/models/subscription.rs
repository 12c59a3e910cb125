use sqlx::FromRow;

/// Per-session subscription state. Created lazily on a session's first
/// connection and never deleted automatically; a session that reconnects
/// resumes exactly the set it left behind.
#[derive(Debug, Clone, FromRow)]
pub struct ClientSubscribedTrip {
    pub session_id: String,
    pub subscribed_to: Vec<String>,
}

/// Cache key mirroring the persisted set, refreshed on every mutation.
pub fn session_cache_key(session_id: &str) -> String {
    format!("client_subscribed_{session_id}")
}
