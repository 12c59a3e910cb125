use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for the trip matching and location relay core.
///
/// `Validation`, `NotFound` and `Conflict` are recovered at the relay
/// boundary and turned into `ERROR` replies; everything else is logged with
/// context and reported generically without closing the connection.
#[derive(Debug, Error)]
pub enum TripError {
    /// Missing or out-of-range client input.
    #[error("{0}")]
    Validation(String),

    /// Referenced trip or resource does not exist.
    #[error("Trip {0} not found")]
    NotFound(String),

    /// Already-subscribed / not-subscribed. Soft, non-fatal to the connection.
    #[error("{0}")]
    Conflict(String),

    /// Malformed encoded route geometry. Indicates upstream data corruption.
    #[error("failed to decode route polyline: {0}")]
    Decode(String),

    /// External route-computation provider failure.
    #[error("route provider error: {0}")]
    Upstream(String),

    /// Bus publish/consume failure. Non-fatal for publishers, fatal only to
    /// the consumer's current message.
    #[error("bus transport error: {0}")]
    Transport(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type TripResult<T> = Result<T, TripError>;

impl TripError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TripError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        TripError::Conflict(msg.into())
    }

    /// Whether this error is safe to echo verbatim to the client. Anything
    /// else becomes a generic error reply after logging.
    pub fn is_client_facing(&self) -> bool {
        matches!(
            self,
            TripError::Validation(_) | TripError::NotFound(_) | TripError::Conflict(_)
        )
    }
}
