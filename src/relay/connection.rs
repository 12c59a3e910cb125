use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::{TtlCache, SESSION_CACHE_TTL};
use crate::db::repo::TripRepository;
use crate::error::{TripError, TripResult};
use crate::geometry;
use crate::kafka::LocationPublisher;
use crate::models::message::{
    trip_room_name, BusEvent, ClientEnvelope, ConfirmedTrip, LocationSnapshot,
    PublishLocationPayload, ServerMessage, TripIdPayload, MSG_PUBLISH_LOCATION, MSG_SUBSCRIBE,
    MSG_UNSUBSCRIBE,
};
use crate::models::subscription::session_cache_key;
use crate::relay::groups::{ConnectionId, GroupRegistry, Outbound};

/// Shared collaborators handed to every connection task.
pub struct RelayState {
    pub repo: Arc<dyn TripRepository>,
    pub cache: Arc<TtlCache>,
    pub groups: Arc<GroupRegistry>,
    pub publisher: Arc<dyn LocationPublisher>,
}

/// Per-connection session state machine: Connecting -> Connected -> Closed.
///
/// `connect` is the Connecting -> Connected transition, `handle_raw` runs
/// while Connected, `disconnect` is terminal. Handlers for one connection run
/// strictly sequentially; different connections run on independent tasks.
pub struct Connection {
    conn_id: ConnectionId,
    session_id: String,
    subscribed: HashSet<String>,
    state: Arc<RelayState>,
    outbound: Outbound,
}

impl Connection {
    /// Reads through the persisted subscription set for the session, mirrors
    /// it into the session cache, and rejoins the corresponding broadcast
    /// groups so a resumed session keeps receiving updates.
    pub async fn connect(
        state: Arc<RelayState>,
        session_id: String,
        outbound: Outbound,
    ) -> TripResult<Self> {
        let client_trips = state.repo.get_or_create_subscription(&session_id).await?;

        state
            .cache
            .set(
                &session_cache_key(&session_id),
                json!(client_trips.subscribed_to),
                Some(SESSION_CACHE_TTL),
            )
            .await;

        let conn_id = Uuid::new_v4();
        let subscribed: HashSet<String> = client_trips.subscribed_to.into_iter().collect();
        for trip_id in &subscribed {
            state
                .groups
                .join(&trip_room_name(trip_id), conn_id, outbound.clone())
                .await;
        }

        info!(
            %conn_id,
            session_id = %session_id,
            trips = subscribed.len(),
            "WebSocket connected"
        );

        Ok(Self {
            conn_id,
            session_id,
            subscribed,
            state,
            outbound,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribed(&self) -> &HashSet<String> {
        &self.subscribed
    }

    /// Dispatches one inbound frame. Every failure path ends in an `ERROR`
    /// reply; nothing here may close the connection.
    pub async fn handle_raw(&mut self, text: &str) {
        let envelope: ClientEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.send_error("Invalid JSON format");
                return;
            }
        };

        let result = match envelope.msg_type.as_str() {
            MSG_PUBLISH_LOCATION => self.handle_publish_location(envelope.data).await,
            MSG_SUBSCRIBE => self.handle_subscribe(envelope.data).await,
            MSG_UNSUBSCRIBE => self.handle_unsubscribe(envelope.data).await,
            other => Err(TripError::validation(format!(
                "Unknown message type: {other}"
            ))),
        };

        if let Err(e) = result {
            if e.is_client_facing() {
                self.send_error(&e.to_string());
            } else {
                error!(session_id = %self.session_id, "WebSocket error: {e}");
                self.send_error("Internal server error");
            }
        }
    }

    async fn handle_subscribe(&mut self, data: serde_json::Value) -> TripResult<()> {
        let trip_id = required_trip_id(data)?;

        if self.state.repo.get_trip(&trip_id).await?.is_none() {
            return Err(TripError::NotFound(trip_id));
        }
        if self.subscribed.contains(&trip_id) {
            return Err(TripError::conflict("Already subscribed to this trip"));
        }

        self.state
            .groups
            .join(&trip_room_name(&trip_id), self.conn_id, self.outbound.clone())
            .await;
        self.subscribed.insert(trip_id.clone());
        self.state
            .repo
            .add_subscription(&self.session_id, &trip_id)
            .await?;
        self.refresh_session_cache().await;

        self.send(ServerMessage::SubscriptionConfirmed {
            data: ConfirmedTrip { trip_id },
        });
        Ok(())
    }

    async fn handle_unsubscribe(&mut self, data: serde_json::Value) -> TripResult<()> {
        let trip_id = required_trip_id(data)?;

        if self.state.repo.get_trip(&trip_id).await?.is_none() {
            return Err(TripError::NotFound(trip_id));
        }
        if !self.subscribed.contains(&trip_id) {
            return Err(TripError::conflict("Not subscribed to this trip"));
        }

        self.state
            .groups
            .leave(&trip_room_name(&trip_id), self.conn_id)
            .await;
        self.subscribed.remove(&trip_id);
        self.state
            .repo
            .remove_subscription(&self.session_id, &trip_id)
            .await?;
        self.refresh_session_cache().await;

        self.send(ServerMessage::UnsubscriptionConfirmed {
            data: ConfirmedTrip { trip_id },
        });
        Ok(())
    }

    /// Write path: independent of this connection's own subscriptions.
    /// Persists history + current point atomically, then hands the event to
    /// the bus; a publish failure is logged but the ping still succeeds,
    /// since the next tick supersedes a lost one.
    async fn handle_publish_location(&mut self, data: serde_json::Value) -> TripResult<()> {
        let payload: PublishLocationPayload = serde_json::from_value(data)
            .map_err(|_| TripError::validation("Invalid message payload"))?;

        let (Some(trip_id), Some(latitude), Some(longitude)) = (
            payload.trip_id.filter(|id| !id.is_empty()),
            payload.latitude,
            payload.longitude,
        ) else {
            return Err(TripError::validation(
                "trip_id, latitude and longitude are required",
            ));
        };

        if !geometry::validate_coordinates(latitude, longitude) {
            return Err(TripError::validation("Invalid coordinates"));
        }
        if self.state.repo.get_trip(&trip_id).await?.is_none() {
            return Err(TripError::NotFound(trip_id));
        }

        let timestamp_str = payload
            .timestamp
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| TripError::validation("Invalid timestamp"))?;

        self.state
            .repo
            .record_location(&trip_id, latitude, longitude, timestamp)
            .await?;

        let snapshot = LocationSnapshot {
            trip_id: trip_id.clone(),
            latitude,
            longitude,
            timestamp: timestamp_str,
        };
        let event = BusEvent {
            room_name: trip_room_name(&trip_id),
            message: snapshot.clone(),
        };
        if let Err(e) = self.state.publisher.publish(&event).await {
            error!("Failed to publish location event: {e}");
        }

        self.send(ServerMessage::LocationPublished {
            status: "success".to_string(),
            data: snapshot,
        });
        Ok(())
    }

    /// Terminal transition. Leaves every joined group and clears the
    /// in-memory set; the persisted set and cache are deliberately untouched
    /// so a reconnect under the same session resumes where it left off.
    pub async fn disconnect(&mut self) {
        for trip_id in &self.subscribed {
            self.state
                .groups
                .leave(&trip_room_name(trip_id), self.conn_id)
                .await;
        }
        self.subscribed.clear();

        info!(
            conn_id = %self.conn_id,
            session_id = %self.session_id,
            "WebSocket disconnected"
        );
    }

    async fn refresh_session_cache(&self) {
        let subscribed: Vec<&String> = self.subscribed.iter().collect();
        self.state
            .cache
            .set(
                &session_cache_key(&self.session_id),
                json!(subscribed),
                Some(SESSION_CACHE_TTL),
            )
            .await;
    }

    fn send(&self, message: ServerMessage) {
        // The writer task owns the socket; if it is gone the read loop is
        // about to end anyway.
        let _ = self.outbound.send(Message::Text(message.to_json()));
    }

    fn send_error(&self, message: &str) {
        self.send(ServerMessage::error(message));
    }
}

fn required_trip_id(data: serde_json::Value) -> TripResult<String> {
    let payload: TripIdPayload = serde_json::from_value(data)
        .map_err(|_| TripError::validation("Invalid message payload"))?;
    payload
        .trip_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TripError::validation("trip_id is required"))
}
