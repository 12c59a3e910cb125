use serde::{Deserialize, Serialize};

pub const MSG_PUBLISH_LOCATION: &str = "PUBLISH_LOCATION";
pub const MSG_SUBSCRIBE: &str = "SUBSCRIBE_TO_TRIP_LOCATION";
pub const MSG_UNSUBSCRIBE: &str = "UNSUBSCRIBE_FROM_TRIP_LOCATION";

/// Inbound message envelope. The tag is matched at the dispatch boundary;
/// unknown tags get a non-fatal error reply.
#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct TripIdPayload {
    pub trip_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishLocationPayload {
    pub trip_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timestamp: Option<String>,
}

/// The location snapshot echoed to the publisher and fanned out to
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSnapshot {
    pub trip_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
}

/// Outbound messages, both direct replies and group broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "SUBSCRIPTION_CONFIRMED")]
    SubscriptionConfirmed { data: ConfirmedTrip },
    #[serde(rename = "UNSUBSCRIPTION_CONFIRMED")]
    UnsubscriptionConfirmed { data: ConfirmedTrip },
    #[serde(rename = "LOCATION_PUBLISHED")]
    LocationPublished {
        status: String,
        data: LocationSnapshot,
    },
    #[serde(rename = "trip.location.update")]
    LocationUpdate { message: LocationSnapshot },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmedTrip {
    pub trip_id: String,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // The enum only contains JSON-safe types.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"ERROR","message":"internal serialization error"}"#.to_string()
        })
    }
}

/// Envelope carried on the durable location topic, keyed by room so that
/// per-trip ordering survives the hop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEvent {
    pub room_name: String,
    pub message: LocationSnapshot,
}

/// Broadcast group name for a trip.
pub fn trip_room_name(trip_id: &str) -> String {
    format!("trip_{trip_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_type_and_data() {
        let raw = r#"{"type":"SUBSCRIBE_TO_TRIP_LOCATION","data":{"trip_id":"abc"}}"#;
        let env: ClientEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.msg_type, MSG_SUBSCRIBE);
        let payload: TripIdPayload = serde_json::from_value(env.data).unwrap();
        assert_eq!(payload.trip_id.as_deref(), Some("abc"));
    }

    #[test]
    fn envelope_tolerates_missing_data() {
        let env: ClientEnvelope = serde_json::from_str(r#"{"type":"PUBLISH_LOCATION"}"#).unwrap();
        assert_eq!(env.msg_type, MSG_PUBLISH_LOCATION);
        assert!(env.data.is_null());
    }

    #[test]
    fn server_messages_use_wire_tags() {
        let msg = ServerMessage::SubscriptionConfirmed {
            data: ConfirmedTrip {
                trip_id: "t1".into(),
            },
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "SUBSCRIPTION_CONFIRMED");
        assert_eq!(json["data"]["trip_id"], "t1");

        let update = ServerMessage::LocationUpdate {
            message: LocationSnapshot {
                trip_id: "t1".into(),
                latitude: 6.5244,
                longitude: 3.3792,
                timestamp: "2026-01-01T00:00:00Z".into(),
            },
        };
        let json: serde_json::Value = serde_json::from_str(&update.to_json()).unwrap();
        assert_eq!(json["type"], "trip.location.update");
        assert_eq!(json["message"]["trip_id"], "t1");
    }

    #[test]
    fn bus_event_round_trips() {
        let event = BusEvent {
            room_name: trip_room_name("t1"),
            message: LocationSnapshot {
                trip_id: "t1".into(),
                latitude: 1.0,
                longitude: 2.0,
                timestamp: "2026-01-01T00:00:00Z".into(),
            },
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        let back: BusEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.room_name, "trip_t1");
    }
}
