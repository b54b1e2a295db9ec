//! Hub WebSocket frame vocabulary
//!
//! The hub speaks JSON frames over a persistent bidirectional channel.
//! Incoming frames are a closed sum type; unrecognized types are preserved
//! so the session manager can log them without dropping the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventContext;

/// Frames the hub sends us.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    /// First frame after connect; we must answer with `auth`.
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// Correlated response to any request we issued.
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<CommandError>,
    },
    /// A pushed event on one of our subscriptions.
    Event {
        #[serde(default)]
        id: Option<u64>,
        event: EventEnvelope,
    },
    Pong {
        id: u64,
    },
    Ping {
        id: u64,
    },
    /// Anything the hub added since this vocabulary was written.
    #[serde(other)]
    Unknown,
}

/// Error payload inside a failed `result` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code.as_deref().unwrap_or("unknown"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

/// The `event` payload of an event frame.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub time_fired: Option<String>,
    #[serde(default)]
    pub context: EventContext,
}

/// Frames we send to the hub. IDs are unique and monotonic per session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
    Ping {
        id: u64,
    },
    Pong {
        id: u64,
    },
    #[serde(rename = "config/device_registry/list")]
    DeviceRegistryList { id: u64 },
    #[serde(rename = "config/entity_registry/list")]
    EntityRegistryList { id: u64 },
    #[serde(rename = "config_entries/list")]
    ConfigEntriesList { id: u64 },
}

impl ClientFrame {
    /// Request id carried by this frame, if any. `auth` frames are the one
    /// unnumbered message in the protocol.
    pub fn id(&self) -> Option<u64> {
        match self {
            ClientFrame::Auth { .. } => None,
            ClientFrame::SubscribeEvents { id, .. }
            | ClientFrame::Ping { id }
            | ClientFrame::Pong { id }
            | ClientFrame::DeviceRegistryList { id }
            | ClientFrame::EntityRegistryList { id }
            | ClientFrame::ConfigEntriesList { id } => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth_required() {
        let frame: HubFrame =
            serde_json::from_str(r#"{"type":"auth_required","ha_version":"2025.6"}"#).unwrap();
        assert!(matches!(frame, HubFrame::AuthRequired { .. }));
    }

    #[test]
    fn parses_result_with_error() {
        let frame: HubFrame = serde_json::from_str(
            r#"{"type":"result","id":3,"success":false,"error":{"code":"invalid_format","message":"bad"}}"#,
        )
        .unwrap();
        match frame {
            HubFrame::Result { id, success, error, .. } => {
                assert_eq!(id, 3);
                assert!(!success);
                assert_eq!(error.unwrap().code.as_deref(), Some("invalid_format"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_types_do_not_fail() {
        let frame: HubFrame =
            serde_json::from_str(r#"{"type":"zones/list_response","data":[]}"#).unwrap();
        assert!(matches!(frame, HubFrame::Unknown));
    }

    #[test]
    fn serializes_subscribe_with_monotonic_id() {
        let frame = ClientFrame::SubscribeEvents {
            id: 7,
            event_type: Some("state_changed".to_string()),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe_events");
        assert_eq!(json["id"], 7);
        assert_eq!(json["event_type"], "state_changed");
    }

    #[test]
    fn serializes_registry_request_type_strings() {
        let json = serde_json::to_value(ClientFrame::DeviceRegistryList { id: 11 }).unwrap();
        assert_eq!(json["type"], "config/device_registry/list");
    }
}
