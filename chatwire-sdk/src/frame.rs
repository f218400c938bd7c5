//! Wire frames: typed inbound events and outbound client frames.
//!
//! Every frame in both directions is a JSON object with a `type`
//! discriminator. Known inbound types decode into [`InboundEvent`]; anything
//! else is kept as [`InboundEvent::Unknown`] so newer servers don't break
//! older clients.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Dispatch key for inbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    Typing,
    StopTyping,
    UserOnline,
    UserOffline,
    MessageDelivered,
    MessageFailed,
    AuthExpired,
    /// A `type` this client has no typed decoding for.
    Other(String),
}

impl EventKind {
    /// The `message_delivery` family.
    pub const DELIVERY: [EventKind; 2] = [EventKind::MessageDelivered, EventKind::MessageFailed];
    /// The `user_status` family.
    pub const USER_STATUS: [EventKind; 2] = [EventKind::UserOnline, EventKind::UserOffline];
    /// The typing family.
    pub const TYPING: [EventKind; 2] = [EventKind::Typing, EventKind::StopTyping];

    pub fn parse(tag: &str) -> Self {
        match tag {
            "new_message" => EventKind::NewMessage,
            "typing" => EventKind::Typing,
            "stop_typing" => EventKind::StopTyping,
            "user_online" => EventKind::UserOnline,
            "user_offline" => EventKind::UserOffline,
            "message_delivered" => EventKind::MessageDelivered,
            "message_failed" => EventKind::MessageFailed,
            "auth_expired" => EventKind::AuthExpired,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::Typing => "typing",
            EventKind::StopTyping => "stop_typing",
            EventKind::UserOnline => "user_online",
            EventKind::UserOffline => "user_offline",
            EventKind::MessageDelivered => "message_delivered",
            EventKind::MessageFailed => "message_failed",
            EventKind::AuthExpired => "auth_expired",
            EventKind::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message pushed by the server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewMessage {
    #[serde(default, alias = "id", deserialize_with = "opt_id")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub group_id: Option<String>,
    #[serde(alias = "user_id", deserialize_with = "id")]
    pub sender_id: String,
    #[serde(default, alias = "username")]
    pub sender_name: Option<String>,
    #[serde(default, alias = "message")]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `typing` / `stop_typing` payload. Exactly one of the scope ids is expected.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TypingSignal {
    #[serde(deserialize_with = "id")]
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub group_id: Option<String>,
}

impl TypingSignal {
    /// Name to show in "X is typing…", falling back to the user id.
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.user_id)
    }
}

/// `user_online` / `user_offline` payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserStatusChange {
    #[serde(deserialize_with = "id")]
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// `message_delivered` / `message_failed` payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeliveryReport {
    #[serde(deserialize_with = "id")]
    pub message_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewMessage(NewMessage),
    Typing(TypingSignal),
    StopTyping(TypingSignal),
    UserOnline(UserStatusChange),
    UserOffline(UserStatusChange),
    MessageDelivered(DeliveryReport),
    MessageFailed(DeliveryReport),
    AuthExpired,
    /// Forward-compatible escape hatch: the raw object, `type` included.
    Unknown { kind: String, payload: Value },
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("bad `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl InboundEvent {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::NotJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(tag) => EventKind::parse(tag),
            None => return Err(FrameError::MissingType),
        };

        fn payload<T: serde::de::DeserializeOwned>(
            kind: &EventKind,
            value: Value,
        ) -> Result<T, FrameError> {
            serde_json::from_value(value).map_err(|source| FrameError::Payload {
                kind: kind.to_string(),
                source,
            })
        }

        Ok(match &kind {
            EventKind::NewMessage => InboundEvent::NewMessage(payload(&kind, value)?),
            EventKind::Typing => InboundEvent::Typing(payload(&kind, value)?),
            EventKind::StopTyping => InboundEvent::StopTyping(payload(&kind, value)?),
            EventKind::UserOnline => InboundEvent::UserOnline(payload(&kind, value)?),
            EventKind::UserOffline => InboundEvent::UserOffline(payload(&kind, value)?),
            EventKind::MessageDelivered => InboundEvent::MessageDelivered(payload(&kind, value)?),
            EventKind::MessageFailed => InboundEvent::MessageFailed(payload(&kind, value)?),
            EventKind::AuthExpired => InboundEvent::AuthExpired,
            EventKind::Other(tag) => InboundEvent::Unknown {
                kind: tag.clone(),
                payload: value,
            },
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::NewMessage(_) => EventKind::NewMessage,
            InboundEvent::Typing(_) => EventKind::Typing,
            InboundEvent::StopTyping(_) => EventKind::StopTyping,
            InboundEvent::UserOnline(_) => EventKind::UserOnline,
            InboundEvent::UserOffline(_) => EventKind::UserOffline,
            InboundEvent::MessageDelivered(_) => EventKind::MessageDelivered,
            InboundEvent::MessageFailed(_) => EventKind::MessageFailed,
            InboundEvent::AuthExpired => EventKind::AuthExpired,
            InboundEvent::Unknown { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinConversation { conversation_id: String },
    LeaveConversation { conversation_id: String },
    JoinIndividualChat { conversation_id: String },
    LeaveIndividualChat { conversation_id: String },
    JoinGroupChat { group_id: String },
    LeaveGroupChat { group_id: String },
    JoinUserStatus,
    LeaveUserStatus,
    JoinAdminMonitor,
    LeaveAdminMonitor,
    Typing {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
    StopTyping {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::JoinConversation { .. } => "join_conversation",
            ClientFrame::LeaveConversation { .. } => "leave_conversation",
            ClientFrame::JoinIndividualChat { .. } => "join_individual_chat",
            ClientFrame::LeaveIndividualChat { .. } => "leave_individual_chat",
            ClientFrame::JoinGroupChat { .. } => "join_group_chat",
            ClientFrame::LeaveGroupChat { .. } => "leave_group_chat",
            ClientFrame::JoinUserStatus => "join_user_status",
            ClientFrame::LeaveUserStatus => "leave_user_status",
            ClientFrame::JoinAdminMonitor => "join_admin_monitor",
            ClientFrame::LeaveAdminMonitor => "leave_admin_monitor",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::StopTyping { .. } => "stop_typing",
        }
    }
}

// Servers send ids as strings or integers depending on the table they come from.

fn id<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or integer id, got {other}"
        ))),
    }
}

fn opt_id<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(de)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or integer id, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typing_frame() {
        let event = InboundEvent::parse(
            r#"{"type":"typing","user_id":"u2","username":"Bea","conversation_id":"c1"}"#,
        )
        .unwrap();
        let InboundEvent::Typing(signal) = event else {
            panic!("expected typing, got {event:?}");
        };
        assert_eq!(signal.user_id, "u2");
        assert_eq!(signal.display_name(), "Bea");
        assert_eq!(signal.conversation_id.as_deref(), Some("c1"));
        assert_eq!(signal.group_id, None);
    }

    #[test]
    fn numeric_ids_become_strings() {
        let event = InboundEvent::parse(r#"{"type":"message_delivered","message_id":42}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::MessageDelivered(DeliveryReport {
                message_id: "42".to_string(),
                error: None,
            })
        );
    }

    #[test]
    fn display_name_falls_back_to_user_id() {
        let event = InboundEvent::parse(r#"{"type":"stop_typing","user_id":"u9","group_id":"g1"}"#)
            .unwrap();
        let InboundEvent::StopTyping(signal) = event else {
            panic!("expected stop_typing");
        };
        assert_eq!(signal.display_name(), "u9");
    }

    #[test]
    fn new_message_accepts_aliases() {
        let event = InboundEvent::parse(
            r#"{"type":"new_message","id":"m1","user_id":"u1","username":"Al","message":"hi","conversation_id":"c1"}"#,
        )
        .unwrap();
        let InboundEvent::NewMessage(msg) = event else {
            panic!("expected new_message");
        };
        assert_eq!(msg.message_id.as_deref(), Some("m1"));
        assert_eq!(msg.sender_id, "u1");
        assert_eq!(msg.sender_name.as_deref(), Some("Al"));
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn unknown_type_is_kept() {
        let event =
            InboundEvent::parse(r#"{"type":"group_renamed","group_id":"g1","name":"x"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Other("group_renamed".to_string()));
        let InboundEvent::Unknown { payload, .. } = event else {
            panic!("expected unknown");
        };
        assert_eq!(payload["name"], "x");
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(InboundEvent::parse("not json"), Err(FrameError::NotJson(_))));
        assert!(matches!(
            InboundEvent::parse(r#"{"user_id":"u1"}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"type":7}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"type":"typing"}"#),
            Err(FrameError::Payload { .. })
        ));
    }

    #[test]
    fn kind_round_trips_through_tag() {
        for kind in [
            EventKind::NewMessage,
            EventKind::Typing,
            EventKind::StopTyping,
            EventKind::UserOnline,
            EventKind::UserOffline,
            EventKind::MessageDelivered,
            EventKind::MessageFailed,
            EventKind::AuthExpired,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn client_frames_serialize_with_type_tag() {
        let json = serde_json::to_value(ClientFrame::JoinGroupChat {
            group_id: "g7".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "join_group_chat", "group_id": "g7"}));

        let json = serde_json::to_value(ClientFrame::JoinAdminMonitor).unwrap();
        assert_eq!(json, serde_json::json!({"type": "join_admin_monitor"}));

        let json = serde_json::to_value(ClientFrame::Typing {
            conversation_id: Some("c1".to_string()),
            group_id: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "typing", "conversation_id": "c1"}));
    }
}
