//! Server → Client events

use serde::{Deserialize, Serialize};

use crate::types::MessageRecord;

/// Events pushed from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First token of a request is about to follow
    MessageStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// Incremental text
    Delta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        content: String,
    },
    /// Terminal success, optionally with the persisted assistant record
    MessageEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<MessageRecord>,
    },
    /// Terminal failure
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_used: Option<String>,
    },
}

impl ServerEvent {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ServerEvent::MessageStart { request_id }
            | ServerEvent::Delta { request_id, .. }
            | ServerEvent::MessageEnd { request_id, .. }
            | ServerEvent::Error { request_id, .. } => request_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerEvent;
    use crate::types::Role;

    #[test]
    fn deserializes_delta_without_request_id() {
        let event: ServerEvent = serde_json::from_str(r#"{"type":"delta","content":"Hi"}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::Delta {
                request_id: None,
                content: "Hi".to_string()
            }
        );
        assert_eq!(event.request_id(), None);
    }

    #[test]
    fn deserializes_message_end_with_record() {
        let json = r#"{
          "type":"message_end",
          "request_id":"A",
          "message":{"id":42,"role":"assistant","content":"Hi!","created_at":"2026-01-01T00:00:00Z"}
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::MessageEnd {
                request_id,
                message: Some(record),
            } => {
                assert_eq!(request_id.as_deref(), Some("A"));
                assert_eq!(record.id, 42);
                assert_eq!(record.role, Role::Assistant);
                assert_eq!(record.model, "");
            }
            other => panic!("expected message_end with record, got {other:?}"),
        }
    }

    #[test]
    fn serializes_error_event() {
        let event = ServerEvent::Error {
            request_id: Some("B".to_string()),
            detail: "provider down".to_string(),
            provider_used: Some("openai".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["detail"], "provider down");
        assert_eq!(json["provider_used"], "openai");
    }

    #[test]
    fn rejects_unknown_event_type() {
        assert!(serde_json::from_str::<ServerEvent>(r#"{"type":"typing"}"#).is_err());
    }
}
