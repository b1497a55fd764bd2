use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationId, MessageId, NotificationId, NotificationKind, PresenceStatus, UserId},
    error::WireErrorCode,
};

/// One chat message as it appears on the wire and in the reconciled store.
///
/// Identity is stable across edits and deletes; both mutate the record in
/// place. `text` is absent for attachment-only messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_counts: HashMap<UserId, u32>,
}

/// Frames the client sends over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        token: String,
    },
    SendMessage {
        conversation_id: ConversationId,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    EditMessage {
        message_id: MessageId,
        text: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    ReadReceipt {
        conversation_id: ConversationId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        message_ids: Vec<MessageId>,
    },
    GetMissedMessages {
        conversation_id: ConversationId,
    },
    NotificationsSync {
        unread_only: bool,
        limit: u32,
    },
    Ping,
}

/// Frames the server pushes over a channel, discriminated by `type`.
///
/// Anything that fails to parse — malformed JSON or an unrecognized
/// discriminator — is dropped before it reaches the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthRequired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Authenticated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    Message {
        message: MessagePayload,
    },
    MessageSent {
        message: MessagePayload,
    },
    /// Broadcast alias some relays emit instead of `message`.
    ChatMessage {
        message: MessagePayload,
    },
    /// Single missed message pushed during the server's own reconnect sweep.
    MissedMessage {
        conversation_id: ConversationId,
        message: MessagePayload,
    },
    /// Batch response to `get_missed_messages`.
    MissedMessages {
        conversation_id: ConversationId,
        messages: Vec<MessagePayload>,
    },
    MessageEdited {
        message: MessagePayload,
    },
    MessageDeleted {
        message: MessagePayload,
    },
    Typing {
        user_id: UserId,
        is_typing: bool,
    },
    ReadReceipt {
        user_id: UserId,
        conversation_id: ConversationId,
        message_count: u64,
    },
    ReadReceiptSent {
        message_count: u64,
    },
    Presence {
        user_id: UserId,
        status: PresenceStatus,
    },
    Notification {
        notification: NotificationPayload,
    },
    MissedNotifications {
        notifications: Vec<NotificationPayload>,
    },
    /// Batch response to the client's `notifications_sync` request.
    NotificationsSync {
        notifications: Vec<NotificationPayload>,
    },
    Pong,
    Error {
        code: WireErrorCode,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> MessagePayload {
        MessagePayload {
            id: MessageId::from(id),
            conversation_id: ConversationId::from("c1"),
            sender_id: UserId::from("u1"),
            text: Some("hi".to_string()),
            attachments: Vec::new(),
            timestamp: "2024-05-01T12:00:00Z".parse().expect("timestamp"),
            is_read: false,
            read_at: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn ping_serializes_to_bare_type_tag() {
        let json = serde_json::to_value(ClientFrame::Ping).expect("serialize");
        assert_eq!(json, serde_json::json!({ "type": "ping" }));
    }

    #[test]
    fn send_message_omits_empty_attachments() {
        let frame = ClientFrame::SendMessage {
            conversation_id: ConversationId::from("c1"),
            text: "hello".to_string(),
            attachments: Vec::new(),
        };
        let json = serde_json::to_value(frame).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "type": "send_message",
                "conversation_id": "c1",
                "text": "hello",
            })
        );
    }

    #[test]
    fn parses_inbound_message_frame() {
        let raw = serde_json::json!({
            "type": "message",
            "message": {
                "id": "m1",
                "conversation_id": "c1",
                "sender_id": "u2",
                "text": "hey",
                "attachments": [],
                "timestamp": "2024-05-01T12:00:00Z",
                "is_read": false,
                "read_at": null,
            },
        });
        let frame: ServerFrame = serde_json::from_value(raw).expect("parse");
        match frame {
            ServerFrame::Message { message } => {
                assert_eq!(message.id, MessageId::from("m1"));
                assert_eq!(message.text.as_deref(), Some("hey"));
                assert!(!message.is_deleted);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_typing_frame() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"typing","user_id":"u2","is_typing":true}"#)
                .expect("parse");
        assert_eq!(
            frame,
            ServerFrame::Typing {
                user_id: UserId::from("u2"),
                is_typing: true,
            }
        );
    }

    #[test]
    fn parses_error_frame_codes() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"error","code":"AUTH_FAILED","error":"Invalid or expired token"}"#,
        )
        .expect("parse");
        assert_eq!(
            frame,
            ServerFrame::Error {
                code: WireErrorCode::AuthFailed,
                error: "Invalid or expired token".to_string(),
            }
        );
    }

    #[test]
    fn unknown_frame_type_fails_to_parse() {
        let result = serde_json::from_str::<ServerFrame>(r#"{"type":"presence_digest"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missed_messages_round_trip() {
        let frame = ServerFrame::MissedMessages {
            conversation_id: ConversationId::from("c1"),
            messages: vec![message("m1"), message("m2")],
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        let parsed: ServerFrame = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, frame);
    }

    #[test]
    fn notification_kind_uses_snake_case_tags() {
        let raw = serde_json::json!({
            "id": "n1",
            "type": "session_request",
            "title": "New session request",
            "body": "alice wants to book a session",
            "related_id": "s9",
            "is_read": false,
            "created_at": "2024-05-01T12:00:00Z",
        });
        let parsed: NotificationPayload = serde_json::from_value(raw).expect("parse");
        assert_eq!(parsed.kind, NotificationKind::SessionRequest);
    }
}
