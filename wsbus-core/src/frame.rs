//! Wire-level frame types
//!
//! Everything exchanged over the socket is one JSON envelope. Two envelope
//! shapes coexist:
//!
//! 1. **Action frame**: carries an `action` verb. Client-to-server control
//!    (`subscribe`, `msg`, `ping`, ...) and server-to-client announcements
//!    (`pong`, `connected`, channel traffic).
//! 2. **Topic frame**: server-to-client delivery of published data, shaped
//!    `{ topic, userId?, data, timestamp? }`.
//!
//! A receiver probes in that order: the presence of an `action` field makes
//! the envelope an action frame; see [`crate::codec::decode`].
//!
//! # Reserved Topics
//!
//! - `?dc` - disconnect notice (e.g. token expiry)
//! - `?er` - error notice
//! - `<topic>.cre` - channel creation reply
//! - `<id>.clo` - channel close notification
//! - `<id>.err` - per-channel error

use crate::error::Notice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Disconnect-notice topic
pub const TOPIC_DISCONNECT: &str = "?dc";
/// Error-notice topic
pub const TOPIC_ERROR: &str = "?er";

/// Suffix of channel creation replies
pub const SUFFIX_CREATE: &str = ".cre";
/// Suffix of channel close notifications
pub const SUFFIX_CLOSE: &str = ".clo";
/// Suffix of per-channel errors
pub const SUFFIX_ERROR: &str = ".err";

/// Topic on which the creation reply for a `channel_start` on `topic` arrives
pub fn create_reply_topic(topic: &str) -> String {
    format!("{topic}{SUFFIX_CREATE}")
}

/// Topic on which close notifications for a channel id arrive
pub fn close_topic(channel_id: &str) -> String {
    format!("{channel_id}{SUFFIX_CLOSE}")
}

/// Topic on which per-channel errors for a channel id arrive
pub fn error_topic(channel_id: &str) -> String {
    format!("{channel_id}{SUFFIX_ERROR}")
}

/// Milliseconds since the Unix epoch, for `TopicFrame::timestamp`
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Action verbs carried by action frames
///
/// Wire names are snake_case strings (`"channel_start"` etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// C→S: add a pattern to the connection's subscription set
    Subscribe,
    /// C→S: remove a pattern
    Unsubscribe,
    /// C→S: publish `data` on `topic` (subject to authorization)
    Msg,
    /// C→S: liveness probe
    Ping,
    /// S→C: liveness reply
    Pong,
    /// C→S: request a new channel on `topic`
    ChannelStart,
    /// Both: in-channel payload; `topic` is the channel id
    Channel,
    /// Both: close a channel
    ChannelClose,
    /// S→C: post-handshake confirmation
    Connected,
}

impl Action {
    /// The wire name of this verb
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Subscribe => "subscribe",
            Action::Unsubscribe => "unsubscribe",
            Action::Msg => "msg",
            Action::Ping => "ping",
            Action::Pong => "pong",
            Action::ChannelStart => "channel_start",
            Action::Channel => "channel",
            Action::ChannelClose => "channel_close",
            Action::Connected => "connected",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Control envelope: `{ action, topic, data? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFrame {
    /// The verb
    pub action: Action,
    /// Target topic, pattern, or channel id depending on the verb
    #[serde(default)]
    pub topic: String,
    /// Optional payload; omitted on the wire when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ActionFrame {
    /// Create an action frame without payload
    pub fn new(action: Action, topic: impl Into<String>) -> Self {
        Self {
            action,
            topic: topic.into(),
            data: None,
        }
    }

    /// Create an action frame with payload
    pub fn with_data(action: Action, topic: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            action,
            topic: topic.into(),
            data: Some(data),
        }
    }
}

/// Delivery envelope: `{ topic, userId?, data, timestamp? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicFrame {
    /// Concrete topic the message was published on
    pub topic: String,
    /// Publishing user, when known
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Message payload
    pub data: serde_json::Value,
    /// Server-side publish time, milliseconds since epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl TopicFrame {
    /// Create a topic frame stamped with the current time
    pub fn new(topic: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            user_id: None,
            data,
            timestamp: Some(unix_millis()),
        }
    }

    /// Attach the publishing user
    pub fn from_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Any envelope that can appear on the socket
///
/// Serialization is untagged; variant order encodes the receiver's probe
/// order (action frames are recognized by their `action` field).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Control or announcement
    Action(ActionFrame),
    /// Published data delivery
    Topic(TopicFrame),
}

/// Payload of a `<topic>.cre` channel creation reply
///
/// Exactly one of `channel_id` and `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReply {
    /// Server-assigned channel id on success
    #[serde(rename = "channelId", default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Refusal reason on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Notice>,
}

impl CreateReply {
    /// Successful reply carrying the assigned channel id
    pub fn ok(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            error: None,
        }
    }

    /// Refusal carrying the error notice
    pub fn refused(error: Notice) -> Self {
        Self {
            channel_id: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(
            serde_json::to_string(&Action::ChannelStart).unwrap(),
            "\"channel_start\""
        );
        assert_eq!(Action::Msg.as_str(), "msg");
        assert_eq!(format!("{}", Action::Connected), "connected");
    }

    #[test]
    fn test_action_frame_serialization() {
        let frame = ActionFrame::new(Action::Subscribe, "user/+/msg");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"action\":\"subscribe\""));
        assert!(json.contains("\"topic\":\"user/+/msg\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_topic_frame_serialization() {
        let frame = TopicFrame::new("user/42/msg", json!("hi")).from_user("42");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"topic\":\"user/42/msg\""));
        assert!(json.contains("\"userId\":\"42\""));
        assert!(json.contains("\"data\":\"hi\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_topic_frame_omits_absent_fields() {
        let frame = TopicFrame {
            topic: "t".into(),
            user_id: None,
            data: json!(1),
            timestamp: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("userId"));
        assert!(!json.contains("timestamp"));
    }

    #[test]
    fn test_create_reply_shapes() {
        let ok = CreateReply::ok("ch-7");
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"channelId\":\"ch-7\""));
        assert!(!json.contains("error"));

        let refused = CreateReply::refused(Notice::new(ErrorCode::Forbidden, "denied"));
        let json = serde_json::to_string(&refused).unwrap();
        assert!(json.contains("\"error\""));
        assert!(json.contains("FORBIDDEN"));
    }

    #[test]
    fn test_reserved_topic_helpers() {
        assert_eq!(create_reply_topic("chat/room1"), "chat/room1.cre");
        assert_eq!(close_topic("ch-7"), "ch-7.clo");
        assert_eq!(error_topic("ch-7"), "ch-7.err");
    }
}
