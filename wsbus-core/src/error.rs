//! Error types for wsbus
//!
//! Two layers of errors exist:
//!
//! - **`Error`**: application-level errors for internal use (thiserror)
//! - **`Notice`**: the wire shape `{ code, detail }` carried in the `data`
//!   of `?er` / `?dc` / `<id>.clo` / `<id>.err` topic frames
//!
//! A `Notice` received from the peer converts into `Error::Notice` so it can
//! travel through `Result` like any other failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for wsbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for wsbus operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The peer sent an envelope that is not a valid frame
    #[error("Bad frame: {0}")]
    BadFrame(String),

    /// Authorization denial
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// WebSocket upgrade rejected (bad origin, invalid token)
    #[error("Handshake rejected: {0}")]
    Handshake(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Topic or pattern failed validation
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// A channel frame addressed an id with no live channel
    #[error("No such channel: {0}")]
    NoSuchChannel(String),

    /// The channel has already been torn down
    #[error("Channel closed")]
    ChannelClosed,

    /// Operation timed out (connect confirmation, channel create)
    #[error("Operation timed out")]
    Timeout,

    /// The connection is gone; the frame was not sent
    #[error("Connection closed")]
    ConnectionClosed,

    /// The client is not in the Connected state
    #[error("Not connected")]
    NotConnected,

    /// An error notice received from the peer
    #[error("Peer notice: {0}")]
    Notice(#[from] Notice),
}

/// Wire error codes observed in `?er` / `?dc` / `.clo` payloads
///
/// The set is extensible: unknown codes decode into `Other` instead of
/// failing the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The bearer token has expired; the client should refresh and reconnect
    TokenExpired,
    /// The action was denied by the ACL
    Forbidden,
    /// The envelope could not be parsed or carried an unknown action
    BadFrame,
    /// A channel frame addressed an unknown channel id
    NoSuchChannel,
    /// The peer is sending too fast
    RateLimit,
    /// The topic or pattern is ill-formed
    InvalidTopic,
    /// The remote end closed the channel
    PeerClosed,
    /// The remote end disconnected, tearing the channel down
    PeerDisconnected,
    /// Any code this build does not know about
    #[serde(untagged)]
    Other(String),
}

impl ErrorCode {
    /// The wire spelling of this code
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::BadFrame => "BAD_FRAME",
            ErrorCode::NoSuchChannel => "NO_SUCH_CHANNEL",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::InvalidTopic => "INVALID_TOPIC",
            ErrorCode::PeerClosed => "PEER_CLOSED",
            ErrorCode::PeerDisconnected => "PEER_DISCONNECTED",
            ErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire notice payload: `{ code, detail }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable detail, possibly empty
    #[serde(default)]
    pub detail: String,
}

impl Notice {
    /// Create a notice
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.detail)
    }
}

impl std::error::Error for Notice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::TokenExpired).unwrap(),
            "\"TOKEN_EXPIRED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::NoSuchChannel).unwrap(),
            "\"NO_SUCH_CHANNEL\""
        );
    }

    #[test]
    fn test_unknown_code_round_trip() {
        let code: ErrorCode = serde_json::from_str("\"SOME_FUTURE_CODE\"").unwrap();
        assert_eq!(code, ErrorCode::Other("SOME_FUTURE_CODE".to_string()));
        assert_eq!(code.as_str(), "SOME_FUTURE_CODE");
    }

    #[test]
    fn test_notice_display() {
        let notice = Notice::new(ErrorCode::Forbidden, "msg on system/#");
        assert_eq!(format!("{}", notice), "[FORBIDDEN] msg on system/#");
    }

    #[test]
    fn test_notice_default_detail() {
        let notice: Notice = serde_json::from_str("{\"code\":\"PEER_CLOSED\"}").unwrap();
        assert_eq!(notice.code, ErrorCode::PeerClosed);
        assert_eq!(notice.detail, "");
    }

    #[test]
    fn test_notice_into_error() {
        let err: Error = Notice::new(ErrorCode::TokenExpired, "").into();
        match err {
            Error::Notice(n) => assert_eq!(n.code, ErrorCode::TokenExpired),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
