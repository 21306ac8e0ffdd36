//! Codec for wire envelopes
//!
//! Encoding is plain serde. Decoding implements the two-shape probe: an
//! object carrying an `action` field is an action frame, anything else must
//! parse as a topic frame. The probe order matters: a topic frame may contain
//! arbitrary `data`, but the reserved `action` key always wins.
//!
//! # Examples
//!
//! ```rust
//! use wsbus_core::{codec, Action, ActionFrame, Frame};
//!
//! let frame = ActionFrame::new(Action::Ping, "");
//! let json = codec::encode(&frame).unwrap();
//!
//! match codec::decode(&json).unwrap() {
//!     Frame::Action(f) => assert_eq!(f.action, Action::Ping),
//!     Frame::Topic(_) => unreachable!(),
//! }
//! ```

use crate::error::{Error, Result};
use crate::frame::{ActionFrame, Frame, TopicFrame};
use serde::Serialize;

/// Encode any serializable envelope to a JSON string
pub fn encode<T: Serialize>(frame: &T) -> Result<String> {
    serde_json::to_string(frame).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a JSON string into a frame, probing action-first
///
/// # Errors
///
/// Returns `Error::BadFrame` when the input is not valid JSON, when an
/// `action`-carrying object has an unknown verb or wrong field types, or
/// when an action-less object is not a valid topic frame.
pub fn decode(data: &str) -> Result<Frame> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| Error::BadFrame(e.to_string()))?;

    // The probe: presence of `action` decides the shape. An unknown verb is
    // a bad frame, never a fall-through to the topic shape.
    if value.get("action").is_some() {
        let frame: ActionFrame =
            serde_json::from_value(value).map_err(|e| Error::BadFrame(e.to_string()))?;
        Ok(Frame::Action(frame))
    } else {
        let frame: TopicFrame =
            serde_json::from_value(value).map_err(|e| Error::BadFrame(e.to_string()))?;
        Ok(Frame::Topic(frame))
    }
}

/// Decode a frame known to be action-shaped
pub fn decode_action(data: &str) -> Result<ActionFrame> {
    serde_json::from_str(data).map_err(|e| Error::BadFrame(e.to_string()))
}

/// Decode a frame known to be topic-shaped
pub fn decode_topic(data: &str) -> Result<TopicFrame> {
    serde_json::from_str(data).map_err(|e| Error::BadFrame(e.to_string()))
}
