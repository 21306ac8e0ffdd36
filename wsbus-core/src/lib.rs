//! Core types for the wsbus topic pub/sub runtime
//!
//! This crate holds everything the broker and the client share:
//!
//! - **Frames**: the JSON envelopes exchanged over the socket
//!   ([`ActionFrame`], [`TopicFrame`], [`Frame`])
//! - **Codec**: encode/decode with the action-first probe ([`codec`])
//! - **Topic matching**: MQTT-style `+`/`#` patterns ([`TopicPattern`],
//!   [`topic_matches`], [`any_match`], [`all_match`])
//! - **Errors**: the application error taxonomy ([`Error`]) and the wire
//!   notice shape ([`Notice`], [`ErrorCode`])
//!
//! # Topic Grammar
//!
//! Topics are `/`-separated levels. In patterns, `+` matches exactly one
//! level and `#` matches zero or more trailing levels (last position only).
//! The topics `?dc` and `?er` and the suffixes `.cre`, `.clo`, `.err` are
//! reserved for the protocol.

pub mod codec;
mod error;
mod frame;
mod pattern;

pub use error::{Error, ErrorCode, Notice, Result};
pub use frame::{
    close_topic, create_reply_topic, error_topic, unix_millis, Action, ActionFrame, CreateReply,
    Frame, TopicFrame, SUFFIX_CLOSE, SUFFIX_CREATE, SUFFIX_ERROR, TOPIC_DISCONNECT, TOPIC_ERROR,
};
pub use pattern::{all_match, any_match, topic_matches, Level, PatternError, TopicPattern};
