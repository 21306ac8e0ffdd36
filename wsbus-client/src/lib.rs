//! Reconnecting WebSocket pub/sub client
//!
//! The client mirrors the broker's protocol and adds reliability on top:
//!
//! - **State machine**: Disconnected → Connecting → Connected, with
//!   automatic reconnection (exponential backoff, 500ms to 16s) after
//!   transport failures
//! - **Subscription ownership**: callbacks are stored per pattern; exactly
//!   one `subscribe`/`unsubscribe` frame crosses the wire per pattern, and
//!   the whole registry is replayed on every reconnect
//! - **Channels**: first-class duplex streams ([`Channel`]) created locally
//!   or accepted from the broker through channel-open hooks
//! - **Token refresh**: a `?dc TOKEN_EXPIRED` notice triggers the
//!   configured [`TokenProvider`] and a transparent reconnect
//! - **Heartbeat**: `ping` every 30s (configurable) while Connected
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wsbus_client::BusClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BusClient::builder("ws://localhost:9100/ws", "T1").build();
//!     client.connect().await?;
//!
//!     client
//!         .subscribe("user/+/msg", |data, topic| async move {
//!             println!("{topic}: {data}");
//!         })
//!         .await?;
//!
//!     client.publish("user/42/msg", serde_json::json!("hi")).await?;
//!
//!     let channel = client.create_channel("chat/room1").await?;
//!     channel.send(serde_json::json!("hello")).await?;
//!     channel.wait().await;
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod builder;
mod channel;
mod client;
mod state;
mod subscription;

pub use backoff::{BackoffStrategy, ExponentialBackoff};
pub use builder::{ClientBuilder, TokenProvider};
pub use channel::Channel;
pub use client::BusClient;
pub use state::ConnectionState;
pub use subscription::SubscriptionToken;
