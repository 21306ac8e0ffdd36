//! wsbus - WebSocket topic pub/sub and duplex channels
//!
//! This is the convenience crate that re-exports the wsbus sub-crates. Use
//! it if you want a single dependency providing both the broker and the
//! client.
//!
//! # Architecture
//!
//! wsbus is organized into modular crates:
//!
//! - **wsbus-core**: frame types, codec, topic matching, errors
//! - **wsbus-broker**: the broker (authenticated upgrade, subscription
//!   fan-out, ACL enforcement, channels, heartbeat sweep)
//! - **wsbus-client**: the reconnecting client (state machine, subscription
//!   ownership, channels, token refresh)
//!
//! # Quick Start - Broker
//!
//! ```rust,no_run
//! use wsbus::broker::AllowAll;
//! use wsbus::Broker;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr: std::net::SocketAddr = "127.0.0.1:9100".parse()?;
//!     let broker = Broker::builder()
//!         .bind(addr)
//!         .authenticator(Arc::new(AllowAll))
//!         .build()
//!         .await?;
//!
//!     broker.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Quick Start - Client
//!
//! ```rust,no_run
//! use wsbus::BusClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BusClient::builder("ws://localhost:9100/ws", "T1").build();
//!     client.connect().await?;
//!
//!     client
//!         .subscribe("system/#", |data, topic| async move {
//!             println!("{topic}: {data}");
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates under stable module names
pub use wsbus_broker as broker;
pub use wsbus_client as client;
pub use wsbus_core as core;

// Convenience re-exports of the most commonly used types
pub use wsbus_broker::Broker;
pub use wsbus_client::BusClient;
