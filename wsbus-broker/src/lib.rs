//! WebSocket topic pub/sub broker
//!
//! The broker accepts authenticated WebSocket connections, maintains each
//! connection's subscription set, routes published messages by MQTT-style
//! topic patterns, enforces per-action/topic authorization, and multiplexes
//! server-assigned duplex channels over the same sockets.
//!
//! # Core Features
//!
//! - **Authenticated upgrade**: origin allow-list, bearer token from the
//!   `token` query parameter, pluggable [`Authenticator`]
//! - **Pub/Sub**: per-connection subscription sets, `+`/`#` wildcard
//!   matching, fan-out to all or one user's connections
//! - **Authorization**: read-through [`AclCache`] over a [`RuleStore`],
//!   consulted on `msg` and `channel_start`
//! - **Channels**: server-assigned duplex streams, client- or
//!   server-initiated, consumed through [`ChannelHook`]s
//! - **Liveness**: heartbeat sweep removing connections that stop pinging
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wsbus_broker::{AllowAll, Broker};
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
//!     broker.publish("system/up", serde_json::json!(true), None).await;
//!     broker.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! Each connection runs a reader task and a writer task; the writer drains
//! the connection's mailbox, which serializes all outbound frames on that
//! socket. The connection registry keeps the {all, by-user, by-subscription}
//! views inside one lock, so registration and removal are atomic across all
//! of them. Socket writes never happen while registry locks are held.

mod acl;
mod auth;
mod builder;
mod channel;
mod connection;
mod registry;

pub use acl::{AclCache, AclRule, RuleAction};
pub use auth::{AllowAll, Authenticator, Authorizer, RuleStore};
pub use builder::{BrokerBuilder, BrokerConfig};
pub use channel::{BrokerChannel, ChannelAcceptor, ChannelHook};
pub use registry::{ConnectionHandle, SessionId};

use channel::ChannelTable;
use registry::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use wsbus_core::{create_reply_topic, CreateReply, Error, Notice, Result, TopicFrame};

/// State shared by the accept loop, connection tasks, and the sweep
pub(crate) struct SharedState {
    pub(crate) registry: Registry,
    pub(crate) channels: Arc<ChannelTable>,
    pub(crate) authz: Option<AclCache>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) acceptor: Option<Arc<dyn ChannelAcceptor>>,
    pub(crate) config: BrokerConfig,
    pub(crate) session_counter: AtomicU64,
}

/// WebSocket pub/sub broker
///
/// Built via [`Broker::builder`]; [`Broker::run`] accepts connections until
/// dropped. [`Broker::publish`] and [`Broker::open_channel`] are the
/// server-side entry points into the message bus.
pub struct Broker {
    pub(crate) listener: TcpListener,
    pub(crate) state: Arc<SharedState>,
    pub(crate) sweep_shutdown: watch::Sender<bool>,
    pub(crate) sweep_shutdown_rx: watch::Receiver<bool>,
}

impl Broker {
    /// Create a new broker builder
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// The local address the listener is bound to
    ///
    /// Useful with port 0 binds, where the OS picks the port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until an accept error occurs
    ///
    /// Spawns the heartbeat sweep, then loops accepting TCP connections and
    /// spawning one handler task per connection.
    #[tracing::instrument(skip(self), name = "broker.run")]
    pub async fn run(&self) -> Result<()> {
        tracing::info!(path = %self.state.config.path, "broker started");

        tokio::spawn(heartbeat_sweep(
            Arc::clone(&self.state),
            self.sweep_shutdown_rx.clone(),
        ));

        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::Io(e.to_string()))?;
            let session_id = self.state.session_counter.fetch_add(1, Ordering::SeqCst);
            let state = Arc::clone(&self.state);

            tracing::debug!(session_id, addr = %addr, "connection accepted");

            tokio::spawn(async move {
                if let Err(e) = connection::handle_connection(stream, session_id, state).await {
                    tracing::error!(session_id, error = %e, "connection error");
                }
            });
        }
    }

    /// Publish `data` on `topic` to every matching subscription
    ///
    /// With `target_user` set, only that user's connections are candidates.
    /// Delivery is best-effort while connections are live; the return value
    /// is the number of sockets the frame was queued on.
    #[tracing::instrument(skip(self, data), fields(topic = topic))]
    pub async fn publish(
        &self,
        topic: &str,
        data: serde_json::Value,
        target_user: Option<&str>,
    ) -> usize {
        let sent = self
            .state
            .registry
            .fan_out(TopicFrame::new(topic, data), target_user)
            .await;
        tracing::debug!(sent, "published");
        sent
    }

    /// Open a server-initiated channel towards one of `user_id`'s sessions
    ///
    /// Registers the channel, pushes the `<topic>.cre` announcement carrying
    /// the assigned id, and returns the server-side handle. The client ends
    /// up in its channel-open hook for a pattern matching `topic`.
    ///
    /// # Errors
    ///
    /// `NotConnected` when the user has no live session.
    pub async fn open_channel(
        &self,
        user_id: &str,
        topic: &str,
        hook: Arc<dyn ChannelHook>,
    ) -> Result<BrokerChannel> {
        let sessions = self.state.registry.user_sessions(user_id).await;
        let handle = sessions.into_iter().next().ok_or(Error::NotConnected)?;

        let id = self
            .state
            .channels
            .open(handle.id, topic, Arc::clone(&handle), hook)
            .await;

        let reply = CreateReply::ok(&id);
        let data = serde_json::to_value(&reply).map_err(|e| Error::Serialization(e.to_string()))?;
        handle.send_frame(&TopicFrame::new(create_reply_topic(topic), data))?;

        self.state
            .channels
            .handle(&id)
            .await
            .ok_or(Error::ChannelClosed)
    }

    /// Push a `?dc` notice to every session of a user and close them
    ///
    /// This is how the embedding application tells a client why it is being
    /// cut off (e.g. `TOKEN_EXPIRED`); the notice is queued ahead of the
    /// close frame on each mailbox. Returns the number of sessions closed.
    pub async fn disconnect_user(&self, user_id: &str, notice: Notice) -> usize {
        let sessions = self.state.registry.user_sessions(user_id).await;
        let count = sessions.len();
        for handle in sessions {
            let _ = handle.send_notice(wsbus_core::TOPIC_DISCONNECT, &notice);
            let _ = handle.send_message(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "disconnected by server".into(),
            })));
            handle.request_close();
        }
        count
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.state.registry.len().await
    }

    /// Number of live channels
    pub async fn channel_count(&self) -> usize {
        self.state.channels.len().await
    }

    /// Session ids of one user's live connections
    pub async fn user_sessions(&self, user_id: &str) -> Vec<SessionId> {
        self.state
            .registry
            .user_sessions(user_id)
            .await
            .into_iter()
            .map(|handle| handle.id)
            .collect()
    }

    /// The authorization cache, when a rule store was configured
    ///
    /// The embedding application pushes rule mutations through
    /// [`AclCache::put`] / [`AclCache::delete`].
    pub fn authz(&self) -> Option<&AclCache> {
        self.state.authz.as_ref()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = self.sweep_shutdown.send(true);
    }
}

/// Periodic liveness sweep
///
/// Every sweep period, removes connections whose last ping is older than
/// `ping_timeout`: close frame queued, read loop signalled, registry entry
/// and channels torn down.
async fn heartbeat_sweep(state: Arc<SharedState>, mut shutdown: watch::Receiver<bool>) {
    let period = state.config.sweep_period();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for session_id in state.registry.stale(state.config.ping_timeout).await {
                    if let Some(handle) = state.registry.remove(session_id).await {
                        tracing::info!(
                            session_id,
                            user_id = %handle.user_id,
                            "ping timeout, removing connection"
                        );
                        let _ = handle.send_message(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "ping timeout".into(),
                        })));
                        handle.request_close();
                        state.channels.close_for_session(session_id).await;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
