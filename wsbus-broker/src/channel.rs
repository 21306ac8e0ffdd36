//! Server-side channel table and hooks
//!
//! A channel is a duplex stream multiplexed over one connection's socket,
//! addressed by a broker-assigned id (`ch-<n>`). The table maps live ids to
//! their owning session and the application hook that consumes them.
//!
//! # Lifecycle
//!
//! - **Client-initiated**: a `channel_start` frame is run past the ACL and
//!   the [`ChannelAcceptor`]; on acceptance the broker assigns an id,
//!   registers the entry, and replies on `<topic>.cre`.
//! - **Server-initiated**: [`crate::Broker::open_channel`] registers an entry
//!   and pushes `<topic>.cre` to one of the target user's sessions.
//! - **Teardown**: `channel_close` from the client, an explicit
//!   [`BrokerChannel::close`], or the owning connection going away. Exactly
//!   one of these removes the entry; the hook's `on_close` fires once.
//!
//! The `.cre` reply is always queued on the connection mailbox before the
//! hook can obtain the channel handle, so the peer observes the channel id
//! before any `channel` frame on it.

use crate::registry::{ConnectionHandle, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use wsbus_core::{close_topic, Action, ActionFrame, Error, ErrorCode, Notice, Result};

/// Decides whether a `channel_start` on a topic is accepted
///
/// Returning a hook accepts the channel; `None` refuses it (the client gets
/// a `<topic>.cre` reply carrying a `FORBIDDEN` notice).
#[async_trait]
pub trait ChannelAcceptor: Send + Sync {
    async fn accept(&self, user_id: &str, topic: &str) -> Option<Arc<dyn ChannelHook>>;
}

/// Application-side consumer of one channel
///
/// All methods have no-op defaults; implementors override what they need.
/// Hooks run on worker tasks, never on the connection read loop.
#[async_trait]
pub trait ChannelHook: Send + Sync {
    /// The channel is open and the peer knows its id
    async fn on_open(&self, channel: BrokerChannel) {
        let _ = channel;
    }

    /// An in-channel payload arrived from the peer
    async fn on_payload(&self, channel: BrokerChannel, data: serde_json::Value) {
        let _ = (channel, data);
    }

    /// The channel ended; `reason` tells which terminal path fired
    async fn on_close(&self, channel_id: &str, reason: Notice) {
        let _ = (channel_id, reason);
    }
}

struct ChannelEntry {
    session: SessionId,
    topic: String,
    peer: Arc<ConnectionHandle>,
    hook: Arc<dyn ChannelHook>,
}

/// Table of live channels
pub struct ChannelTable {
    inner: RwLock<HashMap<String, ChannelEntry>>,
    counter: AtomicU64,
    weak_self: Weak<ChannelTable>,
}

impl ChannelTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        })
    }

    /// Register a new channel and return its id
    pub(crate) async fn open(
        &self,
        session: SessionId,
        topic: &str,
        peer: Arc<ConnectionHandle>,
        hook: Arc<dyn ChannelHook>,
    ) -> String {
        let id = format!("ch-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let entry = ChannelEntry {
            session,
            topic: topic.to_string(),
            peer,
            hook,
        };
        self.inner.write().await.insert(id.clone(), entry);
        tracing::debug!(channel_id = %id, topic, session, "channel opened");
        id
    }

    /// Handle for a live channel id
    pub(crate) async fn handle(&self, id: &str) -> Option<BrokerChannel> {
        let inner = self.inner.read().await;
        inner.get(id).map(|entry| BrokerChannel {
            id: id.to_string(),
            topic: entry.topic.clone(),
            peer: Arc::clone(&entry.peer),
            table: self.weak_self.clone(),
        })
    }

    /// Route an in-channel payload from `session` to the hook
    ///
    /// The id must exist and belong to the sending session; anything else is
    /// `NoSuchChannel`. The hook runs on its own task.
    pub(crate) async fn route_payload(
        &self,
        id: &str,
        session: SessionId,
        data: serde_json::Value,
    ) -> Result<()> {
        let (hook, channel) = {
            let inner = self.inner.read().await;
            let entry = inner
                .get(id)
                .filter(|entry| entry.session == session)
                .ok_or_else(|| Error::NoSuchChannel(id.to_string()))?;
            let channel = BrokerChannel {
                id: id.to_string(),
                topic: entry.topic.clone(),
                peer: Arc::clone(&entry.peer),
                table: self.weak_self.clone(),
            };
            (Arc::clone(&entry.hook), channel)
        };

        tokio::spawn(async move {
            hook.on_payload(channel, data).await;
        });
        Ok(())
    }

    /// Tear one channel down
    ///
    /// `notify_peer` pushes a `<id>.clo` notice to the owning connection;
    /// it is false when the teardown was requested by that very peer or the
    /// peer is already gone. Returns `NoSuchChannel` for unknown ids; for a
    /// close-by-session the id must belong to that session.
    pub(crate) async fn close(
        &self,
        id: &str,
        session: Option<SessionId>,
        reason: Notice,
        notify_peer: bool,
    ) -> Result<()> {
        let entry = {
            let mut inner = self.inner.write().await;
            match session {
                Some(owner) if inner.get(id).map(|e| e.session) != Some(owner) => {
                    return Err(Error::NoSuchChannel(id.to_string()));
                }
                _ => inner
                    .remove(id)
                    .ok_or_else(|| Error::NoSuchChannel(id.to_string()))?,
            }
        };

        tracing::debug!(channel_id = %id, reason = %reason.code, "channel closed");
        if notify_peer {
            // Tolerated as a no-op when the mailbox is already gone.
            let _ = entry.peer.send_notice(&close_topic(id), &reason);
        }

        let hook = entry.hook;
        let id = id.to_string();
        tokio::spawn(async move {
            hook.on_close(&id, reason).await;
        });
        Ok(())
    }

    /// Tear down every channel owned by a disconnecting session
    pub(crate) async fn close_for_session(&self, session: SessionId) {
        let removed: Vec<(String, ChannelEntry)> = {
            let mut inner = self.inner.write().await;
            let ids: Vec<String> = inner
                .iter()
                .filter(|(_, entry)| entry.session == session)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in removed {
            let reason = Notice::new(ErrorCode::PeerDisconnected, "connection closed");
            let hook = entry.hook;
            tokio::spawn(async move {
                hook.on_close(&id, reason).await;
            });
        }
    }

    /// Number of live channels
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Server-side handle for one live channel
///
/// Holds the peer's mailbox sender and a weak reference to the table; it is
/// a capability to talk on the channel, not an owner of broker state.
#[derive(Clone)]
pub struct BrokerChannel {
    id: String,
    topic: String,
    peer: Arc<ConnectionHandle>,
    table: Weak<ChannelTable>,
}

impl BrokerChannel {
    /// The broker-assigned channel id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The topic the channel was opened on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The user owning the peer connection
    pub fn user_id(&self) -> &str {
        &self.peer.user_id
    }

    /// Queue an in-channel payload to the peer
    ///
    /// # Errors
    ///
    /// `ChannelClosed` when the channel has been torn down,
    /// `ConnectionClosed` when the peer's mailbox is gone.
    pub async fn send(&self, data: serde_json::Value) -> Result<()> {
        let table = self.table.upgrade().ok_or(Error::ChannelClosed)?;
        if !table.inner.read().await.contains_key(&self.id) {
            return Err(Error::ChannelClosed);
        }
        self.peer
            .send_frame(&ActionFrame::with_data(Action::Channel, &self.id, data))
    }

    /// Close the channel, notifying the peer with `reason`
    ///
    /// Closing an already-closed channel returns `NoSuchChannel`.
    pub async fn close(&self, reason: Notice) -> Result<()> {
        let table = self.table.upgrade().ok_or(Error::ChannelClosed)?;
        table.close(&self.id, None, reason, true).await
    }

    /// Whether the channel is still registered
    pub async fn is_open(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.inner.read().await.contains_key(&self.id),
            None => false,
        }
    }
}
