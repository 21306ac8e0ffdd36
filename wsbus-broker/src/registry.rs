//! Connection registry
//!
//! The broker reaches connections three ways: by session id, by user id, and
//! by subscription match during fan-out. All three views live inside one
//! `RwLock`'d structure, so a connection is reachable through every index or
//! through none, and index mutations are atomic. Subscription-set mutations
//! on one connection go through the same lock and are therefore linearizable.
//!
//! Socket writes never happen under the registry lock: lookups collect
//! [`ConnectionHandle`]s (mailbox senders), the guard is dropped, and frames
//! are queued afterwards. Queueing on the unbounded mailbox never blocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_tungstenite::tungstenite::Message;
use wsbus_core::{any_match, codec, Error, Notice, Result, TopicFrame, TOPIC_ERROR};

/// Broker-side session identifier, unique per connection
pub type SessionId = u64;

/// Handle for queueing outbound frames on one connection
///
/// Lightweight: a session id, the authenticated user, and the sender half of
/// the connection's mailbox. The mailbox is drained by a single writer task,
/// which is what serializes all outbound frames on the socket.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Session id assigned at upgrade
    pub id: SessionId,
    /// Authenticated user this session belongs to
    pub user_id: String,
    tx: mpsc::UnboundedSender<Message>,
    closer: Arc<Notify>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: SessionId, user_id: String, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            user_id,
            tx,
            closer: Arc::new(Notify::new()),
        }
    }

    /// Signal the read loop to stop; used by the heartbeat sweep
    pub(crate) fn request_close(&self) {
        self.closer.notify_one();
    }

    /// The notifier the read loop waits on
    pub(crate) fn close_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.closer)
    }

    /// Queue any serializable envelope
    ///
    /// Fails with `ConnectionClosed` when the writer task is gone; callers
    /// treat that as "peer already gone", never as a panic.
    pub fn send_frame<T: serde::Serialize>(&self, frame: &T) -> Result<()> {
        let text = codec::encode(frame)?;
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Queue a topic frame carrying a notice, e.g. on `?er`
    pub fn send_notice(&self, topic: &str, notice: &Notice) -> Result<()> {
        let data = serde_json::to_value(notice).map_err(|e| Error::Serialization(e.to_string()))?;
        self.send_frame(&TopicFrame::new(topic, data))
    }

    /// Queue an `?er` notice
    pub fn send_error(&self, notice: &Notice) -> Result<()> {
        self.send_notice(TOPIC_ERROR, notice)
    }

    /// Queue a raw WebSocket message (close frames)
    pub(crate) fn send_message(&self, msg: Message) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::ConnectionClosed)
    }
}

struct ConnEntry {
    handle: Arc<ConnectionHandle>,
    subscriptions: HashSet<String>,
    last_pong: Instant,
}

#[derive(Default)]
struct Inner {
    conns: HashMap<SessionId, ConnEntry>,
    by_user: HashMap<String, HashSet<SessionId>>,
}

/// The three-index connection registry
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in all indexes at once
    pub async fn insert(&self, handle: Arc<ConnectionHandle>) {
        let mut inner = self.inner.write().await;
        inner
            .by_user
            .entry(handle.user_id.clone())
            .or_default()
            .insert(handle.id);
        inner.conns.insert(
            handle.id,
            ConnEntry {
                handle,
                subscriptions: HashSet::new(),
                last_pong: Instant::now(),
            },
        );
    }

    /// Remove a connection from all indexes at once
    pub async fn remove(&self, id: SessionId) -> Option<Arc<ConnectionHandle>> {
        let mut inner = self.inner.write().await;
        let entry = inner.conns.remove(&id)?;
        if let Some(sessions) = inner.by_user.get_mut(&entry.handle.user_id) {
            sessions.remove(&id);
            if sessions.is_empty() {
                inner.by_user.remove(&entry.handle.user_id);
            }
        }
        Some(entry.handle)
    }

    /// Add a pattern to a connection's subscription set
    ///
    /// Returns false when the connection is unknown or the pattern was
    /// already present.
    pub async fn subscribe(&self, id: SessionId, pattern: impl Into<String>) -> bool {
        let mut inner = self.inner.write().await;
        match inner.conns.get_mut(&id) {
            Some(entry) => entry.subscriptions.insert(pattern.into()),
            None => false,
        }
    }

    /// Remove a pattern from a connection's subscription set
    pub async fn unsubscribe(&self, id: SessionId, pattern: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.conns.get_mut(&id) {
            Some(entry) => entry.subscriptions.remove(pattern),
            None => false,
        }
    }

    /// Refresh a connection's liveness timestamp (on `ping`)
    pub async fn touch(&self, id: SessionId) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.conns.get_mut(&id) {
            entry.last_pong = Instant::now();
        }
    }

    /// Sessions silent for longer than `timeout`, for the heartbeat sweep
    pub async fn stale(&self, timeout: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner
            .conns
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_pong) > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Handles of connections whose subscription set matches `topic`
    ///
    /// With `target_user` set, only that user's sessions are candidates.
    /// Handles are collected under the read lock; the caller sends after the
    /// guard is gone.
    pub async fn matching(
        &self,
        topic: &str,
        target_user: Option<&str>,
    ) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        let candidates: Vec<&ConnEntry> = match target_user {
            Some(user) => match inner.by_user.get(user) {
                Some(sessions) => sessions
                    .iter()
                    .filter_map(|id| inner.conns.get(id))
                    .collect(),
                None => Vec::new(),
            },
            None => inner.conns.values().collect(),
        };

        candidates
            .into_iter()
            .filter(|entry| any_match(&entry.subscriptions, topic))
            .map(|entry| Arc::clone(&entry.handle))
            .collect()
    }

    /// Fan a topic frame out to every matching connection
    ///
    /// Returns the number of sockets the frame was queued on. Handles are
    /// collected under the read lock and sends happen after it is released.
    pub(crate) async fn fan_out(&self, frame: TopicFrame, target_user: Option<&str>) -> usize {
        let handles = self.matching(&frame.topic, target_user).await;
        let mut sent = 0;
        for handle in handles {
            if handle.send_frame(&frame).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Handle of one session
    pub async fn get(&self, id: SessionId) -> Option<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner.conns.get(&id).map(|e| Arc::clone(&e.handle))
    }

    /// All sessions belonging to a user
    pub async fn user_sessions(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter_map(|id| inner.conns.get(id))
                    .map(|e| Arc::clone(&e.handle))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.inner.read().await.conns.len()
    }

    /// Whether no connection is registered
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.conns.is_empty()
    }
}
