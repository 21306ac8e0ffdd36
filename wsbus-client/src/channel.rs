//! Client-side channel handles
//!
//! A [`Channel`] is the client's view of one server-assigned duplex stream.
//! It holds an opaque frame-sender capability, never the client itself, so
//! channels can outlive scopes without creating ownership cycles.
//!
//! # Teardown
//!
//! Exactly one of {local [`Channel::close`], peer close (`<id>.clo` or a
//! `channel_close` frame), peer disconnect, transport failure} terminates a
//! channel. Every terminal path funnels through one guarded teardown that:
//!
//! - removes the channel's internal subscriptions (`<id>`, `<id>.clo`,
//!   `<id>.err`),
//! - invokes the close handler at most once (remote reasons only),
//! - fires the [`Channel::wait`] signal exactly once.

use crate::client::{ClientInner, FrameSender};
use crate::subscription::{MessageFn, SubscriptionToken};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use wsbus_core::{Action, ActionFrame, Error, Notice, Result};

/// Close-handler callback type
pub(crate) type CloseFn =
    Arc<dyn Fn(Notice) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One duplex stream multiplexed over the client's socket
///
/// Obtained from [`crate::BusClient::create_channel`] or inside a
/// channel-open hook. Cheap to clone; all clones are the same channel.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .finish()
    }
}

pub(crate) struct ChannelInner {
    pub(crate) id: String,
    pub(crate) topic: String,
    sender: FrameSender,
    client: Weak<ClientInner>,
    pub(crate) tokens: Mutex<Vec<SubscriptionToken>>,
    pub(crate) handlers: Mutex<Vec<MessageFn>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    close_reason: Mutex<Option<Notice>>,
    on_close: Mutex<Option<CloseFn>>,
}

impl ChannelInner {
    pub(crate) fn new(
        id: String,
        topic: String,
        sender: FrameSender,
        client: Weak<ClientInner>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            topic,
            sender,
            client,
            tokens: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_tx,
            close_reason: Mutex::new(None),
            on_close: Mutex::new(None),
        }
    }

    /// The single terminal path; every way a channel can end lands here
    ///
    /// `reason` is `Some` for remote/transport endings and `None` for a
    /// local `close()`; the close handler only fires for the former.
    pub(crate) async fn teardown(&self, reason: Option<Notice>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(client) = self.client.upgrade() {
            let tokens: Vec<SubscriptionToken> =
                self.tokens.lock().await.drain(..).collect();
            for token in &tokens {
                client.registry.remove(token).await;
            }
            client.channels.lock().await.remove(&self.id);
        }

        *self.close_reason.lock().await = reason.clone();

        if let Some(reason) = reason {
            if let Some(handler) = self.on_close.lock().await.take() {
                let fut = handler(reason);
                tokio::spawn(crate::client::run_caught(fut, "channel close handler"));
            }
        }

        let _ = self.closed_tx.send_replace(true);
        tracing::debug!(channel_id = %self.id, "channel torn down");
    }
}

impl Channel {
    /// The server-assigned channel id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The topic the channel was opened on
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Whether the channel has ended
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The notice the channel ended with, if it ended remotely
    pub async fn close_reason(&self) -> Option<Notice> {
        self.inner.close_reason.lock().await.clone()
    }

    /// Send a payload on the channel
    ///
    /// # Errors
    ///
    /// `ChannelClosed` after teardown, `NotConnected` while the client is
    /// not in the Connected state.
    pub async fn send(&self, data: serde_json::Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        self.inner
            .sender
            .send_action(&ActionFrame::with_data(
                Action::Channel,
                &self.inner.id,
                data,
            ))
            .await
    }

    /// Register a handler for inbound payloads on this channel
    pub async fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: MessageFn = Arc::new(move |data, _topic| Box::pin(handler(data)));
        self.inner.handlers.lock().await.push(wrapped);
    }

    /// Register the close handler
    ///
    /// Invoked at most once, with the `{code, detail}` the channel ended
    /// with; it must be idempotent. Registering again replaces a handler
    /// that has not fired yet.
    pub async fn on_close<F, Fut>(&self, handler: F)
    where
        F: Fn(Notice) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: CloseFn = Arc::new(move |notice| Box::pin(handler(notice)));
        *self.inner.on_close.lock().await = Some(wrapped);
    }

    /// Close the channel from this side
    ///
    /// Sends `channel_close` when connected, then tears the local state
    /// down. Idempotent; closing a closed channel is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        // Best effort: the peer may already be gone, teardown happens
        // regardless.
        let _ = self
            .inner
            .sender
            .send_action(&ActionFrame::new(Action::ChannelClose, &self.inner.id))
            .await;

        self.inner.teardown(None).await;
        Ok(())
    }

    /// Wait until the channel ends, for any reason
    ///
    /// Completes immediately on an already-closed channel; completes exactly
    /// once per waiter.
    pub async fn wait(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        if *rx.borrow() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            if *rx.borrow() {
                return;
            }
        }
    }
}
