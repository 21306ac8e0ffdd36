//! The reconnecting pub/sub client
//!
//! [`BusClient`] mirrors the broker's protocol: it owns the subscription
//! registry across reconnects, sends heartbeats while Connected, dispatches
//! inbound frames to registered callbacks, multiplexes channels, and
//! refreshes its bearer token when the broker reports expiry.
//!
//! # Cloning
//!
//! The client is cheaply cloneable; all clones share one connection and one
//! subscription registry.
//!
//! # Dispatch
//!
//! Inbound action frames dispatch under a topic synthesized from the action
//! verb (so `connected`, `pong` and friends are observable by internal
//! subscribers); `channel` frames dispatch under their channel id; topic
//! frames dispatch under their topic. Every callback runs on its own task
//! with panics caught and logged, so a slow or crashing handler cannot
//! stall the read loop.

use crate::backoff::BackoffStrategy;
use crate::builder::{ClientBuilder, ClientConfig};
use crate::channel::{Channel, ChannelInner};
use crate::state::ConnectionState;
use crate::subscription::{MessageFn, SubscriptionRegistry, SubscriptionToken};
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use wsbus_core::{
    close_topic, codec, create_reply_topic, error_topic, Action, ActionFrame, CreateReply, Error,
    ErrorCode, Frame, Notice, Result, TopicFrame, TopicPattern, SUFFIX_CREATE, TOPIC_DISCONNECT,
    TOPIC_ERROR,
};

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Error-notice handler callback type
pub(crate) type ErrorFn =
    Arc<dyn Fn(Notice) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Channel-open hook callback type
pub(crate) type HookFn =
    Arc<dyn Fn(Channel) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Opaque capability to send action frames on the current socket
///
/// Channels hold this instead of the client itself, which keeps ownership
/// acyclic. Sends require the Connected state.
#[derive(Clone)]
pub(crate) struct FrameSender {
    sink: Arc<Mutex<Option<WsSink>>>,
    state: watch::Receiver<ConnectionState>,
}

impl FrameSender {
    pub(crate) async fn send_action(&self, frame: &ActionFrame) -> Result<()> {
        if !self.state.borrow().is_connected() {
            return Err(Error::NotConnected);
        }
        let text = codec::encode(frame)?;
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| Error::WebSocket(e.to_string())),
            None => Err(Error::NotConnected),
        }
    }
}

/// Run a handler future, catching and logging panics
pub(crate) async fn run_caught(fut: Pin<Box<dyn Future<Output = ()> + Send>>, what: &'static str) {
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        tracing::warn!(what, "handler panicked");
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) token: Mutex<String>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) state_rx: watch::Receiver<ConnectionState>,
    pub(crate) sink: Arc<Mutex<Option<WsSink>>>,
    pub(crate) conn_gen: AtomicU64,
    pub(crate) manual_disconnect: AtomicBool,
    pub(crate) refreshing: AtomicBool,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) channels: Mutex<HashMap<String, Channel>>,
    pub(crate) hooks: Mutex<Vec<(TopicPattern, HookFn)>>,
    pub(crate) pending_creates: Mutex<HashSet<String>>,
    pub(crate) connect_waiter: Mutex<Option<oneshot::Sender<Result<()>>>>,
    pub(crate) backoff: Mutex<Box<dyn BackoffStrategy>>,
}

impl ClientInner {
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state.clone());
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "state transition");
        }
    }

    pub(crate) fn frame_sender(&self) -> FrameSender {
        FrameSender {
            sink: Arc::clone(&self.sink),
            state: self.state_rx.clone(),
        }
    }

    /// Write one frame through the serialized sink
    pub(crate) async fn send_frame<T: serde::Serialize>(&self, frame: &T) -> Result<()> {
        let text = codec::encode(frame)?;
        if self.config.debug {
            tracing::debug!(frame = %text, "send");
        }
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| Error::WebSocket(e.to_string())),
            None => Err(Error::NotConnected),
        }
    }
}

/// WebSocket pub/sub client
///
/// Built via [`BusClient::builder`]; see the crate docs for the full
/// lifecycle. All methods are safe to call from any task.
#[derive(Clone)]
pub struct BusClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl BusClient {
    /// Create a builder for a client talking to `url` with an initial token
    pub fn builder(url: impl Into<String>, token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url, token)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state_rx.borrow().clone()
    }

    /// Whether the client is in the Connected state
    pub fn is_connected(&self) -> bool {
        self.inner.state_rx.borrow().is_connected()
    }

    /// Connect and wait for the broker's `connected` confirmation
    ///
    /// Clears the manual-disconnect flag, so automatic reconnection is armed
    /// again after a prior [`BusClient::disconnect`].
    ///
    /// # Errors
    ///
    /// `WebSocket` when dialing fails, `Timeout` when no `connected` frame
    /// arrives within the connect timeout, `Notice` when the broker answers
    /// with an `?er` during the handshake window.
    pub async fn connect(&self) -> Result<()> {
        self.inner.manual_disconnect.store(false, Ordering::SeqCst);
        if self.inner.state_rx.borrow().is_connected() {
            return Ok(());
        }
        establish(&self.inner).await
    }

    /// Disconnect and suppress reconnection
    ///
    /// Idempotent from any state. Completes after the close frame is
    /// written and the socket is closed; live channels are torn down first.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.manual_disconnect.store(true, Ordering::SeqCst);
        teardown_all_channels(
            &self.inner,
            Notice::new(ErrorCode::PeerDisconnected, "client disconnected"),
        )
        .await;
        close_socket(&self.inner).await;
        self.inner.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Register a callback for every message matching `pattern`
    ///
    /// One `subscribe` frame goes to the broker when this is the first
    /// callback for the pattern; additional callbacks are purely local. The
    /// returned token is the only way to remove this callback again.
    pub async fn subscribe<F, Fut>(&self, pattern: &str, callback: F) -> Result<SubscriptionToken>
    where
        F: Fn(serde_json::Value, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: MessageFn = Arc::new(move |data, topic| Box::pin(callback(data, topic)));
        let (token, first) = self.inner.registry.add(pattern, wrapped, false).await?;

        if first && self.is_connected() {
            // Failure here is tolerable: the pattern is in the registry and
            // resubscribe-on-reconnect will replay it.
            if let Err(e) = self
                .inner
                .send_frame(&ActionFrame::new(Action::Subscribe, pattern))
                .await
            {
                tracing::warn!(pattern, error = %e, "subscribe frame not sent");
            }
        }
        Ok(token)
    }

    /// Remove the callback a token refers to
    ///
    /// One `unsubscribe` frame goes to the broker when the last callback
    /// for the pattern is removed. A stale token has no effect and returns
    /// false.
    pub async fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let (removed, last) = self.inner.registry.remove(&token).await;
        if last && self.is_connected() {
            let _ = self
                .inner
                .send_frame(&ActionFrame::new(Action::Unsubscribe, token.pattern()))
                .await;
        }
        removed
    }

    /// Remove every callback registered for `pattern`
    pub async fn unsubscribe_all(&self, pattern: &str) -> bool {
        let had_external = self.inner.registry.remove_all(pattern).await;
        if had_external && self.is_connected() {
            let _ = self
                .inner
                .send_frame(&ActionFrame::new(Action::Unsubscribe, pattern))
                .await;
        }
        had_external
    }

    /// Patterns currently subscribed
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.registry.external_patterns().await
    }

    /// Publish `data` on a concrete topic (the `msg` action)
    ///
    /// Subject to the broker's authorization; a denial comes back as a
    /// `?er` notice, not as an error from this call.
    pub async fn publish(&self, topic: &str, data: serde_json::Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner
            .send_frame(&ActionFrame::with_data(Action::Msg, topic, data))
            .await
    }

    /// Open a channel on `topic`
    ///
    /// Sends `channel_start` and waits for the `<topic>.cre` reply (3s by
    /// default).
    ///
    /// # Errors
    ///
    /// `NotConnected` outside the Connected state, `Timeout` when no reply
    /// arrives, `Notice` when the broker refuses.
    pub async fn create_channel(&self, topic: &str) -> Result<Channel> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let reply_topic = create_reply_topic(topic);
        inner.pending_creates.lock().await.insert(topic.to_string());

        let (tx, rx) = oneshot::channel::<CreateReply>();
        let slot = Arc::new(std::sync::Mutex::new(Some(tx)));
        let reply_cb: MessageFn = Arc::new(move |data, _topic| {
            if let Ok(mut slot) = slot.lock() {
                if let Some(tx) = slot.take() {
                    if let Ok(reply) = serde_json::from_value::<CreateReply>(data) {
                        let _ = tx.send(reply);
                    }
                }
            }
            Box::pin(async {})
        });
        let (token, _) = inner.registry.add(&reply_topic, reply_cb, true).await?;

        let result = match inner
            .send_frame(&ActionFrame::new(Action::ChannelStart, topic))
            .await
        {
            Err(e) => Err(e),
            Ok(()) => match tokio::time::timeout(inner.config.channel_create_timeout, rx).await {
                Err(_) => Err(Error::Timeout),
                Ok(Err(_)) => Err(Error::ConnectionClosed),
                Ok(Ok(reply)) => Ok(reply),
            },
        };

        inner.registry.remove(&token).await;
        inner.pending_creates.lock().await.remove(topic);

        let reply = result?;
        if let Some(error) = reply.error {
            return Err(Error::Notice(error));
        }
        let id = reply
            .channel_id
            .ok_or_else(|| Error::BadFrame("create reply carries neither id nor error".into()))?;

        Ok(install_channel(inner, &id, topic).await)
    }

    /// Register a channel-open hook for server-initiated channels
    ///
    /// When a `<topic>.cre` announcement arrives for a topic matching
    /// `pattern` (and no local create is pending on it), the hook receives
    /// the ready [`Channel`]. The first matching hook wins.
    pub async fn on_channel<F, Fut>(&self, pattern: &str, hook: F) -> Result<()>
    where
        F: Fn(Channel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let parsed =
            TopicPattern::parse(pattern).map_err(|e| Error::InvalidTopic(e.to_string()))?;
        let wrapped: HookFn = Arc::new(move |channel| Box::pin(hook(channel)));
        self.inner.hooks.lock().await.push((parsed, wrapped));
        Ok(())
    }
}

/// Dial, install the socket, and wait for `connected`
pub(crate) async fn establish(inner: &Arc<ClientInner>) -> Result<()> {
    // Bump the generation before anything else: stale read loops compare
    // against it and stand down instead of touching this attempt's state.
    let gen = inner.conn_gen.fetch_add(1, Ordering::SeqCst) + 1;
    inner.set_state(ConnectionState::Connecting);

    let token = inner.token.lock().await.clone();
    let separator = if inner.config.url.contains('?') { '&' } else { '?' };
    let url = format!("{}{}token={}", inner.config.url, separator, token);

    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            inner.set_state(ConnectionState::Error);
            return Err(Error::WebSocket(e.to_string()));
        }
    };

    let (sink, stream) = ws_stream.split();
    *inner.sink.lock().await = Some(sink);

    let (tx, rx) = oneshot::channel();
    *inner.connect_waiter.lock().await = Some(tx);

    tokio::spawn(read_loop(Arc::clone(inner), stream, gen));

    match tokio::time::timeout(inner.config.connect_timeout, rx).await {
        Ok(Ok(Ok(()))) => {
            if inner.manual_disconnect.load(Ordering::SeqCst) {
                // disconnect() raced with this attempt and wins
                close_socket(inner).await;
                inner.set_state(ConnectionState::Disconnected);
                return Err(Error::NotConnected);
            }
            tokio::spawn(heartbeat_loop(Arc::clone(inner), gen));
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            close_socket(inner).await;
            inner.set_state(ConnectionState::Error);
            Err(e)
        }
        Ok(Err(_)) => {
            // Read loop died before confirmation
            inner.set_state(ConnectionState::Error);
            Err(Error::ConnectionClosed)
        }
        Err(_) => {
            close_socket(inner).await;
            inner.set_state(ConnectionState::Error);
            Err(Error::Timeout)
        }
    }
}

async fn read_loop(inner: Arc<ClientInner>, mut stream: WsStream, gen: u64) {
    while let Some(message) = stream.next().await {
        if inner.conn_gen.load(Ordering::SeqCst) != gen {
            // A newer connection owns the client state now
            return;
        }
        match message {
            Ok(Message::Text(text)) => handle_text(&inner, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "read error");
                break;
            }
        }
    }
    on_socket_down(&inner, gen).await;
}

async fn on_socket_down(inner: &Arc<ClientInner>, gen: u64) {
    if inner.conn_gen.load(Ordering::SeqCst) != gen {
        return;
    }
    *inner.sink.lock().await = None;

    // Transport failure is a terminal path for every live channel
    teardown_all_channels(inner, Notice::new(ErrorCode::PeerDisconnected, "connection lost")).await;

    let state = inner.state_rx.borrow().clone();
    match state {
        ConnectionState::Connecting => {
            if let Some(tx) = inner.connect_waiter.lock().await.take() {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
        }
        ConnectionState::Connected => {
            inner.set_state(ConnectionState::Disconnected);
            let manual = inner.manual_disconnect.load(Ordering::SeqCst);
            let refreshing = inner.refreshing.load(Ordering::SeqCst);
            if !manual && !refreshing {
                tokio::spawn(reconnect_loop(Arc::clone(inner)));
            }
        }
        _ => {}
    }
    tracing::debug!("socket down");
}

fn reconnect_loop(inner: Arc<ClientInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
    let mut attempt: u32 = 0;
    loop {
        if inner.manual_disconnect.load(Ordering::SeqCst)
            || inner.refreshing.load(Ordering::SeqCst)
        {
            return;
        }
        let delay = inner.backoff.lock().await.next_delay();
        attempt += 1;
        inner.set_state(ConnectionState::Reconnecting { attempt });
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::time::sleep(delay).await;

        if inner.manual_disconnect.load(Ordering::SeqCst)
            || inner.refreshing.load(Ordering::SeqCst)
        {
            inner.set_state(ConnectionState::Disconnected);
            return;
        }
        match establish(&inner).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
    })
}

async fn heartbeat_loop(inner: Arc<ClientInner>, gen: u64) {
    loop {
        tokio::time::sleep(inner.config.heartbeat_interval).await;
        if inner.conn_gen.load(Ordering::SeqCst) != gen
            || !inner.state_rx.borrow().is_connected()
        {
            return;
        }
        if inner
            .send_frame(&ActionFrame::new(Action::Ping, ""))
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn close_socket(inner: &Arc<ClientInner>) {
    let sink = inner.sink.lock().await.take();
    if let Some(mut sink) = sink {
        // Normal closure; send-after-close downstream is a tolerated no-op
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
    }
}

async fn teardown_all_channels(inner: &Arc<ClientInner>, reason: Notice) {
    let channels: Vec<Channel> = inner.channels.lock().await.values().cloned().collect();
    for channel in channels {
        channel.inner.teardown(Some(reason.clone())).await;
    }
}

/// Handle one inbound text envelope
async fn handle_text(inner: &Arc<ClientInner>, text: &str) {
    if inner.config.debug {
        tracing::debug!(frame = text, "recv");
    }
    let frame = match codec::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring undecodable frame");
            return;
        }
    };

    match frame {
        Frame::Action(frame) => {
            let data = frame.data.unwrap_or(serde_json::Value::Null);
            match frame.action {
                Action::Connected => {
                    on_connected(inner).await;
                    dispatch(inner, Action::Connected.as_str(), data).await;
                }
                // In-channel payloads dispatch under the channel id so the
                // channel's own subscription receives them
                Action::Channel => dispatch(inner, &frame.topic, data).await,
                Action::ChannelClose => {
                    let channel = inner.channels.lock().await.get(&frame.topic).cloned();
                    if let Some(channel) = channel {
                        channel
                            .inner
                            .teardown(Some(Notice::new(ErrorCode::PeerClosed, "")))
                            .await;
                    }
                }
                other => dispatch(inner, other.as_str(), data).await,
            }
        }
        Frame::Topic(frame) => handle_topic(inner, frame).await,
    }
}

async fn handle_topic(inner: &Arc<ClientInner>, frame: TopicFrame) {
    let topic = frame.topic.clone();

    if topic == TOPIC_DISCONNECT {
        if let Ok(notice) = serde_json::from_value::<Notice>(frame.data.clone()) {
            tracing::info!(code = %notice.code, detail = %notice.detail, "disconnect notice");
            if notice.code == ErrorCode::TokenExpired {
                begin_refresh(inner);
            }
        }
    } else if topic == TOPIC_ERROR {
        if let Ok(notice) = serde_json::from_value::<Notice>(frame.data.clone()) {
            tracing::warn!(code = %notice.code, detail = %notice.detail, "error notice");
            if let Some(handler) = &inner.config.error_handler {
                let fut = handler(notice.clone());
                tokio::spawn(run_caught(fut, "error handler"));
            }
            if *inner.state_rx.borrow() == ConnectionState::Connecting {
                if let Some(tx) = inner.connect_waiter.lock().await.take() {
                    let _ = tx.send(Err(Error::Notice(notice.clone())));
                }
                if notice.code == ErrorCode::TokenExpired {
                    begin_refresh(inner);
                }
            }
        }
    } else if let Some(base) = topic.strip_suffix(SUFFIX_CREATE) {
        maybe_open_hook_channel(inner, base, &frame.data).await;
    }

    dispatch(inner, &topic, frame.data).await;
}

/// Server-initiated channel announcement, unless a local create is pending
async fn maybe_open_hook_channel(inner: &Arc<ClientInner>, base: &str, data: &serde_json::Value) {
    if inner.pending_creates.lock().await.contains(base) {
        return;
    }
    let Ok(reply) = serde_json::from_value::<CreateReply>(data.clone()) else {
        return;
    };
    let Some(id) = reply.channel_id else {
        return;
    };

    let hook = {
        let hooks = inner.hooks.lock().await;
        hooks
            .iter()
            .find(|(pattern, _)| pattern.matches(base))
            .map(|(_, hook)| Arc::clone(hook))
    };
    let Some(hook) = hook else {
        tracing::debug!(topic = base, channel_id = %id, "no hook for unsolicited channel");
        return;
    };

    let channel = install_channel(inner, &id, base).await;
    let fut = hook(channel);
    tokio::spawn(run_caught(fut, "channel open hook"));
}

async fn on_connected(inner: &Arc<ClientInner>) {
    inner.set_state(ConnectionState::Connected);
    inner.backoff.lock().await.reset();

    // Replay the whole external registry: one subscribe frame per pattern
    for pattern in inner.registry.external_patterns().await {
        if let Err(e) = inner
            .send_frame(&ActionFrame::new(Action::Subscribe, pattern.as_str()))
            .await
        {
            tracing::warn!(pattern = %pattern, error = %e, "resubscribe failed");
            break;
        }
    }

    if let Some(tx) = inner.connect_waiter.lock().await.take() {
        let _ = tx.send(Ok(()));
    }
    tracing::info!("connected");
}

/// Fan one message out to every matching callback, each on its own task
async fn dispatch(inner: &Arc<ClientInner>, topic: &str, data: serde_json::Value) {
    let callbacks = inner.registry.matching(topic).await;
    for callback in callbacks {
        let fut = callback(data.clone(), topic.to_string());
        tokio::spawn(run_caught(fut, "subscriber callback"));
    }
}

/// Start token-expiry recovery
///
/// The flag is raised on the read loop itself, before the close frame that
/// usually follows a `?dc` gets processed, so the ordinary reconnect path
/// stands down while the refresh owns the connection.
fn begin_refresh(inner: &Arc<ClientInner>) {
    if inner.refreshing.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(run_refresh(Arc::clone(inner)));
}

/// Token-expiry recovery: drop the socket, refresh, reconnect
async fn run_refresh(inner: Arc<ClientInner>) {
    tracing::info!("token expired; attempting refresh");

    close_socket(&inner).await;
    teardown_all_channels(
        &inner,
        Notice::new(ErrorCode::TokenExpired, "token expired"),
    )
    .await;
    inner.set_state(ConnectionState::Disconnected);

    let fresh = match &inner.config.token_provider {
        Some(provider) => provider.refresh().await,
        None => None,
    };

    match fresh.filter(|token| !token.is_empty()) {
        Some(token) => {
            *inner.token.lock().await = token;
            if let Err(e) = establish(&inner).await {
                tracing::warn!(error = %e, "reconnect with refreshed token failed");
            }
        }
        None => {
            tracing::warn!("no refreshed token available; staying disconnected");
        }
    }
    inner.refreshing.store(false, Ordering::SeqCst);
}

/// Wire a [`Channel`] into the registries
///
/// Registers the three internal subscriptions (`<id>` payloads, `<id>.clo`
/// teardown, `<id>.err` logging) and records the channel for
/// disconnect-time teardown.
pub(crate) async fn install_channel(inner: &Arc<ClientInner>, id: &str, topic: &str) -> Channel {
    let chan = Arc::new(ChannelInner::new(
        id.to_string(),
        topic.to_string(),
        inner.frame_sender(),
        Arc::downgrade(inner),
    ));
    let channel = Channel {
        inner: Arc::clone(&chan),
    };

    let payload = Arc::clone(&chan);
    let payload_cb: MessageFn = Arc::new(move |data, _topic| {
        let chan = Arc::clone(&payload);
        Box::pin(async move {
            let handlers: Vec<MessageFn> =
                chan.handlers.lock().await.iter().cloned().collect();
            for handler in handlers {
                handler(data.clone(), chan.id.clone()).await;
            }
        })
    });

    let closing = Arc::clone(&chan);
    let close_cb: MessageFn = Arc::new(move |data, _topic| {
        let chan = Arc::clone(&closing);
        Box::pin(async move {
            let notice = serde_json::from_value::<Notice>(data)
                .unwrap_or_else(|_| Notice::new(ErrorCode::PeerClosed, ""));
            chan.teardown(Some(notice)).await;
        })
    });

    let error_id = id.to_string();
    let error_cb: MessageFn = Arc::new(move |data, _topic| {
        let channel_id = error_id.clone();
        Box::pin(async move {
            match serde_json::from_value::<Notice>(data) {
                Ok(notice) => tracing::warn!(
                    channel_id = %channel_id,
                    code = %notice.code,
                    detail = %notice.detail,
                    "channel error"
                ),
                Err(_) => tracing::warn!(channel_id = %channel_id, "channel error"),
            }
        })
    });

    let subs = [
        (id.to_string(), payload_cb),
        (close_topic(id), close_cb),
        (error_topic(id), error_cb),
    ];
    let mut tokens = Vec::new();
    for (pattern, callback) in subs {
        if let Ok((token, _)) = inner.registry.add(&pattern, callback, true).await {
            tokens.push(token);
        }
    }
    *chan.tokens.lock().await = tokens;

    inner
        .channels
        .lock()
        .await
        .insert(id.to_string(), channel.clone());
    channel
}
