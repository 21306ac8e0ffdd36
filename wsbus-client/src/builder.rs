//! Client configuration and builder
//!
//! The builder configures a [`BusClient`] before its first `connect()`:
//! server URL, initial bearer token, heartbeat period, handshake and
//! channel-create timeouts, verbose frame logging, the token refresher,
//! the `?er` handler, and the reconnect backoff.
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsbus_client::{BusClient, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> wsbus_core::Result<()> {
//! let client = BusClient::builder("ws://localhost:9100/ws", "T1")
//!     .heartbeat_interval(Duration::from_secs(15))
//!     .backoff(Box::new(ExponentialBackoff::default()))
//!     .build();
//!
//! client.connect().await?;
//! client
//!     .subscribe("user/+/msg", |data, topic| async move {
//!         println!("{topic}: {data}");
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::backoff::{BackoffStrategy, ExponentialBackoff};
use crate::client::{BusClient, ClientInner, ErrorFn};
use crate::state::ConnectionState;
use crate::subscription::SubscriptionRegistry;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use wsbus_core::Notice;

/// Supplies fresh bearer tokens when the broker reports expiry
///
/// Returning `None` (or an empty string) leaves the client Disconnected.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn refresh(&self) -> Option<String>;
}

/// Resolved client configuration
pub(crate) struct ClientConfig {
    pub(crate) url: String,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) channel_create_timeout: Duration,
    pub(crate) debug: bool,
    pub(crate) token_provider: Option<Arc<dyn TokenProvider>>,
    pub(crate) error_handler: Option<ErrorFn>,
}

/// Builder for configuring and creating a [`BusClient`]
pub struct ClientBuilder {
    url: String,
    token: String,
    heartbeat_interval: Duration,
    connect_timeout: Duration,
    channel_create_timeout: Duration,
    debug: bool,
    token_provider: Option<Arc<dyn TokenProvider>>,
    error_handler: Option<ErrorFn>,
    backoff: Box<dyn BackoffStrategy>,
}

impl ClientBuilder {
    /// Create a builder for `url` with the initial bearer token
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            channel_create_timeout: Duration::from_secs(3),
            debug: false,
            token_provider: None,
            error_handler: None,
            backoff: Box::new(ExponentialBackoff::default()),
        }
    }

    /// Ping period while Connected (default 30s)
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// How long to wait for the `connected` frame (default 30s)
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long to wait for a channel-create reply (default 3s)
    pub fn channel_create_timeout(mut self, timeout: Duration) -> Self {
        self.channel_create_timeout = timeout;
        self
    }

    /// Log every frame sent and received at debug level
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the refresher invoked on `TOKEN_EXPIRED`
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Set the handler invoked for every `?er` notice
    pub fn error_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Notice) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |notice| Box::pin(handler(notice))));
        self
    }

    /// Replace the reconnect backoff strategy
    pub fn backoff(mut self, backoff: Box<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build the client; call [`BusClient::connect`] to go online
    pub fn build(self) -> BusClient {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        BusClient {
            inner: Arc::new(ClientInner {
                config: ClientConfig {
                    url: self.url,
                    heartbeat_interval: self.heartbeat_interval,
                    connect_timeout: self.connect_timeout,
                    channel_create_timeout: self.channel_create_timeout,
                    debug: self.debug,
                    token_provider: self.token_provider,
                    error_handler: self.error_handler,
                },
                token: Mutex::new(self.token),
                state_tx,
                state_rx,
                sink: Arc::new(Mutex::new(None)),
                conn_gen: AtomicU64::new(0),
                manual_disconnect: AtomicBool::new(false),
                refreshing: AtomicBool::new(false),
                registry: SubscriptionRegistry::new(),
                channels: Mutex::new(HashMap::new()),
                hooks: Mutex::new(Vec::new()),
                pending_creates: Mutex::new(HashSet::new()),
                connect_waiter: Mutex::new(None),
                backoff: Mutex::new(self.backoff),
            }),
        }
    }
}
