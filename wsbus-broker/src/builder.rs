//! Broker configuration and builder
//!
//! The builder provides a fluent API for configuring and creating a
//! [`crate::Broker`]: bind address, WebSocket endpoint path, origin
//! allow-list, heartbeat timing, and the collaborator implementations
//! (authenticator, authorizer, rule store, channel acceptor).
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsbus_broker::{AllowAll, Broker};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> wsbus_core::Result<()> {
//! let addr: std::net::SocketAddr = "127.0.0.1:9100".parse().unwrap();
//! let broker = Broker::builder()
//!     .bind(addr)
//!     .allow_origin("https://app.example.com")
//!     .ping_timeout(Duration::from_secs(30))
//!     .authenticator(Arc::new(AllowAll))
//!     .build()
//!     .await?;
//! broker.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::acl::AclCache;
use crate::auth::{AllowAll, Authenticator, Authorizer, RuleStore};
use crate::channel::{ChannelAcceptor, ChannelTable};
use crate::registry::Registry;
use crate::{Broker, SharedState};
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use wsbus_core::{Error, Result};

/// Static configuration of a broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// WebSocket endpoint path
    pub path: String,
    /// Exact-match origin allow-list; empty allows all (logged as a warning)
    pub allow_origins: Vec<String>,
    /// Advisory read buffer size; the transport manages its own read buffer
    pub read_buffer_size: Option<usize>,
    /// Write buffer size handed to the WebSocket upgrader
    pub write_buffer_size: Option<usize>,
    /// Maximum silence before the sweep removes a connection
    pub ping_timeout: Duration,
    /// Sweep period override; defaults to `max(10s, ping_timeout / 2)`
    pub sweep_interval: Option<Duration>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            allow_origins: Vec::new(),
            read_buffer_size: None,
            write_buffer_size: None,
            ping_timeout: Duration::from_secs(60),
            sweep_interval: None,
        }
    }
}

impl BrokerConfig {
    /// Effective period of the heartbeat sweep task
    pub fn sweep_period(&self) -> Duration {
        self.sweep_interval
            .unwrap_or_else(|| std::cmp::max(Duration::from_secs(10), self.ping_timeout / 2))
    }
}

/// Builder for constructing a broker
pub struct BrokerBuilder {
    addr: Option<SocketAddr>,
    config: BrokerConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    acceptor: Option<Arc<dyn ChannelAcceptor>>,
}

impl BrokerBuilder {
    /// Create a new broker builder
    pub fn new() -> Self {
        Self {
            addr: None,
            config: BrokerConfig::default(),
            authenticator: None,
            authorizer: None,
            rule_store: None,
            acceptor: None,
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Set the bind address from a string (e.g., "127.0.0.1:9100")
    pub fn bind_str(mut self, addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid address: {e}")))?;
        self.addr = Some(addr);
        Ok(self)
    }

    /// Set the WebSocket endpoint path (default `/ws`)
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Add one origin to the allow-list
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.allow_origins.push(origin.into());
        self
    }

    /// Replace the whole origin allow-list
    pub fn allow_origins(mut self, origins: Vec<String>) -> Self {
        self.config.allow_origins = origins;
        self
    }

    /// Set the heartbeat timeout
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Override the sweep period; mainly for tests with short timeouts
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = Some(interval);
        self
    }

    /// Set the upgrader buffer sizes
    pub fn buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.config.read_buffer_size = Some(read);
        self.config.write_buffer_size = Some(write);
        self
    }

    /// Set the authenticator consulted at upgrade
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Set the authorizer consulted for permission checks
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Set the ACL rule store; enables authorization enforcement
    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.rule_store = Some(store);
        self
    }

    /// Set the acceptor deciding client-initiated `channel_start` requests
    pub fn channel_acceptor(mut self, acceptor: Arc<dyn ChannelAcceptor>) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    /// Bind the listener and build the broker
    ///
    /// # Errors
    ///
    /// - `Config` when no bind address was set, or a rule store was given
    ///   without an authorizer
    /// - `Io` when binding the listener fails
    pub async fn build(self) -> Result<Broker> {
        let addr = self
            .addr
            .ok_or_else(|| Error::Config("no bind address configured".to_string()))?;

        if self.config.allow_origins.is_empty() {
            tracing::warn!("origin allow-list is empty; all origins will be accepted");
        }
        if self.config.read_buffer_size.is_some() {
            tracing::debug!("read_buffer_size is advisory; the transport manages its read buffer");
        }

        let authenticator = match self.authenticator {
            Some(authenticator) => authenticator,
            None => {
                tracing::warn!("no authenticator configured; any non-empty token is accepted");
                Arc::new(AllowAll)
            }
        };

        let authz = match (self.rule_store, self.authorizer) {
            (Some(store), Some(authorizer)) => Some(AclCache::new(store, authorizer)),
            (Some(_), None) => {
                return Err(Error::Config(
                    "rule store configured without an authorizer".to_string(),
                ));
            }
            (None, _) => None,
        };
        if authz.is_none() {
            tracing::warn!("no rule store configured; msg and channel_start are unrestricted");
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(e.to_string()))?;

        let (sweep_shutdown, sweep_shutdown_rx) = watch::channel(false);

        Ok(Broker {
            listener,
            state: Arc::new(SharedState {
                registry: Registry::new(),
                channels: ChannelTable::new(),
                authz,
                authenticator,
                acceptor: self.acceptor,
                config: self.config,
                session_counter: AtomicU64::new(1),
            }),
            sweep_shutdown,
            sweep_shutdown_rx,
        })
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
