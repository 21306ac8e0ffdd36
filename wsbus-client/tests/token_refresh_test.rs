//! Token-expiry recovery: `?dc TOKEN_EXPIRED` triggers refresh + reconnect

mod common;

use async_trait::async_trait;
use common::{settle, start_broker, wait_until};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wsbus_broker::{Authenticator, Broker};
use wsbus_client::{BusClient, ConnectionState, TokenProvider};
use wsbus_core::{Error, ErrorCode, Notice, Result};

/// Accepts a fixed set of tokens, all mapping to the same user
struct KnownTokens(Vec<&'static str>);

#[async_trait]
impl Authenticator for KnownTokens {
    async fn authenticate(&self, token: &str) -> Result<String> {
        if self.0.contains(&token) {
            Ok("alice".to_string())
        } else {
            Err(Error::Handshake("unknown token".to_string()))
        }
    }
}

struct Refresher {
    calls: Arc<AtomicUsize>,
    next: Option<&'static str>,
}

#[async_trait]
impl TokenProvider for Refresher {
    async fn refresh(&self) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.map(|token| token.to_string())
    }
}

#[tokio::test]
async fn test_expiry_refreshes_token_and_resubscribes() {
    let (broker, url) =
        start_broker(Broker::builder().authenticator(Arc::new(KnownTokens(vec!["T1", "T2"]))))
            .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let client = BusClient::builder(&url, "T1")
        .token_provider(Arc::new(Refresher {
            calls: Arc::clone(&calls),
            next: Some("T2"),
        }))
        .build();
    client.connect().await.unwrap();

    client.subscribe("a/+", |_, _| async {}).await.unwrap();
    settle().await;
    assert_eq!(broker.publish("a/x", json!(1), Some("alice")).await, 1);

    broker
        .disconnect_user("alice", Notice::new(ErrorCode::TokenExpired, "expired"))
        .await;

    assert!(
        wait_until(|| async { client.is_connected() && broker.connection_count().await == 1 },
            Duration::from_secs(3)
        )
        .await,
        "client should be back with the fresh token"
    );
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Resubscribed under the new session
    assert_eq!(broker.publish("a/x", json!(2), Some("alice")).await, 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_expiry_without_provider_stays_disconnected() {
    let (broker, url) =
        start_broker(Broker::builder().authenticator(Arc::new(KnownTokens(vec!["T1"])))).await;

    let client = BusClient::builder(&url, "T1").build();
    client.connect().await.unwrap();

    broker
        .disconnect_user("alice", Notice::new(ErrorCode::TokenExpired, "expired"))
        .await;

    assert!(
        wait_until(
            || async { client.state() == ConnectionState::Disconnected },
            Duration::from_secs(2)
        )
        .await
    );

    // No provider: no reconnect attempts happen
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(broker.connection_count().await, 0);
}

#[tokio::test]
async fn test_provider_returning_none_stays_disconnected() {
    let (broker, url) =
        start_broker(Broker::builder().authenticator(Arc::new(KnownTokens(vec!["T1"])))).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let client = BusClient::builder(&url, "T1")
        .token_provider(Arc::new(Refresher {
            calls: Arc::clone(&calls),
            next: None,
        }))
        .build();
    client.connect().await.unwrap();

    broker
        .disconnect_user("alice", Notice::new(ErrorCode::TokenExpired, "expired"))
        .await;

    assert!(
        wait_until(
            || async { calls.load(Ordering::SeqCst) == 1 },
            Duration::from_secs(2)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(broker.connection_count().await, 0);
}
