//! Shared helpers for broker integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use wsbus_broker::{Broker, BrokerBuilder};

/// Bind the broker on an ephemeral port, run it, return it with its URL
///
/// The builder's authenticator default (accept any non-empty token, user id
/// = token) is what most tests want.
pub async fn start_broker(builder: BrokerBuilder) -> (Arc<Broker>, String) {
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let broker = builder.bind(addr).build().await.unwrap();
    let local = broker.local_addr().unwrap();

    let broker = Arc::new(broker);
    let runner = Arc::clone(&broker);
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    (broker, format!("ws://{local}/ws"))
}

/// Poll an async condition until it holds or the timeout expires
pub async fn wait_until<F, Fut>(mut cond: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Settle time for a frame to cross the local socket and be processed
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}
