//! Client lifecycle tests: connect confirmation timeout, idempotent
//! disconnect, and wire-frame accounting for subscriptions

mod common;

use common::{settle, start_broker};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use wsbus_broker::Broker;
use wsbus_client::{BusClient, ConnectionState};
use wsbus_core::Error;

#[tokio::test]
async fn test_connect_and_disconnect() {
    let (broker, url) = start_broker(Broker::builder()).await;

    let client = BusClient::builder(&url, "T1").build();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(broker.connection_count().await, 1);

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_from_any_state() {
    let (_broker, url) = start_broker(Broker::builder()).await;

    let client = BusClient::builder(&url, "T1").build();

    // Never connected: still completes
    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Connected, then twice more
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The manual flag clears on the next connect
    client.connect().await.unwrap();
    assert!(client.is_connected());
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_missing_connected_frame_times_out() {
    // A WebSocket endpoint that upgrades but never sends `connected`
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });

    let client = BusClient::builder(format!("ws://{addr}/"), "T1")
        .connect_timeout(Duration::from_millis(400))
        .build();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_dial_failure_is_an_error() {
    // Nothing listens here
    let client = BusClient::builder("ws://127.0.0.1:1/", "T1").build();
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, Error::WebSocket(_)));
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_one_wire_subscription_per_pattern() {
    let (broker, url) = start_broker(Broker::builder()).await;

    let client = BusClient::builder(&url, "T1").build();
    client.connect().await.unwrap();

    // Two callbacks, one pattern: the broker sees one subscription, local
    // dispatch fans out to both
    let (tx, mut rx) = tokio::sync::mpsc::channel::<&'static str>(8);
    let tx_a = tx.clone();
    let first = client
        .subscribe("feed/+", move |_, _| {
            let tx = tx_a.clone();
            async move {
                let _ = tx.send("a").await;
            }
        })
        .await
        .unwrap();
    let tx_b = tx.clone();
    let second = client
        .subscribe("feed/+", move |_, _| {
            let tx = tx_b.clone();
            async move {
                let _ = tx.send("b").await;
            }
        })
        .await
        .unwrap();
    settle().await;

    assert_eq!(broker.publish("feed/1", json!(1), None).await, 1);
    let mut seen = vec![
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap(),
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap(),
    ];
    seen.sort();
    assert_eq!(seen, vec!["a", "b"]);

    // Removing one callback keeps the wire subscription alive
    assert!(client.unsubscribe(first).await);
    settle().await;
    assert_eq!(broker.publish("feed/2", json!(2), None).await, 1);

    // Removing the last one sends the single unsubscribe frame
    assert!(client.unsubscribe(second).await);
    settle().await;
    assert_eq!(broker.publish("feed/3", json!(3), None).await, 0);
    assert!(client.subscriptions().await.is_empty());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_panicking_callback_does_not_kill_dispatch() {
    let (broker, url) = start_broker(Broker::builder()).await;

    let client = BusClient::builder(&url, "T1").build();
    client.connect().await.unwrap();

    client
        .subscribe("boom/#", |_, _| async {
            panic!("handler exploded");
        })
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<serde_json::Value>(4);
    client
        .subscribe("ok/#", move |data, _| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(data).await;
            }
        })
        .await
        .unwrap();
    settle().await;

    broker.publish("boom/1", json!(1), None).await;
    broker.publish("ok/1", json!("still alive"), None).await;

    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("dispatch must survive the panic")
        .unwrap();
    assert_eq!(got, json!("still alive"));
    assert!(client.is_connected());

    client.disconnect().await.unwrap();
}
