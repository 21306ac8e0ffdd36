//! End-to-end channel lifecycle tests: client-initiated open, echo traffic,
//! close from both sides, refusal, and server-initiated open

mod common;

use async_trait::async_trait;
use common::{settle, start_broker, wait_until};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use wsbus_broker::{Broker, BrokerChannel, ChannelAcceptor, ChannelHook};
use wsbus_client::BusClient;
use wsbus_core::{Error, ErrorCode, Notice};

/// Accepts channels on `echo/...` topics; echoes payloads; records events
struct EchoAcceptor {
    opened: Arc<Mutex<Option<BrokerChannel>>>,
    closed_tx: mpsc::Sender<Notice>,
}

struct EchoHook {
    opened: Arc<Mutex<Option<BrokerChannel>>>,
    closed_tx: mpsc::Sender<Notice>,
}

#[async_trait]
impl ChannelAcceptor for EchoAcceptor {
    async fn accept(&self, _user: &str, topic: &str) -> Option<Arc<dyn ChannelHook>> {
        topic.starts_with("echo/").then(|| {
            Arc::new(EchoHook {
                opened: Arc::clone(&self.opened),
                closed_tx: self.closed_tx.clone(),
            }) as Arc<dyn ChannelHook>
        })
    }
}

#[async_trait]
impl ChannelHook for EchoHook {
    async fn on_open(&self, channel: BrokerChannel) {
        *self.opened.lock().await = Some(channel);
    }

    async fn on_payload(&self, channel: BrokerChannel, data: serde_json::Value) {
        let _ = channel.send(json!({ "echo": data })).await;
    }

    async fn on_close(&self, _channel_id: &str, reason: Notice) {
        let _ = self.closed_tx.send(reason).await;
    }
}

fn echo_broker_builder(
) -> (wsbus_broker::BrokerBuilder, Arc<Mutex<Option<BrokerChannel>>>, mpsc::Receiver<Notice>) {
    let opened = Arc::new(Mutex::new(None));
    let (closed_tx, closed_rx) = mpsc::channel(4);
    let builder = Broker::builder().channel_acceptor(Arc::new(EchoAcceptor {
        opened: Arc::clone(&opened),
        closed_tx,
    }));
    (builder, opened, closed_rx)
}

#[tokio::test]
async fn test_channel_lifecycle_with_server_close() {
    let (builder, opened, _closed_rx) = echo_broker_builder();
    let (_broker, url) = start_broker(builder).await;

    let client = BusClient::builder(&url, "T1").build();
    client.connect().await.unwrap();

    let channel = client.create_channel("echo/room1").await.unwrap();
    assert!(channel.id().starts_with("ch-"));
    assert_eq!(channel.topic(), "echo/room1");

    let (msg_tx, mut msg_rx) = mpsc::channel::<serde_json::Value>(4);
    channel
        .on_message(move |data| {
            let tx = msg_tx.clone();
            async move {
                let _ = tx.send(data).await;
            }
        })
        .await;

    let (close_tx, mut close_rx) = mpsc::channel::<Notice>(4);
    channel
        .on_close(move |reason| {
            let tx = close_tx.clone();
            async move {
                let _ = tx.send(reason).await;
            }
        })
        .await;

    // Echo round trip
    channel.send(json!("hello")).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(2), msg_rx.recv())
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(echoed, json!({ "echo": "hello" }));

    // Server closes with a reason; client sees the close handler and wait()
    let server_side = opened.lock().await.clone().expect("hook saw the channel");
    server_side
        .close(Notice::new(ErrorCode::PeerClosed, ""))
        .await
        .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(2), close_rx.recv())
        .await
        .expect("close notice timed out")
        .unwrap();
    assert_eq!(reason.code, ErrorCode::PeerClosed);

    tokio::time::timeout(Duration::from_secs(2), channel.wait())
        .await
        .expect("wait() must fire");
    assert!(channel.is_closed());

    // The close handler fired exactly once
    assert!(tokio::time::timeout(Duration::from_millis(200), close_rx.recv())
        .await
        .is_err());

    // Send after teardown is an error, not a hang
    assert!(matches!(
        channel.send(json!("late")).await,
        Err(Error::ChannelClosed)
    ));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_client_close_reaches_server_hook() {
    let (builder, _opened, mut closed_rx) = echo_broker_builder();
    let (broker, url) = start_broker(builder).await;

    let client = BusClient::builder(&url, "T1").build();
    client.connect().await.unwrap();

    let channel = client.create_channel("echo/bye").await.unwrap();
    channel.close().await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(2), closed_rx.recv())
        .await
        .expect("server hook close timed out")
        .unwrap();
    assert_eq!(reason.code, ErrorCode::PeerClosed);

    tokio::time::timeout(Duration::from_secs(2), channel.wait())
        .await
        .expect("wait() must fire on local close");

    // Channel table is empty again
    assert!(
        wait_until(
            || async { broker.channel_count().await == 0 },
            Duration::from_secs(1)
        )
        .await
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_refused_channel_fails_create() {
    let (builder, _opened, _closed_rx) = echo_broker_builder();
    let (_broker, url) = start_broker(builder).await;

    let client = BusClient::builder(&url, "T1").build();
    client.connect().await.unwrap();

    // The acceptor only takes echo/ topics
    let err = client.create_channel("private/room").await.unwrap_err();
    match err {
        Error::Notice(notice) => assert_eq!(notice.code, ErrorCode::Forbidden),
        other => panic!("expected a refusal notice, got {other:?}"),
    }

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_create_times_out_without_acceptor_reply() {
    // No acceptor configured: the broker refuses immediately, so to test the
    // timeout we use an acceptor that never answers within the window.
    struct SlowAcceptor;

    #[async_trait]
    impl ChannelAcceptor for SlowAcceptor {
        async fn accept(&self, _user: &str, _topic: &str) -> Option<Arc<dyn ChannelHook>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            None
        }
    }

    let (_broker, url) =
        start_broker(Broker::builder().channel_acceptor(Arc::new(SlowAcceptor))).await;

    let client = BusClient::builder(&url, "T1")
        .channel_create_timeout(Duration::from_millis(400))
        .build();
    client.connect().await.unwrap();

    let err = client.create_channel("any/topic").await.unwrap_err();
    assert!(matches!(err, Error::Timeout));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_server_initiated_channel_reaches_hook() {
    let (builder, _opened, _closed_rx) = echo_broker_builder();
    let (broker, url) = start_broker(builder).await;

    let client = BusClient::builder(&url, "alice").build();
    client.connect().await.unwrap();

    let (chan_tx, mut chan_rx) = mpsc::channel::<wsbus_client::Channel>(2);
    client
        .on_channel("push/+", move |channel| {
            let tx = chan_tx.clone();
            async move {
                let _ = tx.send(channel).await;
            }
        })
        .await
        .unwrap();
    settle().await;

    // Server-side hook that records payloads coming back from the client
    struct RecordingHook {
        payload_tx: mpsc::Sender<serde_json::Value>,
    }

    #[async_trait]
    impl ChannelHook for RecordingHook {
        async fn on_payload(&self, _channel: BrokerChannel, data: serde_json::Value) {
            let _ = self.payload_tx.send(data).await;
        }
    }

    let (payload_tx, mut payload_rx) = mpsc::channel(4);
    let server_channel = broker
        .open_channel("alice", "push/alerts", Arc::new(RecordingHook { payload_tx }))
        .await
        .unwrap();

    let channel = tokio::time::timeout(Duration::from_secs(2), chan_rx.recv())
        .await
        .expect("hook should receive the channel")
        .unwrap();
    assert_eq!(channel.topic(), "push/alerts");
    assert_eq!(channel.id(), server_channel.id());

    // Client answers through the unsolicited channel
    channel.send(json!("ack")).await.unwrap();
    let got = tokio::time::timeout(Duration::from_secs(2), payload_rx.recv())
        .await
        .expect("server should receive the reply")
        .unwrap();
    assert_eq!(got, json!("ack"));

    client.disconnect().await.unwrap();
}
