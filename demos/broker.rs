//! Demo broker: accepts any token, echoes channels, publishes a clock
//!
//! Run with `cargo run --example broker`, then start the client demos.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use wsbus::broker::{AllowAll, Broker, BrokerChannel, ChannelAcceptor, ChannelHook};

struct EchoHook;

#[async_trait]
impl ChannelHook for EchoHook {
    async fn on_open(&self, channel: BrokerChannel) {
        println!(
            "channel {} opened on {} by {}",
            channel.id(),
            channel.topic(),
            channel.user_id()
        );
    }

    async fn on_payload(&self, channel: BrokerChannel, data: serde_json::Value) {
        let _ = channel.send(serde_json::json!({ "echo": data })).await;
    }

    async fn on_close(&self, channel_id: &str, reason: wsbus::core::Notice) {
        println!("channel {channel_id} closed: {reason}");
    }
}

struct EchoAcceptor;

#[async_trait]
impl ChannelAcceptor for EchoAcceptor {
    async fn accept(
        &self,
        user_id: &str,
        topic: &str,
    ) -> Option<Arc<dyn ChannelHook>> {
        println!("accepting channel on {topic} for {user_id}");
        Some(Arc::new(EchoHook))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr: std::net::SocketAddr = "127.0.0.1:9100".parse()?;
    let broker = Broker::builder()
        .bind(addr)
        .ping_timeout(Duration::from_secs(30))
        .authenticator(Arc::new(AllowAll))
        .channel_acceptor(Arc::new(EchoAcceptor))
        .build()
        .await?;

    println!("broker listening on ws://{addr}/ws");

    let broker = Arc::new(broker);
    let publisher = Arc::clone(&broker);
    tokio::spawn(async move {
        let mut seconds = 0u64;
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            seconds += 5;
            let sent = publisher
                .publish("system/clock", serde_json::json!({ "uptime": seconds }), None)
                .await;
            println!("clock tick delivered to {sent} subscriber(s)");
        }
    });

    broker.run().await?;
    Ok(())
}
