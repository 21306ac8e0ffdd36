//! Demo channel client: open a channel against the echo broker
//!
//! Start the broker demo first, then `cargo run --example channel_echo`.

use std::time::Duration;
use wsbus::BusClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let client = BusClient::builder("ws://127.0.0.1:9100/ws", "channel-demo").build();
    client.connect().await?;

    let channel = client.create_channel("echo/session").await?;
    println!("channel {} open on {}", channel.id(), channel.topic());

    channel
        .on_message(|data| async move {
            println!("received: {data}");
        })
        .await;
    channel
        .on_close(|reason| async move {
            println!("channel closed: {reason}");
        })
        .await;

    for i in 0..3 {
        channel.send(serde_json::json!({ "seq": i })).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    channel.close().await?;
    channel.wait().await;

    client.disconnect().await?;
    Ok(())
}
