//! Demo pub/sub client: subscribe to the clock and chat, publish a message
//!
//! Start the broker demo first, then `cargo run --example pubsub_client`.

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

    let client = BusClient::builder("ws://127.0.0.1:9100/ws", "demo-user")
        .heartbeat_interval(Duration::from_secs(10))
        .build();
    client.connect().await?;
    println!("connected, state: {}", client.state());

    client
        .subscribe("system/#", |data, topic| async move {
            println!("[{topic}] {data}");
        })
        .await?;

    client
        .subscribe("chat/+", |data, topic| async move {
            println!("[{topic}] {data}");
        })
        .await?;

    client
        .publish("chat/lobby", serde_json::json!({ "body": "hello from the demo" }))
        .await?;

    println!("listening for 30 seconds...");
    tokio::time::sleep(Duration::from_secs(30)).await;

    client.disconnect().await?;
    Ok(())
}
