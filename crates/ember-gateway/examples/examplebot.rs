//! Minimal bot: one shard, logged events, a member lookup on demand.
//!
//! Run with `EMBER_TOKEN=... cargo run --example examplebot`.

use std::sync::Arc;

use ember_core::Intents;
use ember_gateway::{
    EventSink, GatewayConfig, InMemoryMemberCache, Shard, WebSocketTransport,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

struct LoggingSink;

impl EventSink for LoggingSink {
    fn handle(&self, event_type: &str, sequence: u64, shard_id: u32, _payload: &Value) {
        tracing::info!(event_type, sequence, shard = shard_id, "event received");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let token = std::env::var("EMBER_TOKEN")?;
    let config = GatewayConfig::new(token)
        .with_intents(Intents::UNPRIVILEGED | Intents::GUILD_MEMBERS);

    let shard = Shard::new(
        config,
        Arc::new(WebSocketTransport),
        Arc::new(LoggingSink),
        Arc::new(InMemoryMemberCache::new()),
    );

    shard.open().await?;
    tracing::info!("connected, press ctrl-c to exit");

    tokio::signal::ctrl_c().await?;
    shard.close().await;
    Ok(())
}
