//! Chat client entry point
//!
//! Run with:
//! ```bash
//! CHAT_TOKEN=... cargo run -p chat-client
//! ```
//!
//! Configuration is loaded from environment variables; `CHAT_LOG_FORMAT=json`
//! switches to JSON logs.

use anyhow::Context;
use chat_client::Client;
use chat_common::{try_init_tracing_with_config, TracingConfig};
use chat_gateway::{Event, ShardEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = try_init_tracing_with_config(TracingConfig::from_env()) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Client failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let client = Client::from_env().context("Failed to load configuration")?;
    let mut events = client.events();

    client.connect().await.context("Failed to connect")?;
    info!("Connecting shards...");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn log_event(event: &ShardEvent) {
    let shard_id = event.shard_id;
    match &event.event {
        Event::Ready => info!(shard_id, "Shard ready"),
        Event::Resumed => info!(shard_id, "Shard resumed"),
        Event::Disconnect {
            code, reconnect, ..
        } => info!(shard_id, code = ?code, reconnect, "Shard disconnected"),
        Event::Dispatch(dispatch) => debug!(
            shard_id,
            event = %dispatch.name,
            sequence = ?dispatch.sequence,
            "Dispatch"
        ),
        // Already logged by the shard
        Event::Warn(_) | Event::Error(_) | Event::Debug(_) => {}
        other => debug!(shard_id, event = ?other, "Shard event"),
    }
}
