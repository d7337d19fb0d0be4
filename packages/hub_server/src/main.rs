use anyhow::{Context, Result};
use channel_hub::ShardedDispatcher;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;

use hub_server::config::HubConfig;
use hub_server::metrics::ServerMetrics;
use hub_server::presence::PresenceTracker;
use hub_server::{AppState, build_router};

#[derive(Parser)]
#[command(name = "hubd")]
#[command(about = "Pub/sub WebSocket hub")]
struct Args {
    /// Config file (missing file = defaults)
    #[arg(short, long, default_value = "hub.toml")]
    config: PathBuf,

    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_directive = if args.debug {
        "hubd=debug,hub_server=debug,channel_hub=debug,tower_http=debug,info"
    } else {
        "hubd=info,hub_server=info,channel_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config = HubConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        "Starting hub ({} shard(s), queue capacity {})",
        config.shards, config.dispatcher.queue_capacity
    );

    let presence = Arc::new(PresenceTracker::new());
    let mut dispatcher =
        ShardedDispatcher::new(config.shards, config.dispatcher.clone(), presence.clone());
    let state = AppState {
        dispatcher: dispatcher.start(),
        presence,
        metrics: Arc::new(ServerMetrics::new()),
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()?)
        .await
        .context("Failed to bind listener")?;
    let actual_addr = listener.local_addr()?;

    info!("Hub listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  GET    /ws/{{channel}}?key=K              - Subscribe over WebSocket");
    info!("  POST   /api/channels/{{channel}}/messages - Publish an envelope");
    info!("  GET    /api/channels                    - List channels");
    info!("  GET    /api/presence                    - Online heartbeat keys");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Stopping dispatcher...");
    dispatcher.stop();
    dispatcher.stopped().await;

    info!("Shutdown complete");
    server_result
}
