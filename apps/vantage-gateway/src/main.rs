mod broker;
mod cli;
mod config;
mod devices;
mod error;
mod handlers;
mod notify;
mod records;
mod router;
mod rpc;
mod state;
mod streams;
mod telemetry;
mod websocket;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::records::{MemoryStore, SharedRecordStore};
use crate::state::GatewayState;
use crate::telemetry::Telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Debug { url, command }) = cli.command {
        if let Err(e) = cli::run_debug_client(url, command).await {
            eprintln!("debug client error: {e}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let telemetry = Telemetry::init()?;
    let config = Config::from_env();
    info!(
        port = config.port,
        broker = %format!("{}:{}", config.broker_host, config.broker_port),
        namespace = %config.topic_namespace,
        "starting vantage gateway"
    );

    serve(config, telemetry).await
}

async fn serve(config: Config, telemetry: Telemetry) -> anyhow::Result<()> {
    let store: SharedRecordStore = match &config.records_path {
        Some(path) => {
            let store = MemoryStore::load(path).context("failed to load records seed")?;
            info!(%path, "record store seeded");
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let (broker, inbound) = broker::connect(&config)
        .await
        .context("broker connection failed")?;

    let state = GatewayState::new(&config, broker, store, telemetry.metrics_handle());

    let subscribed = notify::subscribe_known_entities(&state)
        .await
        .context("failed to subscribe notification topics")?;
    info!(subscribed, "notification subscriptions established");

    tokio::spawn(router::route_inbound(inbound, state.clone()));

    let app = handlers::routes(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "vantage gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
