//! tickdown sync server -- snapshot-push task synchronization.
//!
//! An axum WebSocket server that stores per-user task collections and keeps
//! every subscribed client up to date by pushing the full task list after
//! each accepted mutation.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin tickdown-server
//!
//! # Run on custom address
//! cargo run --bin tickdown-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! TICKDOWN_SYNC_ADDR=127.0.0.1:8080 cargo run --bin tickdown-server
//! ```

use std::sync::Arc;

use clap::Parser;
use tickdown_server::collections::TaskCollections;
use tickdown_server::config::{ServerCliArgs, ServerConfig};
use tickdown_server::server::{self, SyncState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting tickdown sync server");

    let collections = TaskCollections::with_max_tasks(config.max_tasks_per_user);
    let state = Arc::new(SyncState::with_collections(collections));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "sync server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sync server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start sync server");
            std::process::exit(1);
        }
    }
}
