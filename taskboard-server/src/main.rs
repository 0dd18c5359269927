//! Taskboard server: REST API, JSON-file store and the Event Bus.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000 with ./data as the store
//! cargo run --bin taskboard-server
//!
//! # Custom address and data directory
//! cargo run --bin taskboard-server -- --bind 127.0.0.1:8080 --data-dir /tmp/tb
//!
//! # Or via environment variables
//! TASKBOARD_ADDR=127.0.0.1:8080 JWT_SECRET=change-me cargo run --bin taskboard-server
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_server::auth::TokenIssuer;
use taskboard_server::config::{ServerCliArgs, ServerConfig};
use taskboard_server::server::{self, AppState};
use taskboard_server::store::JsonStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.uses_default_secret() {
        tracing::warn!("JWT secret not configured, using the development default");
    }

    let store = match JsonStore::open(&config.data_dir).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open data store");
            std::process::exit(1);
        }
    };
    let tokens = TokenIssuer::new(config.jwt_secret.as_bytes(), config.token_ttl);
    let state = Arc::new(
        AppState::new(store, tokens)
            .with_max_payload_size(config.max_payload_size)
            .with_hash_cost(config.hash_cost),
    );

    tracing::info!(addr = %config.bind_addr, "starting taskboard server");

    let (bound_addr, mut handle) =
        match server::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, "failed to start server");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %bound_addr, "server listening");

    tokio::select! {
        result = &mut handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(
                connections = state.bus.connection_count().await,
                "shutting down, closing bus connections"
            );
            state.bus.close_all_connections().await;
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            handle.abort();
        }
    }
}
