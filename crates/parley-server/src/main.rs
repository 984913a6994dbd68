//! # parley-server
//!
//! REST API server for the Parley chat application.
//!
//! This binary provides:
//! - **Conversations**: canonical pair-keyed two-party conversations,
//!   created lazily on first contact
//! - **Messages**: append-only per-conversation history with
//!   since-timestamp incremental reads
//! - **Notification ledger**: per-user unread/aggregate state that polling
//!   clients reconcile against, maintained with atomic upserts
//! - **Groups**: named groups with invite/join/self-removal membership
//! - **Session auth** over an external OAuth handoff
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod config;
mod conversations;
mod error;
mod groups;
mod messages;
mod notifications;
mod rate_limit;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the store
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let http_addr = config.http_addr;
    let state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 3. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict windows idle
    // for more than 10 minutes).
    let governor = state.governor.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            governor
                .purge_idle(std::time::Duration::from_secs(600))
                .await;
        }
    });

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
