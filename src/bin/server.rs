//! nexus capability server binary.
//!
//! Loads the YAML configuration, starts the registry, queue and reload
//! supervisor, and serves the HTTP and MCP surfaces until Ctrl-C.
//!
//! # Configuration
//!
//! - first CLI argument: path to the config file
//! - `NEXUS_CONFIG`: path used when no argument is given (default: `./config.yaml`)
//! - `RUST_LOG`: tracing filter (default: `info,nexus=<apiserver.log_level>`)
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin nexus-server -- config.yaml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use nexus::capabilities::{CommandResolver, DependencyResolver, HandlerCatalog, NoopResolver};
use nexus::config::NexusConfig;
use nexus::nexus::Nexus;
use nexus::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NEXUS_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let config = NexusConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialize tracing
    let level = config.apiserver.log_level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("info,nexus={}", level).into()),
        )
        .init();

    let resolver: Arc<dyn DependencyResolver> = match config
        .processing
        .dependency_command
        .as_deref()
        .and_then(CommandResolver::new)
    {
        Some(resolver) => Arc::new(resolver),
        None => Arc::new(NoopResolver),
    };

    let bind_addr = format!("{}:{}", config.apiserver.host, config.apiserver.port);
    let mcp_enabled = config.mcp_server.enabled;
    let server = Nexus::start(config, HandlerCatalog::with_builtins(), resolver)
        .await
        .context("starting capability server")?;

    for (bundle, reason) in &server.initial_load().failures {
        tracing::warn!("Bundle {} failed to load: {}", bundle, reason);
    }
    let recovery = server.recovery();
    if !recovery.requeued.is_empty() || !recovery.exhausted.is_empty() {
        tracing::info!(
            "Recovered job ledger: {} requeued, {} exhausted",
            recovery.requeued.len(),
            recovery.exhausted.len()
        );
    }

    let app = app_router(AppState::new(server.clone()));

    tracing::info!("nexus server {} starting on {}", nexus::VERSION, bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                          - liveness check");
    tracing::info!("  GET  /openapi.json                    - API document");
    tracing::info!("  POST /api/{{bundle}}/{{capability}}       - call a capability");
    tracing::info!("  POST /api/{{bundle}}/{{capability}}/queue - poll a queued job");
    if mcp_enabled {
        tracing::info!("  POST /mcp                             - MCP JSON-RPC");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await
        .context("server failed")?;

    server.shutdown().await;
    Ok(())
}
