//! Server boot: wire the provider adapter, MCP servers, and the HTTP
//! listener; drive graceful shutdown.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

use tether_domain::config::Config;
use tether_mcp_client::McpManager;
use tether_providers::build_adapter;

use crate::api::router::build_router;
use crate::state::AppState;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let provider = build_adapter(&config.provider).context("initializing provider adapter")?;
    tracing::info!(
        model = %config.provider.model,
        adapter = provider.name(),
        "provider ready"
    );

    let mcp = Arc::new(if config.mcp.servers.is_empty() {
        McpManager::empty()
    } else {
        McpManager::from_config(&config.mcp).await
    });

    std::fs::create_dir_all(&config.sessions.dir).context("creating sessions directory")?;
    std::fs::create_dir_all(&config.todos.dir).context("creating todos directory")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        config: Arc::new(config),
        provider,
        mcp: mcp.clone(),
        active: Arc::new(Mutex::new(HashSet::new())),
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "tetherd listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    mcp.shutdown().await;
    tracing::info!("tetherd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
