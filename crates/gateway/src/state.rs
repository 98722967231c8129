use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use tether_domain::config::Config;
use tether_mcp_client::McpManager;
use tether_providers::ProviderAdapter;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The session-wide provider adapter (selected at startup).
    pub provider: Arc<dyn ProviderAdapter>,
    /// MCP server connections and their tool registry.
    pub mcp: Arc<McpManager>,
    /// Session ids with a live socket; one socket per session.
    pub active: Arc<Mutex<HashSet<String>>>,
}
