//! MCP manager: holds every server connection and exposes the combined
//! tool catalog under qualified names (`<server>.<tool>`).

use std::collections::HashMap;

use serde_json::Value;

use tether_domain::config::{McpConfig, McpServerConfig};
use tether_domain::tool::ToolDefinition;

use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{StdioTransport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP tool not found: {0}")]
    ToolNotFound(String),

    #[error("MCP server is down: {0}")]
    ServerDown(String),
}

struct McpServer {
    id: String,
    tools: Vec<McpToolDef>,
    transport: StdioTransport,
}

impl McpServer {
    /// Spawn the process, run the MCP handshake, and discover tools.
    async fn initialize(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(config)?;

        let resp = transport
            .request("initialize", Some(protocol::initialize_params()))
            .await?;
        resp.into_result()
            .map_err(|e| McpError::Protocol(format!("initialize failed: {e}")))?;

        transport.notify("notifications/initialized").await?;

        let tools = match transport.request("tools/list", None).await?.into_result() {
            Ok(result) => serde_json::from_value::<ToolsListResult>(result)
                .map(|r| r.tools)
                .unwrap_or_else(|e| {
                    tracing::warn!(server_id = %config.id, error = %e, "failed to parse tools/list");
                    Vec::new()
                }),
            Err(e) => {
                tracing::warn!(server_id = %config.id, error = %e, "tools/list failed");
                Vec::new()
            }
        };

        tracing::info!(
            server_id = %config.id,
            tool_count = tools.len(),
            "MCP server initialized"
        );

        Ok(Self {
            id: config.id.clone(),
            tools,
            transport,
        })
    }

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        if !self.transport.is_alive() {
            return Err(McpError::ServerDown(self.id.clone()));
        }
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let result = self
            .transport
            .request("tools/call", Some(params))
            .await?
            .into_result()
            .map_err(|e| McpError::Protocol(format!("tools/call failed: {e}")))?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }
}

/// All configured MCP servers plus their discovered tools.
pub struct McpManager {
    servers: HashMap<String, McpServer>,
}

impl McpManager {
    pub fn empty() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Initialize every configured server; failures are logged and the
    /// server is skipped rather than failing startup.
    pub async fn from_config(config: &McpConfig) -> Self {
        let mut servers = HashMap::new();
        for server_config in &config.servers {
            match McpServer::initialize(server_config).await {
                Ok(server) => {
                    servers.insert(server_config.id.clone(), server);
                }
                Err(e) => {
                    tracing::warn!(
                        server_id = %server_config.id,
                        error = %e,
                        "failed to initialize MCP server, skipping"
                    );
                }
            }
        }
        Self { servers }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The combined catalog, qualified as `<server>.<tool>`.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .servers
            .values()
            .filter(|s| s.transport.is_alive())
            .flat_map(|server| {
                server.tools.iter().map(move |tool| ToolDefinition {
                    name: format!("{}.{}", server.id, tool.name),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                })
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn has_tool(&self, qualified: &str) -> bool {
        split_qualified(qualified).is_some_and(|(server_id, tool)| {
            self.servers
                .get(server_id)
                .is_some_and(|s| s.tools.iter().any(|t| t.name == tool))
        })
    }

    /// Call a qualified tool. Returns the flattened content string and
    /// the server's error flag.
    pub async fn call(&self, qualified: &str, arguments: Value) -> Result<(String, bool), McpError> {
        let (server_id, tool) = split_qualified(qualified)
            .ok_or_else(|| McpError::ToolNotFound(qualified.to_string()))?;
        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| McpError::ToolNotFound(qualified.to_string()))?;
        let result = server.call_tool(tool, arguments).await?;
        Ok((result.flatten(), result.is_error))
    }

    pub async fn shutdown(&self) {
        let futs: Vec<_> = self
            .servers
            .values()
            .map(|s| s.transport.shutdown())
            .collect();
        futures_util::future::join_all(futs).await;
    }
}

fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manager_has_no_tools() {
        let manager = McpManager::empty();
        assert!(manager.is_empty());
        assert!(manager.tool_definitions().is_empty());
        assert!(!manager.has_tool("files.read"));
    }

    #[test]
    fn qualified_names_split_on_first_dot() {
        assert_eq!(split_qualified("files.read"), Some(("files", "read")));
        assert_eq!(split_qualified("srv.a.b"), Some(("srv", "a.b")));
        assert_eq!(split_qualified("plain"), None);
    }

    #[tokio::test]
    async fn unknown_tool_call_errors() {
        let manager = McpManager::empty();
        let err = manager
            .call("ghost.tool", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }
}
