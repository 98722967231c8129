//! Runtime configuration.
//!
//! Loaded from `tether.toml` (path overridable via `TETHER_CONFIG`) with
//! serde defaults, then layered with environment overrides. Invalid enum
//! values coming from the environment degrade to safe defaults with a
//! warning instead of refusing to start.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub todos: TodosConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Load the config file (if present) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "tether.toml".into());
        let mut config = if std::path::Path::new(&path).exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{path}: {e}")))?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Layer environment variables over the file-sourced values.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TETHER_PROVIDER") {
            self.provider.kind = Some(v);
        }
        if let Ok(v) = std::env::var("TETHER_MODEL") {
            self.provider.model = v;
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.provider.anthropic_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.provider.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TETHER_WORKDIR") {
            self.tools.workdir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("TETHER_APPROVAL_POLICY") {
            self.approval.policy = ApprovalPolicy::parse_or_default(&v);
        }
        if let Ok(v) = std::env::var("TETHER_CONTEXT_STRATEGY") {
            self.context.strategy = ContextStrategyKind::parse_or_default(&v);
        }
        if let Ok(v) = std::env::var("TETHER_CONTEXT_THRESHOLD") {
            match v.parse::<f64>() {
                Ok(t) if t > 0.0 && t <= 1.0 => self.context.threshold = t,
                _ => tracing::warn!(value = %v, "invalid context threshold, keeping current"),
            }
        }
        if let Ok(v) = std::env::var("TETHER_SESSIONS_DIR") {
            self.sessions.dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TETHER_TODOS_DIR") {
            self.todos.dir = PathBuf::from(v);
        }
    }

    /// The effective working directory for tool execution.
    pub fn workdir(&self) -> PathBuf {
        self.tools
            .workdir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model identifier; also drives adapter auto-detection.
    #[serde(default = "d_model")]
    pub model: String,
    /// Explicit adapter selection ("anthropic" | "openai" | "google").
    /// Takes precedence over model-prefix detection.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "d_anthropic_base")]
    pub anthropic_base_url: String,
    #[serde(default = "d_openai_base")]
    pub openai_base_url: String,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "d_max_output")]
    pub max_output_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            kind: None,
            anthropic_base_url: d_anthropic_base(),
            openai_base_url: d_openai_base(),
            anthropic_api_key: None,
            openai_api_key: None,
            max_output_tokens: d_max_output(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Auto-approve read-only commands; everything else asks.
    #[default]
    Suggest,
    /// Additionally auto-approve patches whose targets lie in writable roots.
    AutoEdit,
    /// Auto-approve everything; sandboxing compensates.
    FullAuto,
}

impl ApprovalPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "suggest" => Some(ApprovalPolicy::Suggest),
            "auto-edit" => Some(ApprovalPolicy::AutoEdit),
            "full-auto" => Some(ApprovalPolicy::FullAuto),
            _ => None,
        }
    }

    /// Parse, falling back to `suggest` with a warning on unknown values.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = %s, "unknown approval policy, falling back to suggest");
            ApprovalPolicy::Suggest
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub policy: ApprovalPolicy,
    /// Extra writable roots for `auto-edit`; the working directory and the
    /// OS tempdir are always included.
    #[serde(default)]
    pub writable_roots: Vec<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategyKind {
    /// Compact automatically when usage crosses the threshold.
    #[default]
    Threshold,
    /// Never auto-compact; warn once at 90% usage.
    Passive,
}

impl ContextStrategyKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "threshold" => Some(ContextStrategyKind::Threshold),
            "passive" => Some(ContextStrategyKind::Passive),
            _ => None,
        }
    }

    /// Parse, falling back to `threshold` with a warning on unknown values.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(value = %s, "unknown context strategy, falling back to threshold");
            ContextStrategyKind::Threshold
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContextStrategyKind::Threshold => "threshold",
            ContextStrategyKind::Passive => "passive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub strategy: ContextStrategyKind,
    /// Usage fraction that triggers auto-compaction under `threshold`.
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// Override the adapter's context window.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            strategy: ContextStrategyKind::default(),
            threshold: d_threshold(),
            max_tokens: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stores
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "d_sessions_dir")]
    pub dir: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: d_sessions_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodosConfig {
    #[serde(default = "d_todos_dir")]
    pub dir: PathBuf,
}

impl Default for TodosConfig {
    fn default() -> Self {
        Self { dir: d_todos_dir() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Working directory for shell/patch execution. Defaults to the
    /// process working directory.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default = "d_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Scrub loader-hook environment variables from tool subprocesses.
    #[serde(default = "d_true")]
    pub sandbox: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workdir: None,
            shell_timeout_secs: d_shell_timeout(),
            sandbox: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System instructions prefixed to every provider request.
    #[serde(default = "d_instructions")]
    pub instructions: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: d_instructions(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8391
}
fn d_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_anthropic_base() -> String {
    "https://api.anthropic.com".into()
}
fn d_openai_base() -> String {
    "https://api.openai.com".into()
}
fn d_max_output() -> u32 {
    4096
}
fn d_threshold() -> f64 {
    0.8
}
fn d_sessions_dir() -> PathBuf {
    PathBuf::from("./data/sessions")
}
fn d_todos_dir() -> PathBuf {
    PathBuf::from("./data/todos")
}
fn d_shell_timeout() -> u64 {
    10
}
fn d_true() -> bool {
    true
}
fn d_instructions() -> String {
    "You are Tether, a coding agent running inside the user's workspace. \
     Use the shell tool to inspect and modify files, keep the todo list \
     current while working through multi-step tasks, and explain what you \
     changed when you finish."
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8391);
        assert_eq!(config.approval.policy, ApprovalPolicy::Suggest);
        assert_eq!(config.context.strategy, ContextStrategyKind::Threshold);
        assert!((config.context.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.tools.shell_timeout_secs, 10);
        assert!(config.tools.sandbox);
    }

    #[test]
    fn parse_from_toml() {
        let raw = r#"
            [server]
            port = 9000

            [provider]
            model = "gpt-4o"

            [approval]
            policy = "auto-edit"
            writable_roots = ["/tmp/scratch"]

            [context]
            strategy = "passive"
            threshold = 0.5

            [[mcp.servers]]
            id = "files"
            command = "mcp-files"
            args = ["--root", "/srv"]
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.approval.policy, ApprovalPolicy::AutoEdit);
        assert_eq!(config.context.strategy, ContextStrategyKind::Passive);
        assert_eq!(config.mcp.servers.len(), 1);
        assert_eq!(config.mcp.servers[0].args, vec!["--root", "/srv"]);
    }

    #[test]
    fn invalid_policy_falls_back_to_suggest() {
        assert_eq!(ApprovalPolicy::parse_or_default("YOLO"), ApprovalPolicy::Suggest);
        assert_eq!(
            ApprovalPolicy::parse_or_default("full-auto"),
            ApprovalPolicy::FullAuto
        );
    }

    #[test]
    fn unknown_strategy_falls_back_to_threshold() {
        assert_eq!(
            ContextStrategyKind::parse_or_default("aggressive"),
            ContextStrategyKind::Threshold
        );
        assert_eq!(
            ContextStrategyKind::parse_or_default("passive"),
            ContextStrategyKind::Passive
        );
    }
}
