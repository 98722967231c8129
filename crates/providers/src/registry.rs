//! Adapter selection: model-prefix auto-detection with an explicit
//! override, and construction from config.

use std::sync::Arc;

use tether_domain::config::ProviderConfig;
use tether_domain::error::{Error, Result};

use crate::anthropic::AnthropicAdapter;
use crate::openai::OpenAiAdapter;
use crate::traits::ProviderAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Anthropic,
    OpenAi,
    /// Named extension point; construction is a configuration error.
    Google,
}

impl AdapterKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "anthropic" => Some(AdapterKind::Anthropic),
            "openai" => Some(AdapterKind::OpenAi),
            "google" => Some(AdapterKind::Google),
            _ => None,
        }
    }
}

/// Map a model name to its adapter. An explicit override (config or the
/// `TETHER_PROVIDER` environment variable) takes precedence over the
/// prefix heuristic.
pub fn detect(model: &str, kind_override: Option<&str>) -> AdapterKind {
    if let Some(kind) = kind_override.and_then(AdapterKind::parse) {
        return kind;
    }
    if let Some(raw) = kind_override {
        tracing::warn!(value = %raw, "unknown provider override, using model-prefix detection");
    }
    if model.starts_with("claude-") {
        AdapterKind::Anthropic
    } else if model.starts_with("gemini-") {
        AdapterKind::Google
    } else {
        AdapterKind::OpenAi
    }
}

/// Build the adapter for the configured model.
pub fn build_adapter(cfg: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
    match detect(&cfg.model, cfg.kind.as_deref()) {
        AdapterKind::Anthropic => Ok(Arc::new(AnthropicAdapter::new(cfg)?)),
        AdapterKind::OpenAi => Ok(Arc::new(OpenAiAdapter::new(cfg)?)),
        AdapterKind::Google => Err(Error::Config(format!(
            "model {} maps to the google adapter, which is not wired yet; \
             set provider.kind to \"anthropic\" or \"openai\"",
            cfg.model
        ))),
    }
}
