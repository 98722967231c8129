use tether_domain::error::Result;
use tether_domain::item::ConversationItem;
use tether_domain::stream::EventStream;
use tether_domain::tool::ToolDefinition;

/// One streaming provider request: instructions, the full transcript, and
/// the current tool catalog. Adapters re-shape the transcript into their
/// wire format on every call; no provider-side conversation storage is
/// relied upon.
#[derive(Debug, Clone)]
pub struct TurnRequest<'a> {
    pub instructions: &'a str,
    pub transcript: &'a [ConversationItem],
    pub tools: &'a [ToolDefinition],
}

/// Capability surface the orchestrator needs from an LLM provider.
///
/// Aborting a stream is dropping it; the adapter cancels the underlying
/// HTTP request.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// A short identifier for log lines and error messages.
    fn name(&self) -> &str;

    /// The model's context window in tokens.
    fn context_window(&self) -> u32;

    /// Stream one provider call of a turn.
    async fn stream_turn(&self, req: TurnRequest<'_>) -> Result<EventStream>;

    /// One-shot non-streaming completion for a single user prompt. Used
    /// by context compaction and the approval explain sub-call.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
