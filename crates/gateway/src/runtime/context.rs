//! Context-window accounting and compaction.
//!
//! Token accounting approximates four characters per token over the
//! serialized transcript. Two strategies: `threshold` auto-compacts past
//! a usage fraction; `passive` only warns (once, at 90%) but still
//! honors explicit compact requests.

use std::sync::Arc;

use parking_lot::Mutex;

use tether_domain::config::{ContextConfig, ContextStrategyKind};
use tether_domain::error::{Error, Result};
use tether_domain::item::ConversationItem;
use tether_protocol::{ContextCompactedPayload, ContextInfoPayload};
use tether_providers::ProviderAdapter;
use tether_sessions::Transcript;

use super::SessionCore;

pub const SUMMARY_PREFIX: &str = "Context Summary\n\n";

const CHARS_PER_TOKEN: u64 = 4;
const PASSIVE_WARN_PERCENT: f64 = 90.0;

pub struct ContextManager {
    strategy: ContextStrategyKind,
    threshold: f64,
    max_tokens: u32,
    warned: bool,
    compacting: bool,
}

impl ContextManager {
    /// `default_window` is the adapter's context window; config may
    /// override it.
    pub fn new(cfg: &ContextConfig, default_window: u32) -> Self {
        Self {
            strategy: cfg.strategy,
            threshold: cfg.threshold,
            max_tokens: cfg.max_tokens.unwrap_or(default_window),
            warned: false,
            compacting: false,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn token_count(&self, transcript: &Transcript) -> u64 {
        (transcript.serialized_len() as u64).div_ceil(CHARS_PER_TOKEN)
    }

    pub fn usage_percent(&self, transcript: &Transcript) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.token_count(transcript) as f64 / self.max_tokens as f64 * 100.0
    }

    pub fn view(&self, transcript: &Transcript) -> ContextInfoPayload {
        ContextInfoPayload {
            token_count: self.token_count(transcript),
            usage_percent: self.usage_percent(transcript),
            transcript_length: transcript.len(),
            max_tokens: self.max_tokens as u64,
            strategy: self.strategy_name().to_string(),
        }
    }

    /// Should the compaction hook fire now? Under `passive` this never
    /// returns true but emits the one-time warning.
    pub fn should_compact(&mut self, transcript: &Transcript) -> bool {
        let usage = self.usage_percent(transcript);
        match self.strategy {
            ContextStrategyKind::Threshold => !self.compacting && usage > self.threshold * 100.0,
            ContextStrategyKind::Passive => {
                if usage > PASSIVE_WARN_PERCENT && !self.warned {
                    self.warned = true;
                    tracing::warn!(
                        usage_percent = usage,
                        "context usage high; passive strategy will not compact"
                    );
                }
                false
            }
        }
    }

    /// Claim the compaction slot; false when a compaction is already in
    /// flight (at most once concurrently).
    pub fn begin_compaction(&mut self) -> bool {
        if self.compacting {
            return false;
        }
        self.compacting = true;
        true
    }

    pub fn end_compaction(&mut self) {
        self.compacting = false;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the summarization prompt over the transcript.
pub fn summary_prompt(items: &[ConversationItem]) -> String {
    let mut conversation = String::new();
    for item in items {
        let (label, text) = match item {
            ConversationItem::UserMessage { .. } => ("User", item.text()),
            ConversationItem::AssistantMessage { .. } => ("Assistant", item.text()),
            ConversationItem::ToolCall { name, arguments, .. } => {
                ("Tool call", format!("{name} {arguments}"))
            }
            ConversationItem::ToolResult { output, .. } => ("Tool result", output.clone()),
            ConversationItem::Reasoning { .. } | ConversationItem::SystemNotice { .. } => continue,
        };
        conversation.push_str(label);
        conversation.push_str(": ");
        // Long tool results would crowd out everything else.
        if text.len() > 2000 {
            conversation.push_str(&text[..1000]);
            conversation.push_str(" [...] ");
        } else {
            conversation.push_str(&text);
        }
        conversation.push('\n');
    }

    format!(
        "Summarize the following conversation history into a concise summary \
         that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or workspace\n\
         5. Tool state (files touched, pending work)\n\n\
         Be concise but keep all actionable context. Write in present tense.\n\n\
         CONVERSATION:\n{conversation}"
    )
}

/// Run the full compaction flow: summarize via the provider, replace the
/// transcript with one synthetic assistant message, and report the token
/// delta. Fails as a no-op on an empty transcript.
pub async fn run_compaction(
    provider: &dyn ProviderAdapter,
    core: &Arc<Mutex<SessionCore>>,
) -> Result<ContextCompactedPayload> {
    let (items, old_token_count, strategy) = {
        let core = core.lock();
        if core.transcript.is_empty() {
            return Err(Error::Other("nothing to compact: transcript is empty".into()));
        }
        (
            core.transcript.snapshot(),
            core.context.token_count(&core.transcript),
            core.context.strategy_name().to_string(),
        )
    };

    let summary = provider.complete(&summary_prompt(&items)).await?;
    let seed = ConversationItem::assistant_completed(
        tether_domain::item::new_item_id(),
        format!("{SUMMARY_PREFIX}{summary}"),
    );

    let new_token_count = {
        let mut core = core.lock();
        core.transcript.replace_all(vec![seed]);
        core.context.token_count(&core.transcript)
    };

    let reduction_percent = if old_token_count > 0 {
        (old_token_count.saturating_sub(new_token_count)) as f64 / old_token_count as f64 * 100.0
    } else {
        0.0
    };

    tracing::info!(
        old_token_count,
        new_token_count,
        reduction_percent,
        "transcript compacted"
    );

    Ok(ContextCompactedPayload {
        old_token_count,
        new_token_count,
        reduction_percent,
        strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::config::ContextConfig;
    use tether_domain::error::Result as TResult;
    use tether_domain::stream::EventStream;
    use tether_providers::TurnRequest;

    fn manager(strategy: ContextStrategyKind, max_tokens: u32) -> ContextManager {
        ContextManager::new(
            &ContextConfig {
                strategy,
                threshold: 0.8,
                max_tokens: Some(max_tokens),
            },
            200_000,
        )
    }

    fn filled_transcript(chars: usize) -> Transcript {
        let mut transcript = Transcript::new();
        transcript.push(ConversationItem::user_text("x".repeat(chars)));
        transcript
    }

    #[test]
    fn token_count_is_chars_over_four() {
        let manager = manager(ContextStrategyKind::Threshold, 1000);
        let transcript = filled_transcript(400);
        let serialized = transcript.serialized_len() as u64;
        assert_eq!(manager.token_count(&transcript), serialized.div_ceil(4));
    }

    #[test]
    fn threshold_strategy_fires_above_threshold() {
        let mut manager = manager(ContextStrategyKind::Threshold, 100);
        // ~85% usage: 100 max tokens, threshold 0.8 → fire above 80.
        let transcript = filled_transcript(300);
        assert!(manager.usage_percent(&transcript) > 80.0);
        assert!(manager.should_compact(&transcript));

        // Claimed slot suppresses a second trigger.
        assert!(manager.begin_compaction());
        assert!(!manager.should_compact(&transcript));
        assert!(!manager.begin_compaction());
        manager.end_compaction();
        assert!(manager.should_compact(&transcript));
    }

    #[test]
    fn threshold_strategy_quiet_below_threshold() {
        let mut manager = manager(ContextStrategyKind::Threshold, 10_000);
        let transcript = filled_transcript(100);
        assert!(!manager.should_compact(&transcript));
    }

    #[test]
    fn passive_strategy_never_fires() {
        let mut manager = manager(ContextStrategyKind::Passive, 10);
        let transcript = filled_transcript(10_000);
        assert!(manager.usage_percent(&transcript) > 90.0);
        assert!(!manager.should_compact(&transcript));
        // Warned flag flips on the first crossing only.
        assert!(manager.warned);
    }

    #[test]
    fn view_matches_wire_contract() {
        let manager = manager(ContextStrategyKind::Threshold, 1000);
        let transcript = filled_transcript(40);
        let view = manager.view(&transcript);
        assert_eq!(view.max_tokens, 1000);
        assert_eq!(view.transcript_length, 1);
        assert_eq!(view.strategy, "threshold");
        assert!(view.token_count > 0);
    }

    struct FixedSummaryProvider;

    #[async_trait::async_trait]
    impl ProviderAdapter for FixedSummaryProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn context_window(&self) -> u32 {
            1000
        }
        async fn stream_turn(&self, _req: TurnRequest<'_>) -> TResult<EventStream> {
            unimplemented!("not used in compaction tests")
        }
        async fn complete(&self, _prompt: &str) -> TResult<String> {
            Ok("the user asked for a listing; it is done".into())
        }
    }

    #[tokio::test]
    async fn compaction_shrinks_and_reseeds() {
        let core = Arc::new(Mutex::new(SessionCore::new(manager(
            ContextStrategyKind::Threshold,
            1000,
        ))));
        {
            let mut core = core.lock();
            for i in 0..50 {
                core.transcript
                    .push(ConversationItem::user_text(format!("message number {i} with padding")));
            }
        }

        let payload = run_compaction(&FixedSummaryProvider, &core).await.unwrap();
        assert!(payload.new_token_count < payload.old_token_count);
        assert!(payload.reduction_percent > 0.0);

        let core = core.lock();
        assert_eq!(core.transcript.len(), 1);
        let seed = &core.transcript.items()[0];
        assert!(seed.text().starts_with(SUMMARY_PREFIX));
        assert!(seed.text().contains("listing"));
    }

    #[tokio::test]
    async fn compaction_on_empty_transcript_fails() {
        let core = Arc::new(Mutex::new(SessionCore::new(manager(
            ContextStrategyKind::Threshold,
            1000,
        ))));
        let err = run_compaction(&FixedSummaryProvider, &core).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn summary_prompt_includes_roles_and_truncates() {
        let items = vec![
            ConversationItem::user_text("goal: refactor"),
            ConversationItem::tool_result("c1", "y".repeat(5000), false),
        ];
        let prompt = summary_prompt(&items);
        assert!(prompt.contains("User: goal: refactor"));
        assert!(prompt.contains("[...]"));
        assert!(prompt.len() < 6000);
    }
}
