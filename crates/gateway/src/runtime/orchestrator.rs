//! The agent orchestrator: drives one turn from user input to the
//! provider's end-of-turn signal, interleaving tool invocations.
//!
//! Cancellation is a generation counter: `cancel` bumps it and every
//! side effect compares the generation captured at turn entry, so late
//! stream events and tool completions become no-ops. Tool invocations
//! started by a stream are awaited in stream order before the turn-end
//! hook runs, so `agent_finished` can never precede a pending
//! `ToolResult`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;

use tether_domain::error::{Error, Result};
use tether_domain::item::{new_item_id, ConversationItem};
use tether_domain::stream::{StopCause, StreamEvent};
use tether_protocol::{
    frame_type, AgentFinishedPayload, Frame, LoadingStatePayload,
};
use tether_providers::{ProviderAdapter, TurnRequest};

use super::context;
use super::dispatch::ToolDispatch;
use super::outbound::OutboundSink;
use super::SessionCore;

/// Upper bound on provider re-invocations within one turn.
const MAX_TOOL_LOOPS: usize = 25;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fragment buffer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates the turn's streamed assistant deltas. The client sees
/// every fragment live; the journal gets one coalesced message per turn.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    message_id: Option<String>,
    text: String,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.message_id = None;
        self.text.clear();
    }

    pub fn push(&mut self, message_id: &str, delta: &str) {
        if self.message_id.is_none() {
            self.message_id = Some(message_id.to_string());
        }
        self.text.push_str(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    /// The single coalesced assistant message, or `None` when no text was
    /// streamed this turn.
    pub fn coalesce(&self) -> Option<ConversationItem> {
        if self.text.is_empty() {
            return None;
        }
        let id = self.message_id.clone().unwrap_or_else(new_item_id);
        Some(ConversationItem::assistant_completed(id, self.text.clone()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    session_id: String,
    core: Arc<Mutex<SessionCore>>,
    generation: Arc<AtomicU64>,
    terminated: Arc<AtomicBool>,
    outbound: OutboundSink,
    provider: Arc<dyn ProviderAdapter>,
    dispatcher: Arc<dyn ToolDispatch>,
    instructions: String,
}

impl Orchestrator {
    pub fn new(
        session_id: String,
        core: Arc<Mutex<SessionCore>>,
        outbound: OutboundSink,
        provider: Arc<dyn ProviderAdapter>,
        dispatcher: Arc<dyn ToolDispatch>,
        instructions: String,
    ) -> Self {
        Self {
            session_id,
            core,
            generation: Arc::new(AtomicU64::new(0)),
            terminated: Arc::new(AtomicBool::new(false)),
            outbound,
            provider,
            dispatcher,
            instructions,
        }
    }

    /// The shared generation counter (exposed for cooperating tasks).
    pub fn generation_handle(&self) -> Arc<AtomicU64> {
        self.generation.clone()
    }

    /// Bulk-seed conversation state without issuing a provider call.
    /// Used exclusively by session resume.
    pub fn initialize_transcript(&self, items: Vec<ConversationItem>) {
        let mut core = self.core.lock();
        core.transcript.extend(items);
    }

    /// Abort the in-flight turn: late callbacks see a stale generation
    /// and drop their effects. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session_id = %self.session_id, "orchestrator canceled");
    }

    /// Like cancel, but the orchestrator is unusable afterwards.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.cancel();
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.terminated.load(Ordering::SeqCst)
            || self.generation.load(Ordering::SeqCst) != generation
    }

    /// Run one turn. Returns when the provider ends the turn, the session
    /// is canceled, or the turn fails in a way that leaves the session
    /// usable.
    pub async fn run(&self, input: Vec<ConversationItem>) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(Error::Terminated);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.outbound
            .send(&Frame::with_payload(
                frame_type::LOADING_STATE,
                &LoadingStatePayload { loading: true },
            ))
            .await;

        {
            let mut core = self.core.lock();
            core.fragments.clear();
            core.transcript.extend(input);
        }

        let mut stop_turn = false;
        for _ in 0..MAX_TOOL_LOOPS {
            let snapshot = self.core.lock().transcript.snapshot();
            let tools = self.dispatcher.catalog();
            let request = TurnRequest {
                instructions: &self.instructions,
                transcript: &snapshot,
                tools: &tools,
            };

            let mut stream = match self.provider.stream_turn(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.surface_provider_error(generation, &e.to_string()).await;
                    return Ok(());
                }
            };

            let mut message_id = String::new();
            let mut segment_text = String::new();
            let mut dispatched_tools = false;
            let mut stop_cause: Option<StopCause> = None;

            while let Some(event) = stream.next().await {
                if self.is_stale(generation) {
                    return Ok(());
                }
                match event {
                    Err(e) => {
                        drop(stream);
                        self.surface_provider_error(generation, &e.to_string()).await;
                        return Ok(());
                    }
                    Ok(StreamEvent::Opened { response_id }) => {
                        message_id = response_id.clone();
                        self.core.lock().response_id = Some(response_id);
                    }
                    Ok(StreamEvent::TextDelta { text }) => {
                        if message_id.is_empty() {
                            message_id = new_item_id();
                            self.core.lock().response_id = Some(message_id.clone());
                        }
                        segment_text.push_str(&text);
                        self.core.lock().fragments.push(&message_id, &text);
                        let fragment =
                            ConversationItem::assistant_fragment(&message_id, &text);
                        self.outbound
                            .send_unjournaled(&Frame::response_item(&fragment))
                            .await;
                    }
                    Ok(StreamEvent::ReasoningDelta { text }) => {
                        let item = ConversationItem::Reasoning {
                            id: new_item_id(),
                            text,
                            duration_ms: None,
                        };
                        self.core.lock().transcript.push(item.clone());
                        self.outbound.send(&Frame::response_item(&item)).await;
                    }
                    Ok(StreamEvent::ToolRequest(invocation)) => {
                        // Text streamed before the tool call belongs ahead
                        // of it in the transcript.
                        if !segment_text.is_empty() {
                            self.core.lock().transcript.push(
                                ConversationItem::assistant_fragment(&message_id, &segment_text),
                            );
                            segment_text.clear();
                        }

                        let call_item = ConversationItem::tool_call(
                            &invocation.call_id,
                            &invocation.name,
                            invocation.arguments.clone(),
                        );
                        self.core.lock().transcript.push(call_item.clone());
                        self.outbound.send(&Frame::response_item(&call_item)).await;

                        dispatched_tools = true;
                        let outcome = self.dispatcher.dispatch(&invocation).await;
                        if self.is_stale(generation) {
                            return Ok(());
                        }

                        self.core.lock().transcript.push(outcome.result.clone());
                        self.outbound
                            .send(&Frame::response_item(&outcome.result))
                            .await;
                        if outcome.stop_turn {
                            stop_turn = true;
                        }
                    }
                    Ok(StreamEvent::Closed { cause, .. }) => {
                        stop_cause = Some(cause);
                        break;
                    }
                    Ok(StreamEvent::Failed { message }) => {
                        drop(stream);
                        self.surface_provider_error(generation, &message).await;
                        return Ok(());
                    }
                }
                if stop_turn {
                    break;
                }
            }

            if !segment_text.is_empty() {
                self.core
                    .lock()
                    .transcript
                    .push(ConversationItem::assistant_completed(&message_id, &segment_text));
            }

            if stop_turn {
                break;
            }
            let wants_more =
                matches!(stop_cause, Some(StopCause::WantsTools)) && dispatched_tools;
            if !wants_more {
                break;
            }
        }

        self.finish_turn(generation).await;
        Ok(())
    }

    /// The turn-end hook: coalesce and journal the assistant message,
    /// emit `agent_finished` and a context snapshot, clear loading, and
    /// run the compaction hook if the strategy asks for it.
    async fn finish_turn(&self, generation: u64) {
        if self.is_stale(generation) {
            return;
        }

        let (coalesced, response_id, view) = {
            let mut core = self.core.lock();
            let coalesced = core.fragments.coalesce();
            core.fragments.clear();
            let response_id = core.response_id.clone().unwrap_or_else(new_item_id);
            let view = core.context.view(&core.transcript);
            (coalesced, response_id, view)
        };

        if let Some(item) = coalesced {
            self.outbound.journal_only(&Frame::response_item(&item));
        }
        self.outbound
            .send(&Frame::with_payload(
                frame_type::LOADING_STATE,
                &LoadingStatePayload { loading: false },
            ))
            .await;
        self.outbound
            .send(&Frame::with_payload(
                frame_type::AGENT_FINISHED,
                &AgentFinishedPayload { response_id },
            ))
            .await;
        self.outbound
            .send(&Frame::with_payload(frame_type::CONTEXT_INFO, &view))
            .await;

        self.maybe_compact().await;
    }

    async fn maybe_compact(&self) {
        let claimed = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            core.context.should_compact(&core.transcript) && core.context.begin_compaction()
        };
        if !claimed {
            return;
        }

        match context::run_compaction(self.provider.as_ref(), &self.core).await {
            Ok(payload) => {
                self.outbound
                    .send(&Frame::with_payload(frame_type::CONTEXT_COMPACTED, &payload))
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "auto-compaction failed, continuing with full history"
                );
            }
        }
        self.core.lock().context.end_compaction();
    }

    /// Provider failure: surface a transport-level notice, clear loading,
    /// keep the session usable. Nothing is journaled as assistant output.
    async fn surface_provider_error(&self, generation: u64, message: &str) {
        if self.is_stale(generation) {
            return;
        }
        tracing::warn!(session_id = %self.session_id, error = %message, "provider stream error");
        let notice = ConversationItem::system_notice(format!("Provider error: {message}"));
        self.outbound
            .send_unjournaled(&Frame::response_item(&notice))
            .await;
        self.outbound
            .send(&Frame::with_payload(
                frame_type::LOADING_STATE,
                &LoadingStatePayload { loading: false },
            ))
            .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
