//! Per-session socket loop.
//!
//! One reader loop routes inbound frames; each turn runs as its own task
//! so approval responses stay deliverable while the orchestrator is
//! suspended. Every inbound frame is journaled on receipt; lifecycle
//! markers bracket the connection. On disconnect the orchestrator is
//! terminated, the pending approval is rejected, and the journal remains
//! the only record of the session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_domain::item::{new_item_id, ConversationItem};
use tether_protocol::{
    frame_type, ApprovalRequestPayload, ApprovalResponsePayload, Frame, ReviewDecision,
    UserInputPayload,
};
use tether_providers::ProviderAdapter;
use tether_sessions::journal::Direction;
use tether_sessions::{resume, SessionJournal};
use tether_tools::todo::TodoStore;

use crate::runtime::approval::ApprovalCoordinator;
use crate::runtime::context::{self, ContextManager};
use crate::runtime::dispatch::Dispatcher;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::outbound::OutboundSink;
use crate::runtime::SessionCore;
use crate::state::AppState;

const EXPLAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub async fn run_session(state: AppState, socket: WebSocket, session_id: String) {
    let result = drive_session(&state, socket, &session_id).await;
    state.active.lock().remove(&session_id);
    if let Err(e) = result {
        tracing::warn!(session_id = %session_id, error = %e, "session ended with error");
    } else {
        tracing::info!(session_id = %session_id, "session closed");
    }
}

async fn drive_session(
    state: &AppState,
    socket: WebSocket,
    session_id: &str,
) -> tether_domain::error::Result<()> {
    let sessions_dir = &state.config.sessions.dir;
    let prior_events = SessionJournal::read_events(sessions_dir, session_id)?;
    let journal = Arc::new(SessionJournal::open(sessions_dir, session_id)?);
    journal.append_lifecycle("session_connected", Direction::Incoming)?;

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: owns the sink; the outbound channel carries
    // already-journaled frames.
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let outbound = OutboundSink::new(journal.clone(), tx);
    let context = ContextManager::new(&state.config.context, state.provider.context_window());
    let core = Arc::new(Mutex::new(SessionCore::new(context)));
    let approvals = Arc::new(ApprovalCoordinator::new());
    let dispatcher = Arc::new(Dispatcher::new(
        state.config.workdir(),
        state.config.tools.shell_timeout_secs,
        state.config.tools.sandbox,
        state.config.approval.policy,
        &state.config.approval.writable_roots,
        TodoStore::new(&state.config.todos.dir, session_id),
        approvals.clone(),
        outbound.clone(),
        state.mcp.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        session_id.to_string(),
        core.clone(),
        outbound.clone(),
        state.provider.clone(),
        dispatcher,
        state.config.agent.instructions.clone(),
    ));

    // Resume: rebuild the transcript from the journal. No provider call.
    let replayed = resume::reconstruct_items(&prior_events);
    if !replayed.is_empty() {
        tracing::info!(
            session_id = %session_id,
            items = replayed.len(),
            "resuming session from journal"
        );
        orchestrator.initialize_transcript(replayed);
    }

    let mut turn_task: Option<JoinHandle<()>> = None;

    while let Some(message) = ws_stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "socket read error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                handle_text_frame(
                    state,
                    session_id,
                    &text,
                    &journal,
                    &outbound,
                    &core,
                    &approvals,
                    &orchestrator,
                    &mut turn_task,
                )
                .await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Teardown: the turn, its approvals, and the journal all settle here.
    orchestrator.terminate();
    approvals.reject_pending();
    if let Some(task) = turn_task.take() {
        task.abort();
    }
    writer.abort();
    journal.append_lifecycle("session_ended", Direction::Outgoing)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_text_frame(
    state: &AppState,
    session_id: &str,
    text: &str,
    journal: &SessionJournal,
    outbound: &OutboundSink,
    core: &Arc<Mutex<SessionCore>>,
    approvals: &Arc<ApprovalCoordinator>,
    orchestrator: &Arc<Orchestrator>,
    turn_task: &mut Option<JoinHandle<()>>,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "malformed frame");
            outbound
                .send(&Frame::error("malformed frame: expected {id, type, payload}"))
                .await;
            return;
        }
    };

    // Every inbound framed message is journaled before it takes effect.
    if let Ok(value) = serde_json::to_value(&frame) {
        if let Err(e) = journal.append_received(&value) {
            tracing::warn!(session_id = %session_id, error = %e, "journal append failed");
        }
    }

    match frame.kind.as_str() {
        frame_type::USER_INPUT => {
            let payload: UserInputPayload = match frame.parse_payload() {
                Ok(p) => p,
                Err(e) => {
                    outbound
                        .send(&Frame::error(format!("invalid user_input payload: {e}")))
                        .await;
                    return;
                }
            };
            // previousResponseId is accepted and ignored; the server is
            // stateless at the provider layer.

            // Turns are strictly serial: a new input waits for the
            // in-flight turn (and any compaction it triggered).
            let previous = turn_task.take();
            let orchestrator = orchestrator.clone();
            let session = session_id.to_string();
            *turn_task = Some(tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                if let Err(e) = orchestrator.run(payload.input).await {
                    tracing::warn!(session_id = %session, error = %e, "turn failed");
                }
            }));
        }

        frame_type::APPROVAL_RESPONSE => {
            let payload: ApprovalResponsePayload = match frame.parse_payload() {
                Ok(p) => p,
                Err(e) => {
                    outbound
                        .send(&Frame::error(format!("invalid approval_response payload: {e}")))
                        .await;
                    return;
                }
            };
            let review = ReviewDecision::parse(&payload.review).unwrap_or_else(|| {
                tracing::warn!(
                    session_id = %session_id,
                    review = %payload.review,
                    "unknown review token, treating as no-continue"
                );
                ReviewDecision::NoContinue
            });

            use crate::runtime::approval::ResolveOutcome;
            match approvals.resolve(review, payload.custom_deny_message) {
                ResolveOutcome::Resolved => {}
                ResolveOutcome::NonePending => {
                    outbound.send(&Frame::error("no approval pending")).await;
                }
                ResolveOutcome::ExplainRequested(request) => {
                    spawn_explain(state.provider.clone(), outbound.clone(), request);
                }
            }
        }

        frame_type::GET_CONTEXT_INFO => {
            let view = {
                let core = core.lock();
                core.context.view(&core.transcript)
            };
            outbound
                .send(&Frame::with_payload(frame_type::CONTEXT_INFO, &view))
                .await;
        }

        frame_type::MANUAL_COMPACT => {
            if turn_task.as_ref().is_some_and(|t| !t.is_finished()) {
                outbound
                    .send(&Frame::error("cannot compact while a turn is in flight"))
                    .await;
                return;
            }
            let claimed = core.lock().context.begin_compaction();
            if !claimed {
                outbound.send(&Frame::error("compaction already running")).await;
                return;
            }
            match context::run_compaction(state.provider.as_ref(), core).await {
                Ok(payload) => {
                    outbound
                        .send(&Frame::with_payload(frame_type::CONTEXT_COMPACTED, &payload))
                        .await;
                }
                Err(e) => {
                    outbound.send(&Frame::error(format!("compaction failed: {e}"))).await;
                }
            }
            core.lock().context.end_compaction();
        }

        other => {
            outbound
                .send(&Frame::error(format!("unknown message type: {other}")))
                .await;
        }
    }
}

/// The explain sub-dialogue: a non-streaming provider call produces an
/// explanation, delivered as an assistant item, and the identical
/// approval request is re-issued. The original promise stays pending.
/// The explanation is transport-only so resume does not replay it.
fn spawn_explain(
    provider: Arc<dyn ProviderAdapter>,
    outbound: OutboundSink,
    request: ApprovalRequestPayload,
) {
    tokio::spawn(async move {
        let prompt = explain_prompt(&request);
        match tokio::time::timeout(EXPLAIN_TIMEOUT, provider.complete(&prompt)).await {
            Ok(Ok(text)) if !text.is_empty() => {
                let item = ConversationItem::assistant_completed(new_item_id(), text);
                outbound.send_unjournaled(&Frame::response_item(&item)).await;
            }
            Ok(Ok(_)) => {
                outbound
                    .send(&Frame::error("explain produced no output"))
                    .await;
            }
            Ok(Err(e)) => {
                outbound.send(&Frame::error(format!("explain failed: {e}"))).await;
            }
            Err(_) => {
                outbound.send(&Frame::error("explain timed out")).await;
            }
        }
        outbound
            .send(&Frame::with_payload(frame_type::APPROVAL_REQUEST, &request))
            .await;
    });
}

fn explain_prompt(request: &ApprovalRequestPayload) -> String {
    let mut prompt = format!(
        "Explain briefly what this command does and what effect approving it \
         would have on the system: `{}`",
        request.command.join(" ")
    );
    if let Some(patch) = &request.apply_patch {
        prompt.push_str(&format!("\n\nIt applies this patch:\n{}", patch.patch));
    }
    prompt
}
