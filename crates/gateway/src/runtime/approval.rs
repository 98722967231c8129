//! The approval coordinator and the policy rules deciding when a tool
//! invocation needs human sign-off.
//!
//! State machine per request:
//!
//! ```text
//! Idle ── tool-needs-approval ──▶ Pending
//! Pending ── yes ──▶ Resolved(approve)
//! Pending ── no-exit ──▶ Resolved(deny; stop turn)
//! Pending ── no-continue ──▶ Resolved(deny; continue turn)
//! Pending ── always ──▶ Resolved(approve + session-local elevation)
//! Pending ── explain ──▶ Explaining ──▶ Pending (same command, same promise)
//! Pending ── connection closed ──▶ Resolved(reject)
//! ```
//!
//! At most one Pending approval exists per session; later requests queue
//! on the gate until the earlier one resolves.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tether_domain::config::ApprovalPolicy;
use tether_protocol::{frame_type, ApprovalRequestPayload, Frame, ReviewDecision};

use super::outbound::OutboundSink;

pub const DEFAULT_DENY_MESSAGE: &str = "Command denied by user";

/// Commands `suggest` auto-approves without asking. Deliberately tight:
/// anything that reads file or directory contents still asks.
const READ_ONLY_COMMANDS: &[&str] = &[
    "pwd", "echo", "date", "whoami", "which", "true", "read_chunk",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Approved,
    Denied { message: String, stop_turn: bool },
}

struct PendingApproval {
    payload: ApprovalRequestPayload,
    elevation_key: String,
    respond: oneshot::Sender<ApprovalDecision>,
}

/// Outcome of routing an `approval_response` frame.
pub enum ResolveOutcome {
    Resolved,
    /// The client asked for an explanation; the original promise stays
    /// pending and the same request must be re-issued.
    ExplainRequested(ApprovalRequestPayload),
    NonePending,
}

#[derive(Default)]
pub struct ApprovalCoordinator {
    slot: Mutex<Option<PendingApproval>>,
    /// Serializes approval requests so a second tool call queues behind
    /// the first.
    gate: tokio::sync::Mutex<()>,
    /// Program names elevated by `always` for the rest of the session.
    elevated: Mutex<HashSet<String>>,
}

impl ApprovalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_elevated(&self, key: &str) -> bool {
        self.elevated.lock().contains(key)
    }

    /// The currently pending request, if any.
    pub fn pending_payload(&self) -> Option<ApprovalRequestPayload> {
        self.slot.lock().as_ref().map(|p| p.payload.clone())
    }

    /// Emit an `approval_request` and suspend until the client resolves
    /// it. A dropped connection rejects the promise.
    pub async fn request(
        &self,
        outbound: &OutboundSink,
        payload: ApprovalRequestPayload,
        elevation_key: String,
    ) -> ApprovalDecision {
        let _gate = self.gate.lock().await;

        let (respond, rx) = oneshot::channel();
        *self.slot.lock() = Some(PendingApproval {
            payload: payload.clone(),
            elevation_key,
            respond,
        });
        outbound
            .send(&Frame::with_payload(frame_type::APPROVAL_REQUEST, &payload))
            .await;

        match rx.await {
            Ok(decision) => decision,
            Err(_) => ApprovalDecision::Denied {
                message: "connection closed".into(),
                stop_turn: true,
            },
        }
    }

    /// Route a client review decision to the pending request.
    pub fn resolve(&self, review: ReviewDecision, custom_deny: Option<String>) -> ResolveOutcome {
        let mut slot = self.slot.lock();

        if review == ReviewDecision::Explain {
            return match slot.as_ref() {
                Some(pending) => ResolveOutcome::ExplainRequested(pending.payload.clone()),
                None => ResolveOutcome::NonePending,
            };
        }

        let Some(pending) = slot.take() else {
            return ResolveOutcome::NonePending;
        };

        let deny_message =
            custom_deny.unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_string());
        let decision = match review {
            ReviewDecision::Yes => ApprovalDecision::Approved,
            ReviewDecision::Always => {
                self.elevated.lock().insert(pending.elevation_key.clone());
                ApprovalDecision::Approved
            }
            ReviewDecision::NoExit => ApprovalDecision::Denied {
                message: deny_message,
                stop_turn: true,
            },
            ReviewDecision::NoContinue | ReviewDecision::Explain => ApprovalDecision::Denied {
                message: deny_message,
                stop_turn: false,
            },
        };
        let _ = pending.respond.send(decision);
        ResolveOutcome::Resolved
    }

    /// Drop the pending request (connection closed / session teardown);
    /// the waiting dispatcher sees a rejected promise.
    pub fn reject_pending(&self) {
        self.slot.lock().take();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The effective writable-roots set: configured roots plus the working
/// directory and the OS tempdir.
pub fn writable_roots(workdir: &Path, configured: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = vec![workdir.to_path_buf(), std::env::temp_dir()];
    roots.extend(configured.iter().cloned());
    roots
}

/// Does a plain shell command need approval?
pub fn command_requires_approval(
    policy: ApprovalPolicy,
    command: &[String],
    coordinator: &ApprovalCoordinator,
) -> bool {
    if policy == ApprovalPolicy::FullAuto {
        return false;
    }
    let Some(program) = command.first() else {
        return true;
    };
    if coordinator.is_elevated(program) {
        return false;
    }
    !READ_ONLY_COMMANDS.contains(&program.as_str())
}

/// Does a patch application need approval?
pub fn patch_requires_approval(
    policy: ApprovalPolicy,
    targets: &[PathBuf],
    roots: &[PathBuf],
    coordinator: &ApprovalCoordinator,
) -> bool {
    match policy {
        ApprovalPolicy::FullAuto => false,
        _ if coordinator.is_elevated("apply_patch") => false,
        ApprovalPolicy::AutoEdit => !targets
            .iter()
            .all(|t| roots.iter().any(|r| path_within(t, r))),
        ApprovalPolicy::Suggest => true,
    }
}

/// Lexical containment check (the roots check is advisory and applied at
/// approval time only, so unresolved paths are fine).
fn path_within(path: &Path, root: &Path) -> bool {
    let normalized = normalize(path);
    let root = normalize(root);
    normalized.starts_with(&root)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn outbound(dir: &Path) -> (OutboundSink, mpsc::Receiver<String>) {
        let journal =
            Arc::new(tether_sessions::SessionJournal::open(dir, "feedc0de").unwrap());
        let (tx, rx) = mpsc::channel(16);
        (OutboundSink::new(journal, tx), rx)
    }

    fn payload(cmd: &[&str]) -> ApprovalRequestPayload {
        ApprovalRequestPayload {
            command: cmd.iter().map(|s| s.to_string()).collect(),
            apply_patch: None,
        }
    }

    #[tokio::test]
    async fn approve_resolves_the_waiting_request() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = outbound(dir.path());
        let coordinator = Arc::new(ApprovalCoordinator::new());

        let waiter = {
            let coordinator = coordinator.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                coordinator
                    .request(&sink, payload(&["rm", "-rf", "x"]), "rm".into())
                    .await
            })
        };

        // The approval_request frame reaches the wire first.
        let raw = rx.recv().await.unwrap();
        let frame: Frame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame.kind, "approval_request");
        assert_eq!(frame.payload.unwrap()["command"][0], "rm");

        assert!(matches!(
            coordinator.resolve(ReviewDecision::Yes, None),
            ResolveOutcome::Resolved
        ));
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
        assert!(coordinator.pending_payload().is_none());
    }

    #[tokio::test]
    async fn deny_carries_custom_message_and_stop_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = outbound(dir.path());
        let coordinator = Arc::new(ApprovalCoordinator::new());

        let waiter = {
            let coordinator = coordinator.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                coordinator
                    .request(&sink, payload(&["rm", "x"]), "rm".into())
                    .await
            })
        };
        rx.recv().await.unwrap();

        coordinator.resolve(ReviewDecision::NoExit, Some("not today".into()));
        assert_eq!(
            waiter.await.unwrap(),
            ApprovalDecision::Denied {
                message: "not today".into(),
                stop_turn: true,
            }
        );
    }

    #[tokio::test]
    async fn explain_keeps_the_promise_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = outbound(dir.path());
        let coordinator = Arc::new(ApprovalCoordinator::new());

        let waiter = {
            let coordinator = coordinator.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                coordinator
                    .request(&sink, payload(&["rm", "-rf", "x"]), "rm".into())
                    .await
            })
        };
        rx.recv().await.unwrap();

        // explain returns the same command without resolving.
        match coordinator.resolve(ReviewDecision::Explain, None) {
            ResolveOutcome::ExplainRequested(p) => {
                assert_eq!(p.command, vec!["rm", "-rf", "x"]);
            }
            _ => panic!("expected ExplainRequested"),
        }
        assert!(coordinator.pending_payload().is_some());
        assert!(!waiter.is_finished());

        // A later yes still resolves the original promise.
        coordinator.resolve(ReviewDecision::Yes, None);
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn always_elevates_for_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = outbound(dir.path());
        let coordinator = Arc::new(ApprovalCoordinator::new());

        let waiter = {
            let coordinator = coordinator.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                coordinator
                    .request(&sink, payload(&["cargo", "build"]), "cargo".into())
                    .await
            })
        };
        rx.recv().await.unwrap();
        coordinator.resolve(ReviewDecision::Always, None);
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);

        assert!(coordinator.is_elevated("cargo"));
        let cmd = vec!["cargo".to_string(), "test".to_string()];
        assert!(!command_requires_approval(
            ApprovalPolicy::Suggest,
            &cmd,
            &coordinator
        ));
    }

    #[tokio::test]
    async fn dropped_slot_rejects_the_promise() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = outbound(dir.path());
        let coordinator = Arc::new(ApprovalCoordinator::new());

        let waiter = {
            let coordinator = coordinator.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                coordinator
                    .request(&sink, payload(&["rm", "x"]), "rm".into())
                    .await
            })
        };
        rx.recv().await.unwrap();
        coordinator.reject_pending();

        match waiter.await.unwrap() {
            ApprovalDecision::Denied { message, stop_turn } => {
                assert_eq!(message, "connection closed");
                assert!(stop_turn);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn resolve_without_pending_reports_none() {
        let coordinator = ApprovalCoordinator::new();
        assert!(matches!(
            coordinator.resolve(ReviewDecision::Yes, None),
            ResolveOutcome::NonePending
        ));
        assert!(matches!(
            coordinator.resolve(ReviewDecision::Explain, None),
            ResolveOutcome::NonePending
        ));
    }

    #[test]
    fn suggest_auto_approves_only_the_inert_allow_list() {
        let coordinator = ApprovalCoordinator::new();
        let pwd = vec!["pwd".to_string()];
        let ls = vec!["ls".to_string()];
        let rm = vec!["rm".to_string(), "-rf".to_string(), "x".to_string()];
        assert!(!command_requires_approval(ApprovalPolicy::Suggest, &pwd, &coordinator));
        // Listing a directory still asks.
        assert!(command_requires_approval(ApprovalPolicy::Suggest, &ls, &coordinator));
        assert!(command_requires_approval(ApprovalPolicy::Suggest, &rm, &coordinator));
        assert!(!command_requires_approval(ApprovalPolicy::FullAuto, &rm, &coordinator));
    }

    #[test]
    fn auto_edit_approves_patches_inside_writable_roots() {
        let coordinator = ApprovalCoordinator::new();
        let roots = writable_roots(Path::new("/work"), &[]);
        let inside = vec![PathBuf::from("/work/src/main.rs")];
        let outside = vec![PathBuf::from("/etc/passwd")];
        let escaping = vec![PathBuf::from("/work/../etc/passwd")];

        assert!(!patch_requires_approval(
            ApprovalPolicy::AutoEdit,
            &inside,
            &roots,
            &coordinator
        ));
        assert!(patch_requires_approval(
            ApprovalPolicy::AutoEdit,
            &outside,
            &roots,
            &coordinator
        ));
        assert!(patch_requires_approval(
            ApprovalPolicy::AutoEdit,
            &escaping,
            &roots,
            &coordinator
        ));
        // suggest always asks for patches; full-auto never does.
        assert!(patch_requires_approval(
            ApprovalPolicy::Suggest,
            &inside,
            &roots,
            &coordinator
        ));
        assert!(!patch_requires_approval(
            ApprovalPolicy::FullAuto,
            &outside,
            &roots,
            &coordinator
        ));
    }

    #[test]
    fn tempdir_is_always_writable() {
        let roots = writable_roots(Path::new("/work"), &[]);
        let target = vec![std::env::temp_dir().join("scratch.txt")];
        let coordinator = ApprovalCoordinator::new();
        assert!(!patch_requires_approval(
            ApprovalPolicy::AutoEdit,
            &target,
            &roots,
            &coordinator
        ));
    }
}
