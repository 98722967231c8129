//! Per-session runtime: the orchestrator, context manager, approval
//! coordinator, tool dispatcher, and the session glue binding them to a
//! socket.

pub mod approval;
pub mod context;
pub mod dispatch;
pub mod orchestrator;
pub mod outbound;
pub mod session;

use tether_sessions::Transcript;

use self::context::ContextManager;
use self::orchestrator::FragmentBuffer;

/// Mutable session state. Mutations happen under one logical lock per
/// session; the lock is never held across an await point.
pub struct SessionCore {
    pub transcript: Transcript,
    pub fragments: FragmentBuffer,
    pub context: ContextManager,
    /// Provider message id of the most recent stream; reported in
    /// `agent_finished`.
    pub response_id: Option<String>,
}

impl SessionCore {
    pub fn new(context: ContextManager) -> Self {
        Self {
            transcript: Transcript::new(),
            fragments: FragmentBuffer::new(),
            context,
            response_id: None,
        }
    }
}
