//! Provider-agnostic streaming vocabulary.
//!
//! Adapters reduce their wire-level SSE traffic to these six events; the
//! orchestrator never sees provider event names. Tool invocations are
//! assembled inside the adapter and surface only once complete, so there
//! are no partial tool-call events at this layer.

use std::pin::Pin;

use crate::error::Result;
use crate::tool::ToolInvocation;

/// The boxed event stream an adapter yields for one provider call.
/// Dropping it aborts the underlying request.
pub type EventStream =
    Pin<Box<dyn futures_core::Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// One step of a streaming provider call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The provider opened a response. `response_id` tags this call's
    /// assistant fragments and feeds `agent_finished`.
    Opened { response_id: String },

    /// Assistant text delta.
    TextDelta { text: String },

    /// Reasoning/thinking delta (provider-dependent).
    ReasoningDelta { text: String },

    /// A fully-assembled tool invocation the server must execute.
    ToolRequest(ToolInvocation),

    /// The provider call finished.
    Closed {
        cause: StopCause,
        tokens: Option<TokenTally>,
    },

    /// The provider reported an error mid-stream.
    Failed { message: String },
}

/// Why a provider call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// The model is done with the turn.
    EndOfTurn,
    /// The model expects the server to execute its tool requests and
    /// re-invoke with the accumulated results.
    WantsTools,
    /// Anything else the provider reported (length caps, filters).
    Other(String),
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTally {
    pub input: u32,
    pub output: u32,
}

impl TokenTally {
    pub fn total(&self) -> u32 {
        self.input + self.output
    }
}
