//! LLM provider adapters.
//!
//! The orchestrator is polymorphic over [`ProviderAdapter`]; each adapter
//! owns the translation between the transcript's conversation items and
//! its wire format, including the provider-specific structural invariants
//! (tool results as user messages for the conversation-shaped API, flat
//! item sequences for the response-item-shaped API).

pub mod anthropic;
pub mod openai;
pub mod registry;
mod sse;
pub mod traits;
mod util;

pub use registry::{build_adapter, detect, AdapterKind};
pub use traits::{ProviderAdapter, TurnRequest};
