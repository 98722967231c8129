//! Session identity, the durable journal, transcript state, and
//! journal-based resume reconstruction.

pub mod identity;
pub mod journal;
pub mod resume;
pub mod transcript;

pub use identity::{generate_session_id, is_valid_session_id};
pub use journal::{Direction, EventType, JournalEvent, SessionJournal};
pub use transcript::Transcript;
