//! The outbound frame path.
//!
//! Two sinks with different granularities share this type: the live sink
//! (every frame, including per-fragment assistant items, to the socket)
//! and the durable sink (the journal). Journal appends complete before
//! the frame is handed to the socket writer, so a crash can journal a
//! frame that was never delivered but never the reverse.

use std::sync::Arc;

use tokio::sync::mpsc;

use tether_protocol::Frame;
use tether_sessions::SessionJournal;

#[derive(Clone)]
pub struct OutboundSink {
    journal: Arc<SessionJournal>,
    tx: mpsc::Sender<String>,
}

impl OutboundSink {
    pub fn new(journal: Arc<SessionJournal>, tx: mpsc::Sender<String>) -> Self {
        Self { journal, tx }
    }

    pub fn journal(&self) -> &SessionJournal {
        &self.journal
    }

    /// Journal the frame, then enqueue it for the socket writer.
    pub async fn send(&self, frame: &Frame) {
        self.journal_frame(frame);
        self.transmit(frame).await;
    }

    /// Enqueue without journaling. Used for streaming assistant-message
    /// fragments (the coalesced message is journaled at turn end) and for
    /// transport-level notices that must not replay on resume.
    pub async fn send_unjournaled(&self, frame: &Frame) {
        self.transmit(frame).await;
    }

    /// Journal without transmitting. Used for the coalesced assistant
    /// message at turn end; the client already received the fragments.
    pub fn journal_only(&self, frame: &Frame) {
        self.journal_frame(frame);
    }

    fn journal_frame(&self, frame: &Frame) {
        match serde_json::to_value(frame) {
            Ok(value) => {
                if let Err(e) = self.journal.append_sent(&value) {
                    tracing::warn!(
                        session_id = self.journal.session_id(),
                        error = %e,
                        "journal append failed"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "frame did not serialize"),
        }
    }

    async fn transmit(&self, frame: &Frame) {
        match serde_json::to_string(frame) {
            Ok(json) => {
                if self.tx.send(json).await.is_err() {
                    tracing::debug!(
                        session_id = self.journal.session_id(),
                        "socket writer gone, dropping frame"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "frame did not serialize"),
        }
    }
}
