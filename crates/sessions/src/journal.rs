//! Append-only JSONL session journals.
//!
//! Each session owns `<session-id>.jsonl` under the sessions directory.
//! Every inbound and outbound framed message is appended as a single
//! JSON line; lifecycle markers are recorded as pseudo-events with
//! `message_data.event` set. The journal is the source of truth for
//! resumption.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_domain::error::{Error, Result};

/// The two payload-bearing event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "websocket_message_received")]
    WebsocketMessageReceived,
    #[serde(rename = "websocket_message_sent")]
    WebsocketMessageSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEvent {
    pub timestamp: String,
    pub event_type: EventType,
    pub direction: Direction,
    pub message_data: Value,
}

impl JournalEvent {
    /// True for lifecycle pseudo-events (`session_connected`, `session_ended`).
    pub fn is_lifecycle(&self) -> bool {
        self.message_data.get("event").is_some()
    }
}

/// Writer handle for one session's journal file. Appends are serialized
/// under a lock so the outbound sink and the frame loop can share it.
pub struct SessionJournal {
    session_id: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl SessionJournal {
    /// Open (creating if needed) the journal for a session.
    pub fn open(dir: &Path, session_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{session_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            session_id: session_id.to_owned(),
            path,
            file: Mutex::new(file),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an inbound framed message.
    pub fn append_received(&self, message_data: &Value) -> Result<()> {
        self.append(EventType::WebsocketMessageReceived, Direction::Incoming, message_data)
    }

    /// Append an outbound framed message.
    pub fn append_sent(&self, message_data: &Value) -> Result<()> {
        self.append(EventType::WebsocketMessageSent, Direction::Outgoing, message_data)
    }

    /// Record a lifecycle marker as a pseudo-event.
    pub fn append_lifecycle(&self, event: &str, direction: Direction) -> Result<()> {
        let event_type = match direction {
            Direction::Incoming => EventType::WebsocketMessageReceived,
            Direction::Outgoing => EventType::WebsocketMessageSent,
        };
        self.append(event_type, direction, &serde_json::json!({ "event": event }))
    }

    fn append(&self, event_type: EventType, direction: Direction, message_data: &Value) -> Result<()> {
        let event = JournalEvent {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            direction,
            message_data: message_data.clone(),
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Read back every well-formed event from a session's journal.
    /// Malformed lines are skipped with a warning.
    pub fn read_events(dir: &Path, session_id: &str) -> Result<Vec<JournalEvent>> {
        let path = dir.join(format!("{session_id}.jsonl"));
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        session_id = session_id,
                        error = %e,
                        "skipping malformed journal line"
                    );
                }
            }
        }
        Ok(events)
    }

    /// Archive a session's journal: rename it to the hidden form
    /// `.<session-id>-<timestamp>.jsonl`. Returns the archive path.
    pub fn archive(dir: &Path, session_id: &str) -> Result<PathBuf> {
        let path = dir.join(format!("{session_id}.jsonl"));
        if !path.exists() {
            return Err(Error::Other(format!("no journal for session {session_id}")));
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let archived = dir.join(format!(".{session_id}-{stamp}.jsonl"));
        std::fs::rename(&path, &archived)?;
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::open(dir.path(), "abc123").unwrap();

        journal.append_lifecycle("session_connected", Direction::Incoming).unwrap();
        journal
            .append_received(&serde_json::json!({ "id": "f1", "type": "user_input" }))
            .unwrap();
        journal
            .append_sent(&serde_json::json!({ "id": "f2", "type": "response_item" }))
            .unwrap();

        let events = SessionJournal::read_events(dir.path(), "abc123").unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_lifecycle());
        assert_eq!(events[1].event_type, EventType::WebsocketMessageReceived);
        assert_eq!(events[1].direction, Direction::Incoming);
        assert_eq!(events[2].event_type, EventType::WebsocketMessageSent);
        assert_eq!(events[2].message_data["type"], "response_item");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::open(dir.path(), "abc123").unwrap();
        journal
            .append_sent(&serde_json::json!({ "id": "f1", "type": "loading_state" }))
            .unwrap();

        // Corrupt the file with a half-written line.
        let path = dir.path().join("abc123.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{\"timestamp\": \"2026-");
        std::fs::write(&path, raw).unwrap();

        let events = SessionJournal::read_events(dir.path(), "abc123").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn read_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = SessionJournal::read_events(dir.path(), "nope").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn archive_renames_to_hidden_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::open(dir.path(), "abc123").unwrap();
        journal.append_lifecycle("session_ended", Direction::Outgoing).unwrap();
        drop(journal);

        let archived = SessionJournal::archive(dir.path(), "abc123").unwrap();
        let name = archived.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(".abc123-"));
        assert!(name.ends_with(".jsonl"));
        assert!(!dir.path().join("abc123.jsonl").exists());
    }

    #[test]
    fn archive_missing_journal_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SessionJournal::archive(dir.path(), "ghost").is_err());
    }

    #[test]
    fn event_line_wire_shape() {
        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::open(dir.path(), "abc123").unwrap();
        journal
            .append_received(&serde_json::json!({ "id": "f1", "type": "user_input" }))
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("abc123.jsonl")).unwrap();
        let value: Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["event_type"], "websocket_message_received");
        assert_eq!(value["direction"], "incoming");
        assert_eq!(value["message_data"]["type"], "user_input");
        assert!(value["timestamp"].as_str().is_some());
    }
}
