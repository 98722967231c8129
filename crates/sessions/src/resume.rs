//! Transcript reconstruction from a session journal.
//!
//! The replay retains inbound `user_input` payloads and outbound
//! `response_item` payloads; lifecycle pseudo-events, loading state,
//! context frames, approval traffic, and errors are filtered out.

use tether_domain::item::ConversationItem;
use tether_protocol::{frame_type, Frame, UserInputPayload};

use crate::journal::{Direction, JournalEvent};

/// Reconstruct the ordered conversation-item sequence from journal events.
pub fn reconstruct_items(events: &[JournalEvent]) -> Vec<ConversationItem> {
    let mut items = Vec::new();

    for event in events {
        if event.is_lifecycle() {
            continue;
        }
        let frame: Frame = match serde_json::from_value(event.message_data.clone()) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unframed journal event");
                continue;
            }
        };

        match (event.direction, frame.kind.as_str()) {
            (Direction::Incoming, frame_type::USER_INPUT) => {
                match frame.parse_payload::<UserInputPayload>() {
                    Ok(payload) => items.extend(payload.input),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed user_input payload")
                    }
                }
            }
            (Direction::Outgoing, frame_type::RESPONSE_ITEM) => {
                match frame.parse_payload::<ConversationItem>() {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed response_item payload")
                    }
                }
            }
            _ => {}
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{Direction, EventType, JournalEvent};
    use tether_protocol::LoadingStatePayload;

    fn received(frame: &Frame) -> JournalEvent {
        JournalEvent {
            timestamp: "2026-08-01T00:00:00Z".into(),
            event_type: EventType::WebsocketMessageReceived,
            direction: Direction::Incoming,
            message_data: serde_json::to_value(frame).unwrap(),
        }
    }

    fn sent(frame: &Frame) -> JournalEvent {
        JournalEvent {
            timestamp: "2026-08-01T00:00:01Z".into(),
            event_type: EventType::WebsocketMessageSent,
            direction: Direction::Outgoing,
            message_data: serde_json::to_value(frame).unwrap(),
        }
    }

    fn user_input_frame(text: &str) -> Frame {
        Frame::with_payload(
            frame_type::USER_INPUT,
            &UserInputPayload {
                input: vec![ConversationItem::user_text(text)],
                previous_response_id: None,
            },
        )
    }

    #[test]
    fn retains_user_input_and_response_items_in_order() {
        let assistant = ConversationItem::assistant_completed("m1", "hi");
        let call = ConversationItem::tool_call("c1", "shell", serde_json::json!({"command": ["ls"]}));
        let result = ConversationItem::tool_result("c1", "{\"output\":\"\"}", false);

        let events = vec![
            received(&user_input_frame("run ls")),
            sent(&Frame::with_payload(
                frame_type::LOADING_STATE,
                &LoadingStatePayload { loading: true },
            )),
            sent(&Frame::response_item(&call)),
            sent(&Frame::response_item(&result)),
            sent(&Frame::response_item(&assistant)),
        ];

        let items = reconstruct_items(&events);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].text(), "run ls");
        assert!(matches!(items[1], ConversationItem::ToolCall { .. }));
        assert!(matches!(items[2], ConversationItem::ToolResult { .. }));
        assert_eq!(items[3].text(), "hi");
    }

    #[test]
    fn tool_results_keep_their_preceding_calls() {
        let call = ConversationItem::tool_call("c9", "shell", serde_json::json!({"command": ["ls"]}));
        let result = ConversationItem::tool_result("c9", "out", false);
        let events = vec![
            sent(&Frame::response_item(&call)),
            sent(&Frame::response_item(&result)),
        ];
        let items = reconstruct_items(&events);

        // Every ToolResult call_id has a preceding ToolCall with the same id.
        for (i, item) in items.iter().enumerate() {
            if let ConversationItem::ToolResult { call_id, .. } = item {
                assert!(items[..i].iter().any(|earlier| matches!(
                    earlier,
                    ConversationItem::ToolCall { call_id: c, .. } if c == call_id
                )));
            }
        }
    }

    #[test]
    fn filters_lifecycle_and_non_payload_frames() {
        let lifecycle = JournalEvent {
            timestamp: "2026-08-01T00:00:00Z".into(),
            event_type: EventType::WebsocketMessageReceived,
            direction: Direction::Incoming,
            message_data: serde_json::json!({ "event": "session_connected" }),
        };
        let approval = sent(&Frame::new(frame_type::APPROVAL_REQUEST, None));
        let error = sent(&Frame::error("boom"));
        let events = vec![lifecycle, approval, error];
        assert!(reconstruct_items(&events).is_empty());
    }

    #[test]
    fn inbound_response_item_is_ignored() {
        // Direction matters: a response_item can only be outbound.
        let item = ConversationItem::assistant_completed("m1", "hi");
        let events = vec![received(&Frame::response_item(&item))];
        assert!(reconstruct_items(&events).is_empty());
    }

    #[test]
    fn roundtrip_through_journal_file() {
        use crate::journal::SessionJournal;

        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::open(dir.path(), "feedface").unwrap();
        journal
            .append_lifecycle("session_connected", Direction::Incoming)
            .unwrap();
        let input = user_input_frame("hello");
        journal
            .append_received(&serde_json::to_value(&input).unwrap())
            .unwrap();
        let assistant = ConversationItem::assistant_completed("m1", "hi");
        let reply = Frame::response_item(&assistant);
        journal
            .append_sent(&serde_json::to_value(&reply).unwrap())
            .unwrap();

        let events = SessionJournal::read_events(dir.path(), "feedface").unwrap();
        let items = reconstruct_items(&events);
        assert_eq!(items.len(), 2);
        // Content text survives verbatim.
        assert_eq!(items[0].text(), "hello");
        assert_eq!(items[1], assistant);
    }
}
