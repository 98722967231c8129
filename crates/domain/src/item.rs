//! Conversation items — the provider-agnostic transcript vocabulary.
//!
//! Every item carries a stable string id. Assistant messages sharing an id
//! are fragments of the same logical message and merge by text
//! concatenation in arrival order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A piece of message content. `input_text` on the client→server path,
/// `output_text` on the server→client path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
}

impl ContentPart {
    pub fn text(&self) -> &str {
        match self {
            ContentPart::InputText { text } | ContentPart::OutputText { text } => text,
        }
    }
}

/// Completion state of an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Completed,
    Incomplete,
}

/// One entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    UserMessage {
        id: String,
        content: Vec<ContentPart>,
    },
    AssistantMessage {
        id: String,
        content: Vec<ContentPart>,
        status: MessageStatus,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
        call_id: String,
    },
    ToolResult {
        id: String,
        call_id: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
    Reasoning {
        id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    SystemNotice {
        id: String,
        text: String,
    },
}

/// Generate a fresh item id (UUID v4, simple form).
pub fn new_item_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        ConversationItem::UserMessage {
            id: new_item_id(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    pub fn assistant_fragment(id: impl Into<String>, text: impl Into<String>) -> Self {
        ConversationItem::AssistantMessage {
            id: id.into(),
            content: vec![ContentPart::OutputText { text: text.into() }],
            status: MessageStatus::Incomplete,
        }
    }

    pub fn assistant_completed(id: impl Into<String>, text: impl Into<String>) -> Self {
        ConversationItem::AssistantMessage {
            id: id.into(),
            content: vec![ContentPart::OutputText { text: text.into() }],
            status: MessageStatus::Completed,
        }
    }

    pub fn tool_call(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ConversationItem::ToolCall {
            id: new_item_id(),
            name: name.into(),
            arguments,
            call_id: call_id.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, output: impl Into<String>, is_error: bool) -> Self {
        ConversationItem::ToolResult {
            id: new_item_id(),
            call_id: call_id.into(),
            output: output.into(),
            is_error,
        }
    }

    pub fn system_notice(text: impl Into<String>) -> Self {
        ConversationItem::SystemNotice {
            id: new_item_id(),
            text: text.into(),
        }
    }

    /// The item's stable id.
    pub fn id(&self) -> &str {
        match self {
            ConversationItem::UserMessage { id, .. }
            | ConversationItem::AssistantMessage { id, .. }
            | ConversationItem::ToolCall { id, .. }
            | ConversationItem::ToolResult { id, .. }
            | ConversationItem::Reasoning { id, .. }
            | ConversationItem::SystemNotice { id, .. } => id,
        }
    }

    /// Joined text of all content parts (messages) or the item's text field.
    pub fn text(&self) -> String {
        match self {
            ConversationItem::UserMessage { content, .. }
            | ConversationItem::AssistantMessage { content, .. } => {
                content.iter().map(ContentPart::text).collect()
            }
            ConversationItem::ToolResult { output, .. } => output.clone(),
            ConversationItem::Reasoning { text, .. }
            | ConversationItem::SystemNotice { text, .. } => text.clone(),
            ConversationItem::ToolCall { .. } => String::new(),
        }
    }

    /// Append delta text to an assistant message fragment.
    ///
    /// No-op for other variants.
    pub fn append_text(&mut self, delta: &str) {
        if let ConversationItem::AssistantMessage { content, .. } = self {
            match content.last_mut() {
                Some(ContentPart::OutputText { text }) => text.push_str(delta),
                _ => content.push(ContentPart::OutputText {
                    text: delta.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_wire_shape() {
        let item = ConversationItem::user_text("hello");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "user_message");
        assert_eq!(json["content"][0]["type"], "input_text");
        assert_eq!(json["content"][0]["text"], "hello");
    }

    #[test]
    fn assistant_message_wire_shape() {
        let item = ConversationItem::assistant_completed("m1", "hi");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "assistant_message");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["content"][0]["type"], "output_text");
    }

    #[test]
    fn roundtrip_tool_items() {
        let call = ConversationItem::tool_call("c1", "shell", serde_json::json!({"command": ["ls"]}));
        let result = ConversationItem::tool_result("c1", "ok", false);
        for item in [call, result] {
            let json = serde_json::to_string(&item).unwrap();
            let back: ConversationItem = serde_json::from_str(&json).unwrap();
            assert_eq!(item, back);
        }
    }

    #[test]
    fn append_text_concatenates_in_order() {
        let mut item = ConversationItem::assistant_fragment("m1", "he");
        item.append_text("ll");
        item.append_text("o");
        assert_eq!(item.text(), "hello");
    }

    #[test]
    fn append_text_ignores_non_assistant() {
        let mut item = ConversationItem::user_text("x");
        item.append_text("y");
        assert_eq!(item.text(), "x");
    }
}
