use serde::{Deserialize, Serialize};
use serde_json::Value;

use tether_domain::item::ConversationItem;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One wire frame. `kind` is the message type string; `payload` is
/// type-specific JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Frame {
    pub fn new(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            kind: kind.into(),
            payload,
        }
    }

    /// Build an outbound frame from a serializable payload.
    pub fn with_payload<T: Serialize>(kind: &str, payload: &T) -> Self {
        Self::new(kind, serde_json::to_value(payload).ok())
    }

    /// A `response_item` frame carrying one conversation item.
    pub fn response_item(item: &ConversationItem) -> Self {
        Self::with_payload(frame_type::RESPONSE_ITEM, item)
    }

    /// An `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_payload(
            frame_type::ERROR,
            &ErrorPayload {
                message: message.into(),
                details: None,
            },
        )
    }

    /// Deserialize the payload into a typed value.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone().unwrap_or(Value::Null))
    }
}

/// The complete set of wire message types.
pub mod frame_type {
    // Client → Server
    pub const USER_INPUT: &str = "user_input";
    pub const APPROVAL_RESPONSE: &str = "approval_response";
    pub const GET_CONTEXT_INFO: &str = "get_context_info";
    pub const MANUAL_COMPACT: &str = "manual_compact";

    // Server → Client
    pub const RESPONSE_ITEM: &str = "response_item";
    pub const LOADING_STATE: &str = "loading_state";
    pub const APPROVAL_REQUEST: &str = "approval_request";
    pub const AGENT_FINISHED: &str = "agent_finished";
    pub const CONTEXT_INFO: &str = "context_info";
    pub const CONTEXT_COMPACTED: &str = "context_compacted";
    pub const ERROR: &str = "error";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → Server payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputPayload {
    pub input: Vec<ConversationItem>,
    /// Accepted for wire compatibility; the server is stateless at the
    /// provider layer and never reads it.
    #[serde(
        default,
        rename = "previousResponseId",
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponsePayload {
    pub review: String,
    #[serde(default, rename = "applyPatch", skip_serializing_if = "Option::is_none")]
    pub apply_patch: Option<Value>,
    #[serde(
        default,
        rename = "customDenyMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_deny_message: Option<String>,
}

/// The canonical review decisions carried by `approval_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Yes,
    NoExit,
    NoContinue,
    Always,
    Explain,
}

impl ReviewDecision {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "yes" => Some(ReviewDecision::Yes),
            "no-exit" => Some(ReviewDecision::NoExit),
            "no-continue" => Some(ReviewDecision::NoContinue),
            "always" => Some(ReviewDecision::Always),
            "explain" => Some(ReviewDecision::Explain),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → Client payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingStatePayload {
    pub loading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequestPayload {
    pub command: Vec<String>,
    #[serde(rename = "applyPatch", skip_serializing_if = "Option::is_none")]
    pub apply_patch: Option<ApplyPatchRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyPatchRequest {
    pub patch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFinishedPayload {
    #[serde(rename = "responseId")]
    pub response_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfoPayload {
    pub token_count: u64,
    pub usage_percent: f64,
    pub transcript_length: usize,
    pub max_tokens: u64,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextCompactedPayload {
    pub old_token_count: u64,
    pub new_token_count: u64,
    pub reduction_percent: f64,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_wire_shape() {
        let frame = Frame::with_payload(
            frame_type::LOADING_STATE,
            &LoadingStatePayload { loading: true },
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "loading_state");
        assert_eq!(json["payload"]["loading"], true);
        assert!(json["id"].as_str().is_some_and(|s| !s.is_empty()));
    }

    #[test]
    fn frame_without_payload_omits_field() {
        let frame = Frame::new(frame_type::GET_CONTEXT_INFO, None);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("payload"));
    }

    #[test]
    fn user_input_parses_with_and_without_previous_response_id() {
        let raw = r#"{
            "id": "f1",
            "type": "user_input",
            "payload": {
                "input": [
                    { "type": "user_message", "id": "u1",
                      "content": [{ "type": "input_text", "text": "hello" }] }
                ],
                "previousResponseId": "resp_1"
            }
        }"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        let payload: UserInputPayload = frame.parse_payload().unwrap();
        assert_eq!(payload.input.len(), 1);
        assert_eq!(payload.previous_response_id.as_deref(), Some("resp_1"));

        let raw = r#"{ "id": "f2", "type": "user_input", "payload": { "input": [] } }"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        let payload: UserInputPayload = frame.parse_payload().unwrap();
        assert!(payload.previous_response_id.is_none());
    }

    #[test]
    fn review_decision_canonical_tokens() {
        assert_eq!(ReviewDecision::parse("yes"), Some(ReviewDecision::Yes));
        assert_eq!(ReviewDecision::parse("no-exit"), Some(ReviewDecision::NoExit));
        assert_eq!(
            ReviewDecision::parse("no-continue"),
            Some(ReviewDecision::NoContinue)
        );
        assert_eq!(ReviewDecision::parse("always"), Some(ReviewDecision::Always));
        assert_eq!(ReviewDecision::parse("explain"), Some(ReviewDecision::Explain));
        assert_eq!(ReviewDecision::parse("YES"), None);
    }

    #[test]
    fn context_payloads_use_camel_case() {
        let payload = ContextCompactedPayload {
            old_token_count: 100,
            new_token_count: 20,
            reduction_percent: 80.0,
            strategy: "threshold".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["oldTokenCount"], 100);
        assert_eq!(json["newTokenCount"], 20);
        assert_eq!(json["reductionPercent"], 80.0);
    }

    #[test]
    fn approval_request_roundtrip() {
        let payload = ApprovalRequestPayload {
            command: vec!["rm".into(), "-rf".into(), "x".into()],
            apply_patch: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: ApprovalRequestPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }
}
