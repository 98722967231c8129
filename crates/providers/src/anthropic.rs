//! Adapter A — the conversation-structured Messages API.
//!
//! Structural invariants enforced here: system text travels in the
//! top-level `system` field; assistant text and tool-use blocks share one
//! assistant message; tool results are appended as user messages with
//! `tool_result` content blocks immediately after the assistant message
//! carrying the matching `tool_use` blocks.

use serde_json::Value;

use tether_domain::config::ProviderConfig;
use tether_domain::error::{Error, Result};
use tether_domain::item::ConversationItem;
use tether_domain::stream::{EventStream, StopCause, StreamEvent, TokenTally};
use tether_domain::tool::{ToolDefinition, ToolInvocation};

use crate::sse;
use crate::traits::{ProviderAdapter, TurnRequest};
use crate::util::{from_reqwest, status_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONTEXT_WINDOW_TOKENS: u32 = 200_000;

pub struct AnthropicAdapter {
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = cfg
            .anthropic_api_key
            .clone()
            .ok_or_else(|| Error::Config("ANTHROPIC_API_KEY is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: cfg.anthropic_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            max_output_tokens: cfg.max_output_tokens,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &TurnRequest<'_>, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": shape_messages(req.transcript),
            "stream": stream,
        });
        if !req.instructions.is_empty() {
            body["system"] = Value::String(req.instructions.to_string());
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript → wire messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Re-shape the flat item transcript into the alternating message list
/// the Messages API expects.
pub(crate) fn shape_messages(items: &[ConversationItem]) -> Vec<Value> {
    let mut messages: Vec<Value> = Vec::new();

    fn push_block(messages: &mut Vec<Value>, role: &str, block: Value) {
        if let Some(last) = messages.last_mut() {
            if last["role"] == role {
                if let Some(content) = last["content"].as_array_mut() {
                    content.push(block);
                    return;
                }
            }
        }
        messages.push(serde_json::json!({ "role": role, "content": [block] }));
    }

    for item in items {
        match item {
            ConversationItem::UserMessage { .. } => {
                let text = item.text();
                push_block(
                    &mut messages,
                    "user",
                    serde_json::json!({ "type": "text", "text": text }),
                );
            }
            ConversationItem::AssistantMessage { .. } => {
                let text = item.text();
                if !text.is_empty() {
                    push_block(
                        &mut messages,
                        "assistant",
                        serde_json::json!({ "type": "text", "text": text }),
                    );
                }
            }
            ConversationItem::ToolCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                push_block(
                    &mut messages,
                    "assistant",
                    serde_json::json!({
                        "type": "tool_use",
                        "id": call_id,
                        "name": name,
                        "input": arguments,
                    }),
                );
            }
            ConversationItem::ToolResult {
                call_id,
                output,
                is_error,
                ..
            } => {
                push_block(
                    &mut messages,
                    "user",
                    serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": output,
                        "is_error": is_error,
                    }),
                );
            }
            ConversationItem::Reasoning { .. } | ConversationItem::SystemNotice { .. } => {}
        }
    }

    messages
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A `tool_use` content block whose `input_json_delta` payloads are
/// still arriving.
struct OpenToolUse {
    index: u64,
    call_id: String,
    name: String,
    input_json: String,
}

impl OpenToolUse {
    fn finish(self) -> ToolInvocation {
        let arguments = serde_json::from_str(&self.input_json)
            .unwrap_or_else(|_| Value::Object(Default::default()));
        ToolInvocation {
            call_id: self.call_id,
            name: self.name,
            arguments,
        }
    }
}

/// Reduces Messages-API SSE payloads to [`StreamEvent`]s.
///
/// Content blocks arrive strictly in sequence, so at most one tool_use
/// block is open at any moment. The stop reason and token counts are
/// collected along the way and reported in a single `Closed` event at
/// `message_stop`.
#[derive(Default)]
struct EventDecoder {
    open_tool: Option<OpenToolUse>,
    input_tokens: u32,
    output_tokens: u32,
    stop: Option<StopCause>,
}

impl EventDecoder {
    fn decode(&mut self, payload: &str) -> Vec<Result<StreamEvent>> {
        let event: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => self.on_message_start(&event),
            "content_block_start" => self.on_block_start(&event),
            "content_block_delta" => self.on_block_delta(&event),
            "content_block_stop" => self.on_block_stop(&event),
            "message_delta" => self.on_message_delta(&event),
            "message_stop" => self.on_message_stop(),
            "error" => {
                let message = event
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                vec![Ok(StreamEvent::Failed {
                    message: message.to_string(),
                })]
            }
            // ping and future event types
            _ => Vec::new(),
        }
    }

    fn on_message_start(&mut self, event: &Value) -> Vec<Result<StreamEvent>> {
        let Some(message) = event.get("message") else {
            return Vec::new();
        };
        if let Some(input) = message
            .get("usage")
            .and_then(|u| u.get("input_tokens"))
            .and_then(Value::as_u64)
        {
            self.input_tokens = input as u32;
        }
        match message.get("id").and_then(Value::as_str) {
            Some(id) => vec![Ok(StreamEvent::Opened {
                response_id: id.to_string(),
            })],
            None => Vec::new(),
        }
    }

    fn on_block_start(&mut self, event: &Value) -> Vec<Result<StreamEvent>> {
        let Some(block) = event.get("content_block") else {
            return Vec::new();
        };
        if block.get("type").and_then(Value::as_str) == Some("tool_use") {
            self.open_tool = Some(OpenToolUse {
                index: event.get("index").and_then(Value::as_u64).unwrap_or(0),
                call_id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                input_json: String::new(),
            });
        }
        Vec::new()
    }

    fn on_block_delta(&mut self, event: &Value) -> Vec<Result<StreamEvent>> {
        let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
        let Some(delta) = event.get("delta") else {
            return Vec::new();
        };
        match delta.get("type").and_then(Value::as_str).unwrap_or("") {
            "text_delta" => match delta.get("text").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => vec![Ok(StreamEvent::TextDelta {
                    text: text.to_string(),
                })],
                _ => Vec::new(),
            },
            "thinking_delta" => match delta.get("thinking").and_then(Value::as_str) {
                Some(text) => vec![Ok(StreamEvent::ReasoningDelta {
                    text: text.to_string(),
                })],
                None => Vec::new(),
            },
            "input_json_delta" => {
                if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                    if let Some(tool) = self.open_tool.as_mut() {
                        if tool.index == index {
                            tool.input_json.push_str(partial);
                        }
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_block_stop(&mut self, event: &Value) -> Vec<Result<StreamEvent>> {
        let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
        match self.open_tool.take_if(|tool| tool.index == index) {
            Some(tool) => vec![Ok(StreamEvent::ToolRequest(tool.finish()))],
            None => Vec::new(),
        }
    }

    fn on_message_delta(&mut self, event: &Value) -> Vec<Result<StreamEvent>> {
        if let Some(output) = event
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
            .and_then(Value::as_u64)
        {
            self.output_tokens = output as u32;
        }
        if let Some(reason) = event
            .get("delta")
            .and_then(|d| d.get("stop_reason"))
            .and_then(Value::as_str)
        {
            self.stop = Some(stop_cause(reason));
        }
        Vec::new()
    }

    fn on_message_stop(&mut self) -> Vec<Result<StreamEvent>> {
        let tokens = (self.input_tokens > 0 || self.output_tokens > 0).then(|| TokenTally {
            input: self.input_tokens,
            output: self.output_tokens,
        });
        vec![Ok(StreamEvent::Closed {
            cause: self.stop.take().unwrap_or(StopCause::EndOfTurn),
            tokens,
        })]
    }
}

fn stop_cause(reason: &str) -> StopCause {
    match reason {
        "end_turn" | "stop_sequence" => StopCause::EndOfTurn,
        "tool_use" => StopCause::WantsTools,
        other => StopCause::Other(other.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn context_window(&self) -> u32 {
        CONTEXT_WINDOW_TOKENS
    }

    async fn stream_turn(&self, req: TurnRequest<'_>) -> Result<EventStream> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req, true);

        tracing::debug!(model = %self.model, messages = req.transcript.len(), "anthropic stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(status_error(self.name(), status, &text));
        }

        let mut decoder = EventDecoder::default();
        Ok(sse::event_stream(resp, move |data| decoder.decode(data)))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(status_error(self.name(), status, &text));
        }

        let v: Value = serde_json::from_str(&text)?;
        let content = v
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b.get("type").and_then(Value::as_str) == Some("text"))
                            .then(|| b.get("text").and_then(Value::as_str))
                            .flatten()
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_become_user_messages_after_the_tool_use() {
        let items = vec![
            ConversationItem::user_text("run ls"),
            ConversationItem::assistant_completed("m1", "running it"),
            ConversationItem::tool_call("call_1", "shell", serde_json::json!({"command": ["ls"]})),
            ConversationItem::tool_result("call_1", "{\"output\":\"a.txt\"}", false),
            ConversationItem::assistant_completed("m2", "there is one file"),
        ];
        let messages = shape_messages(&items);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "user");

        // Assistant text and the tool_use block share one message.
        assert_eq!(messages[1]["role"], "assistant");
        let blocks = messages[1]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["id"], "call_1");

        // The result rides a user message immediately after.
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");

        assert_eq!(messages[3]["role"], "assistant");
    }

    #[test]
    fn consecutive_tool_results_merge_into_one_user_message() {
        let items = vec![
            ConversationItem::tool_call("c1", "shell", serde_json::json!({})),
            ConversationItem::tool_call("c2", "shell", serde_json::json!({})),
            ConversationItem::tool_result("c1", "one", false),
            ConversationItem::tool_result("c2", "two", true),
        ];
        let messages = shape_messages(&items);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
        let results = messages[1]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["is_error"], true);
    }

    #[test]
    fn reasoning_and_notices_are_dropped_from_the_wire() {
        let items = vec![
            ConversationItem::user_text("hi"),
            ConversationItem::Reasoning {
                id: "r1".into(),
                text: "thinking".into(),
                duration_ms: Some(5),
            },
            ConversationItem::system_notice("stream hiccup"),
        ];
        let messages = shape_messages(&items);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn decoder_opens_streams_text_and_closes_once() {
        let mut decoder = EventDecoder::default();

        let events = decoder.decode(
            r#"{"type":"message_start","message":{"id":"msg_01","usage":{"input_tokens":12}}}"#,
        );
        assert!(matches!(
            &events[0],
            Ok(StreamEvent::Opened { response_id }) if response_id == "msg_01"
        ));

        let events = decoder.decode(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        );
        assert!(matches!(&events[0], Ok(StreamEvent::TextDelta { text }) if text == "hi"));

        // Stop reason and output tokens are absorbed silently...
        let events = decoder.decode(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
        );
        assert!(events.is_empty());

        // ...and reported once, at message_stop.
        let events = decoder.decode(r#"{"type":"message_stop"}"#);
        match &events[0] {
            Ok(StreamEvent::Closed { cause, tokens }) => {
                assert_eq!(*cause, StopCause::EndOfTurn);
                let tokens = tokens.unwrap();
                assert_eq!(tokens.input, 12);
                assert_eq!(tokens.output, 3);
                assert_eq!(tokens.total(), 15);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decoder_assembles_tool_use_blocks() {
        let mut decoder = EventDecoder::default();

        assert!(decoder
            .decode(
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"shell"}}"#,
            )
            .is_empty());
        assert!(decoder
            .decode(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"command\":"}}"#,
            )
            .is_empty());
        assert!(decoder
            .decode(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"[\"ls\"]}"}}"#,
            )
            .is_empty());

        let events = decoder.decode(r#"{"type":"content_block_stop","index":1}"#);
        match &events[0] {
            Ok(StreamEvent::ToolRequest(invocation)) => {
                assert_eq!(invocation.call_id, "toolu_1");
                assert_eq!(invocation.name, "shell");
                assert_eq!(invocation.arguments["command"][0], "ls");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn stop_of_a_text_block_produces_nothing() {
        let mut decoder = EventDecoder::default();
        // No tool_use block was opened at this index.
        assert!(decoder
            .decode(r#"{"type":"content_block_stop","index":0}"#)
            .is_empty());
    }

    #[test]
    fn tool_use_stop_reason_requests_reinvocation() {
        let mut decoder = EventDecoder::default();
        decoder.decode(r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#);
        let events = decoder.decode(r#"{"type":"message_stop"}"#);
        assert!(matches!(
            &events[0],
            Ok(StreamEvent::Closed { cause: StopCause::WantsTools, .. })
        ));
    }

    #[test]
    fn unfamiliar_stop_reasons_are_preserved() {
        assert_eq!(stop_cause("max_tokens"), StopCause::Other("max_tokens".into()));
        assert_eq!(stop_cause("end_turn"), StopCause::EndOfTurn);
        assert_eq!(stop_cause("tool_use"), StopCause::WantsTools);
    }

    #[test]
    fn provider_error_events_surface() {
        let mut decoder = EventDecoder::default();
        let events = decoder.decode(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"overloaded"}}"#,
        );
        assert!(matches!(
            &events[0],
            Ok(StreamEvent::Failed { message }) if message == "overloaded"
        ));
    }
}
