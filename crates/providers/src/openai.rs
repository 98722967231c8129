//! Adapter B — the response-item-structured Responses API.
//!
//! The transcript maps onto a flat `input` sequence (message,
//! function_call, function_call_output) in arrival order; the only
//! structural requirement is that every function_call_output carries the
//! same `call_id` as its function_call. Server-side response storage is
//! disabled (`store: false`) and the full transcript is sent every turn;
//! `previous_response_id` is never used.

use serde_json::Value;

use tether_domain::config::ProviderConfig;
use tether_domain::error::{Error, Result};
use tether_domain::item::ConversationItem;
use tether_domain::stream::{EventStream, StopCause, StreamEvent, TokenTally};
use tether_domain::tool::{ToolDefinition, ToolInvocation};

use crate::sse;
use crate::traits::{ProviderAdapter, TurnRequest};
use crate::util::{from_reqwest, status_error};

const CONTEXT_WINDOW_TOKENS: u32 = 128_000;

pub struct OpenAiAdapter {
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = cfg
            .openai_api_key
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: cfg.openai_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            max_output_tokens: cfg.max_output_tokens,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_body(&self, req: &TurnRequest<'_>, stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": shape_input(req.transcript),
            "stream": stream,
            "store": false,
            "max_output_tokens": self.max_output_tokens,
        });
        if !req.instructions.is_empty() {
            body["instructions"] = Value::String(req.instructions.to_string());
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript → wire input items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn shape_input(items: &[ConversationItem]) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| match item {
            ConversationItem::UserMessage { .. } => Some(serde_json::json!({
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": item.text() }],
            })),
            ConversationItem::AssistantMessage { .. } => Some(serde_json::json!({
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": item.text() }],
            })),
            ConversationItem::ToolCall {
                call_id,
                name,
                arguments,
                ..
            } => Some(serde_json::json!({
                "type": "function_call",
                "call_id": call_id,
                "name": name,
                "arguments": arguments.to_string(),
            })),
            ConversationItem::ToolResult { call_id, output, .. } => Some(serde_json::json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            })),
            ConversationItem::Reasoning { .. } | ConversationItem::SystemNotice { .. } => None,
        })
        .collect()
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The Responses API delivers each function call whole in its
/// `output_item.done` event, so the only state worth keeping across
/// payloads is whether this response asked for tools at all (it decides
/// the close cause) — argument deltas need no assembly here.
#[derive(Default)]
struct ResponseState {
    tool_requested: bool,
}

fn decode_event(payload: &str, state: &mut ResponseState) -> Vec<Result<StreamEvent>> {
    if payload == "[DONE]" {
        return Vec::new();
    }

    let event: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    match event.get("type").and_then(Value::as_str).unwrap_or("") {
        "response.created" => match event
            .get("response")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
        {
            Some(id) => vec![Ok(StreamEvent::Opened {
                response_id: id.to_string(),
            })],
            None => Vec::new(),
        },

        "response.output_text.delta" => match event.get("delta").and_then(Value::as_str) {
            Some(delta) if !delta.is_empty() => vec![Ok(StreamEvent::TextDelta {
                text: delta.to_string(),
            })],
            _ => Vec::new(),
        },

        "response.reasoning_summary_text.delta" => {
            match event.get("delta").and_then(Value::as_str) {
                Some(delta) => vec![Ok(StreamEvent::ReasoningDelta {
                    text: delta.to_string(),
                })],
                None => Vec::new(),
            }
        }

        "response.output_item.done" => match event.get("item") {
            Some(item) if item.get("type").and_then(Value::as_str) == Some("function_call") => {
                state.tool_requested = true;
                let arguments = item
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Object(Default::default()));
                vec![Ok(StreamEvent::ToolRequest(ToolInvocation {
                    call_id: item
                        .get("call_id")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    arguments,
                }))]
            }
            _ => Vec::new(),
        },

        "response.completed" => {
            let cause = if state.tool_requested {
                StopCause::WantsTools
            } else {
                StopCause::EndOfTurn
            };
            let tokens = event.get("response").and_then(response_tokens);
            vec![Ok(StreamEvent::Closed { cause, tokens })]
        }

        "response.failed" | "error" => {
            let message = event
                .get("response")
                .and_then(|r| r.get("error"))
                .or_else(|| event.get("error"))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .or_else(|| event.get("message").and_then(Value::as_str))
                .unwrap_or("unknown error");
            vec![Ok(StreamEvent::Failed {
                message: message.to_string(),
            })]
        }

        _ => Vec::new(),
    }
}

fn response_tokens(response: &Value) -> Option<TokenTally> {
    let usage = response.get("usage")?;
    Some(TokenTally {
        input: usage.get("input_tokens")?.as_u64()? as u32,
        output: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn context_window(&self) -> u32 {
        CONTEXT_WINDOW_TOKENS
    }

    async fn stream_turn(&self, req: TurnRequest<'_>) -> Result<EventStream> {
        let url = format!("{}/v1/responses", self.base_url);
        let body = self.build_body(&req, true);

        tracing::debug!(model = %self.model, items = req.transcript.len(), "openai stream request");

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

        let mut state = ResponseState::default();
        Ok(sse::event_stream(resp, move |data| {
            decode_event(data, &mut state)
        }))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/responses", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": prompt,
            "store": false,
            "max_output_tokens": self.max_output_tokens,
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
        let output = v
            .get("output")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.get("type").and_then(Value::as_str) == Some("message"))
                    .flat_map(|i| {
                        i.get("content")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default()
                    })
                    .filter_map(|c| {
                        (c.get("type").and_then(Value::as_str) == Some("output_text"))
                            .then(|| c.get("text").and_then(Value::as_str).map(str::to_string))
                            .flatten()
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(output)
    }
}
