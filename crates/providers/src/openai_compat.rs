//! OpenAI-compatible chat-completions provider.
//!
//! Speaks the `/v1/chat/completions` SSE dialect used by OpenAI, OpenRouter,
//! DeepSeek, Groq and most self-hosted gateways. Tool-call fragments are
//! accumulated per stream index (the name and the argument text may arrive in
//! separate events) and emitted as one consolidated set before the final
//! chunk. Reasoning tokens are probed from the ad-hoc fields several vendors
//! use (`reasoning`, `reasoning_content`, `thinking`) since the base dialect
//! has no official slot for them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ariadne_core::{
    normalize_stop_reason, ChatRequest, ContentBlock, Message, ProviderClient, ProviderError,
    Role, StreamChunk, ToolCall, ToolDefinition, Usage,
};

use crate::debug::StreamDebugger;
use crate::sse::{sse_data, LineBuffer};

const CHUNK_BUFFER: usize = 100;

pub struct OpenAiCompatClient {
    provider: String,
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    debug_enabled: AtomicBool,
    options: serde_json::Map<String, Value>,
}

impl OpenAiCompatClient {
    pub fn new(
        provider: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        options: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            debug_enabled: AtomicBool::new(false),
            options,
        }
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(convert_tool).collect());
        }

        for (key, value) in &self.options {
            body[key.as_str()] = value.clone();
        }

        body
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(provider = %self.provider, model = %self.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status, message));
        }

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let mut debugger = StreamDebugger::new(
            &self.provider,
            request.debug_id.as_deref(),
            self.debug_enabled.load(Ordering::Relaxed),
        );

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut pending_tools: BTreeMap<u64, PendingToolCall> = BTreeMap::new();
            let mut finish_reason = String::new();
            let mut usage: Option<Usage> = None;

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(StreamChunk::stream_error(
                                format!("Stream error: {e}"),
                                ProviderError::StreamInterrupted(e.to_string()),
                            ))
                            .await;
                        return;
                    }
                };
                lines.push(&chunk);

                while let Some(line) = lines.next_line() {
                    let Some(data) = sse_data(&line) else { continue };
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        finish_stream(&tx, &mut pending_tools, &finish_reason, usage.take()).await;
                        return;
                    }

                    debugger.write(data);

                    let frame: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "Ignoring unparsable SSE frame");
                            continue;
                        }
                    };

                    if let Some(u) = frame.get("usage").filter(|u| !u.is_null()) {
                        usage = Some(parse_usage(u));
                    }

                    // Reasoning content hides in vendor-specific fields; probe
                    // the raw frame before touching the typed delta.
                    if let Some(thought) = probe_reasoning(&frame) {
                        if tx.send(StreamChunk::thinking(thought)).await.is_err() {
                            return;
                        }
                    }

                    let Some(choice) = frame["choices"].get(0) else {
                        continue;
                    };

                    if let Some(reason) = choice["finish_reason"].as_str() {
                        if !reason.is_empty() {
                            finish_reason = reason.to_string();
                        }
                    }

                    let delta = &choice["delta"];
                    if let Some(text) = delta["content"].as_str() {
                        if !text.is_empty()
                            && tx.send(StreamChunk::text(text)).await.is_err()
                        {
                            return;
                        }
                    }

                    if let Some(calls) = delta["tool_calls"].as_array() {
                        for tc in calls {
                            let index = tc["index"].as_u64().unwrap_or(0);
                            let entry = pending_tools.entry(index).or_default();
                            if let Some(id) = tc["id"].as_str() {
                                entry.id = id.to_string();
                            }
                            if let Some(name) = tc["function"]["name"].as_str() {
                                entry.name.push_str(name);
                            }
                            if let Some(args) = tc["function"]["arguments"].as_str() {
                                entry.arguments.push_str(args);
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE]; finish with what we have.
            finish_stream(&tx, &mut pending_tools, &finish_reason, usage.take()).await;
        });

        Ok(rx)
    }

    fn set_debug(&self, enabled: bool) {
        self.debug_enabled.store(enabled, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

async fn finish_stream(
    tx: &mpsc::Sender<StreamChunk>,
    pending: &mut BTreeMap<u64, PendingToolCall>,
    finish_reason: &str,
    usage: Option<Usage>,
) {
    if !pending.is_empty() {
        let calls = std::mem::take(pending)
            .into_values()
            .map(|p| ToolCall {
                id: p.id,
                name: p.name,
                arguments: p.arguments,
                // The chat-completions dialect exposes no per-call reasoning
                // metadata to round-trip.
                provider_meta: None,
            })
            .collect();
        let _ = tx.send(StreamChunk::tool_calls(calls)).await;
    }

    let reason = if finish_reason.is_empty() {
        "stop".to_string()
    } else {
        normalize_stop_reason(finish_reason)
    };
    let mut usage = usage.unwrap_or_default();
    usage.stop_reason = reason.clone();
    let _ = tx.send(StreamChunk::final_chunk(reason, Some(usage))).await;
}

fn parse_usage(u: &Value) -> Usage {
    Usage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        cached_tokens: u["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
        thoughts_tokens: u["completion_tokens_details"]["reasoning_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
        ..Default::default()
    }
}

/// Probe vendor-specific reasoning fields, top-level first, then per-delta.
fn probe_reasoning(frame: &Value) -> Option<String> {
    const FIELDS: [&str; 3] = ["reasoning", "thinking", "reasoning_content"];

    for field in FIELDS {
        if let Some(text) = frame[field].as_str().filter(|t| !t.is_empty()) {
            return Some(text.to_string());
        }
    }
    let delta = frame["choices"].get(0).map(|c| &c["delta"])?;
    for field in FIELDS {
        if let Some(text) = delta[field].as_str().filter(|t| !t.is_empty()) {
            return Some(text.to_string());
        }
    }
    None
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": {
                "type": "object",
                "properties": tool.parameters,
                "required": tool.required,
            },
        },
    })
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut items = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => items.push(json!({
                "role": "system",
                "content": msg.text_content(),
            })),
            Role::Tool => items.push(json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.text_content(),
            })),
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    items.push(json!({
                        "role": "assistant",
                        "content": msg.text_content(),
                    }));
                } else {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect();
                    let mut item = json!({ "role": "assistant", "tool_calls": calls });
                    let text = msg.text_content();
                    if !text.is_empty() {
                        item["content"] = Value::String(text);
                    }
                    items.push(item);
                }
            }
            Role::User => {
                if msg.has_images() {
                    let mut parts = Vec::new();
                    for block in &msg.content {
                        match block {
                            ContentBlock::Text { text } => {
                                parts.push(json!({ "type": "text", "text": text }));
                            }
                            ContentBlock::Image { source } => {
                                let url = match (&source.data, &source.url) {
                                    (Some(data), _) => format!(
                                        "data:{};base64,{}",
                                        source.media_type,
                                        BASE64.encode(data)
                                    ),
                                    (None, Some(url)) => url.clone(),
                                    _ => continue,
                                };
                                parts.push(json!({
                                    "type": "image_url",
                                    "image_url": { "url": url },
                                }));
                            }
                            _ => {}
                        }
                    }
                    items.push(json!({ "role": "user", "content": parts }));
                } else {
                    items.push(json!({
                        "role": "user",
                        "content": msg.text_content(),
                    }));
                }
            }
        }
    }

    items
}

pub(crate) fn map_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

pub(crate) fn classify_status(status: u16, message: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationFailed(message),
        429 => ProviderError::RateLimited(message),
        400 => ProviderError::InvalidRequest(message),
        529 => ProviderError::Overloaded(message),
        _ => ProviderError::Api { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_conversion_wraps_schema() {
        let tool = ToolDefinition {
            name: "os_control".into(),
            description: "Control the host".into(),
            parameters: json!({ "command": { "type": "string" } }),
            required: vec!["command".into()],
        };
        let v = convert_tool(&tool);
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "os_control");
        assert_eq!(v["function"]["parameters"]["type"], "object");
        assert_eq!(v["function"]["parameters"]["required"][0], "command");
    }

    #[test]
    fn message_conversion_tool_pairing() {
        let mut assistant = Message::assistant_empty();
        assistant.tool_calls.push(ToolCall {
            id: "call_1".into(),
            name: "os_control".into(),
            arguments: r#"{"action":"run_command"}"#.into(),
            provider_meta: None,
        });
        let tool_msg = Message::tool_result("call_1", "os_control", vec![ContentBlock::text("ok")]);

        let items = convert_messages(&[assistant, tool_msg]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(items[1]["role"], "tool");
        assert_eq!(items[1]["tool_call_id"], "call_1");
        assert_eq!(items[1]["content"], "ok");
    }

    #[test]
    fn user_images_become_data_uris() {
        let mut msg = Message::user("look at this");
        msg.push_block(ContentBlock::image(vec![1, 2], "image/png"));
        let items = convert_messages(&[msg]);
        let parts = items[0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn reasoning_probe_prefers_top_level() {
        let frame = json!({ "reasoning": "top", "choices": [{ "delta": { "thinking": "nested" } }] });
        assert_eq!(probe_reasoning(&frame).as_deref(), Some("top"));

        let frame = json!({ "choices": [{ "delta": { "reasoning_content": "nested" } }] });
        assert_eq!(probe_reasoning(&frame).as_deref(), Some("nested"));

        let frame = json!({ "choices": [{ "delta": { "content": "plain" } }] });
        assert_eq!(probe_reasoning(&frame), None);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, "no".into()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            classify_status(429, "slow down".into()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(400, "bad schema".into()),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_status(503, "down".into()),
            ProviderError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn usage_parsing_includes_details() {
        let u = parse_usage(&json!({
            "prompt_tokens": 10,
            "completion_tokens": 20,
            "total_tokens": 30,
            "prompt_tokens_details": { "cached_tokens": 4 },
            "completion_tokens_details": { "reasoning_tokens": 7 },
        }));
        assert_eq!(u.total_tokens, 30);
        assert_eq!(u.cached_tokens, 4);
        assert_eq!(u.thoughts_tokens, 7);
    }

    #[tokio::test]
    async fn finish_stream_emits_tools_then_final() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut pending = BTreeMap::new();
        pending.insert(
            0,
            PendingToolCall {
                id: "call_1".into(),
                name: "os_control".into(),
                arguments: r#"{"action":"run_command","command":"ls"}"#.into(),
            },
        );

        finish_stream(&tx, &mut pending, "tool_calls", None).await;
        drop(tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "os_control");

        let last = rx.recv().await.unwrap();
        assert!(last.is_final);
        assert_eq!(last.stop_reason, "tool_calls");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn finish_stream_normalizes_length() {
        let (tx, mut rx) = mpsc::channel(4);
        finish_stream(&tx, &mut BTreeMap::new(), "max_tokens", None).await;
        let last = rx.recv().await.unwrap();
        assert_eq!(last.stop_reason, "length");
        assert_eq!(last.usage.unwrap().stop_reason, "length");
    }
}
