//! Anthropic-style reasoning provider.
//!
//! Speaks the Messages API SSE dialect: typed events
//! (`content_block_start/delta/stop`, `message_delta`, `message_stop`),
//! system prompt as a top-level field, tool use via `tool_use`/`tool_result`
//! content blocks, and extended thinking with trailing signatures. Thinking
//! signatures are preserved on the emitted blocks so multi-turn reasoning
//! fidelity survives serialization.

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
use crate::openai_compat::{classify_status, map_transport_error};
use crate::sse::{sse_data, LineBuffer};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;
const CHUNK_BUFFER: usize = 100;

pub struct AnthropicClient {
    provider: String,
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    debug_enabled: AtomicBool,
    options: serde_json::Map<String, Value>,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        options: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            provider: "anthropic".into(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            debug_enabled: AtomicBool::new(false),
            options,
        }
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let (system, messages) = extract_system(&request.messages);
        let max_tokens = self
            .options
            .get("max_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(&messages),
            "max_tokens": max_tokens,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(convert_tool).collect());
        }
        if let Some(t) = self.options.get("temperature") {
            body["temperature"] = t.clone();
        }
        if let Some(budget) = self.options.get("thinking_budget").and_then(Value::as_u64) {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        body
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        debug!(provider = %self.provider, model = %self.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
            let mut state = StreamState::default();

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
                    debugger.write(data);

                    let event: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "Ignoring unparsable SSE frame");
                            continue;
                        }
                    };

                    if state.handle_event(&event, &tx).await.is_err() {
                        return;
                    }
                    if state.done {
                        return;
                    }
                }
            }

            // Stream ended without message_stop.
            let _ = state.finish(&tx).await;
        });

        Ok(rx)
    }

    fn set_debug(&self, enabled: bool) {
        self.debug_enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Accumulation state across SSE events of one call.
#[derive(Default)]
struct StreamState {
    tool_id: String,
    tool_name: String,
    tool_args: String,
    in_tool_use: bool,
    thinking_signature: Option<String>,
    in_thinking: bool,
    /// Signature of the most recent completed thinking block; tool calls in
    /// the same turn carry it as opaque provider metadata.
    last_signature: Option<String>,
    tool_calls: Vec<ToolCall>,
    stop_reason: String,
    usage: Option<Usage>,
    done: bool,
}

impl StreamState {
    async fn handle_event(
        &mut self,
        event: &Value,
        tx: &mpsc::Sender<StreamChunk>,
    ) -> Result<(), ()> {
        match event["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        self.flush_tool();
                        self.tool_id = block["id"].as_str().unwrap_or("").to_string();
                        self.tool_name = block["name"].as_str().unwrap_or("").to_string();
                        self.tool_args.clear();
                        self.in_tool_use = true;
                    }
                    Some("thinking") => {
                        self.in_thinking = true;
                        self.thinking_signature = None;
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str() {
                            tx.send(StreamChunk::text(text)).await.map_err(|_| ())?;
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta["thinking"].as_str() {
                            tx.send(StreamChunk::thinking(text)).await.map_err(|_| ())?;
                        }
                    }
                    // The signature trails the thinking text deltas.
                    "signature_delta" => {
                        if let Some(sig) = delta["signature"].as_str() {
                            self.thinking_signature
                                .get_or_insert_with(String::new)
                                .push_str(sig);
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            self.tool_args.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                self.flush_tool();
                if self.in_thinking {
                    self.in_thinking = false;
                    if let Some(signature) = self.thinking_signature.take() {
                        self.last_signature = Some(signature.clone());
                        let block = ContentBlock::Thinking {
                            text: String::new(),
                            signature: Some(signature),
                        };
                        tx.send(StreamChunk {
                            content_blocks: vec![block],
                            ..Default::default()
                        })
                        .await
                        .map_err(|_| ())?;
                    }
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = reason.to_string();
                }
                if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
                    let prompt = u["input_tokens"].as_u64().unwrap_or(0) as u32;
                    let completion = u["output_tokens"].as_u64().unwrap_or(0) as u32;
                    self.usage = Some(Usage {
                        prompt_tokens: prompt,
                        completion_tokens: completion,
                        total_tokens: prompt + completion,
                        cached_tokens: u["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
                        ..Default::default()
                    });
                }
            }
            "message_stop" => {
                self.finish(tx).await?;
                self.done = true;
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown provider error")
                    .to_string();
                let err = if message.to_ascii_lowercase().contains("overloaded") {
                    ProviderError::Overloaded(message.clone())
                } else {
                    ProviderError::StreamInterrupted(message.clone())
                };
                tx.send(StreamChunk::stream_error(format!("Stream error: {message}"), err))
                    .await
                    .map_err(|_| ())?;
                self.done = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn flush_tool(&mut self) {
        if self.in_tool_use {
            // A tool call issued after an extended-thinking block must echo
            // the block's signature on later turns; round-trip it verbatim.
            let provider_meta = self.last_signature.as_ref().map(|sig| {
                let mut meta = serde_json::Map::new();
                meta.insert(
                    "thinking_signature".to_string(),
                    Value::String(sig.clone()),
                );
                meta
            });
            self.tool_calls.push(ToolCall {
                id: std::mem::take(&mut self.tool_id),
                name: std::mem::take(&mut self.tool_name),
                arguments: std::mem::take(&mut self.tool_args),
                provider_meta,
            });
            self.in_tool_use = false;
        }
    }

    async fn finish(&mut self, tx: &mpsc::Sender<StreamChunk>) -> Result<(), ()> {
        self.flush_tool();
        if !self.tool_calls.is_empty() {
            tx.send(StreamChunk::tool_calls(std::mem::take(&mut self.tool_calls)))
                .await
                .map_err(|_| ())?;
        }

        let reason = if self.stop_reason.is_empty() {
            "stop".to_string()
        } else {
            normalize_stop_reason(&self.stop_reason)
        };
        let mut usage = self.usage.take().unwrap_or_default();
        usage.stop_reason = reason.clone();
        tx.send(StreamChunk::final_chunk(reason, Some(usage)))
            .await
            .map_err(|_| ())
    }
}

/// The Messages API takes the system prompt as a top-level field.
fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        if msg.role == Role::System {
            system_parts.push(msg.text_content());
        } else {
            rest.push(msg);
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": {
            "type": "object",
            "properties": tool.parameters,
            "required": tool.required,
        },
    })
}

fn convert_messages(messages: &[&Message]) -> Vec<Value> {
    let mut items = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::User => items.push(json!({
                "role": "user",
                "content": convert_blocks(&msg.content),
            })),
            Role::Assistant => {
                let mut blocks = convert_blocks(&msg.content);
                for tc in &msg.tool_calls {
                    let input: Value = serde_json::from_str(&tc.arguments)
                        .unwrap_or(Value::Object(Default::default()));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": input,
                    }));
                }
                items.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Tool => {
                items.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.text_content(),
                    }],
                }));
            }
            Role::System => {}
        }
    }

    items
}

fn convert_blocks(blocks: &[ContentBlock]) -> Vec<Value> {
    let mut out = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => {
                out.push(json!({ "type": "text", "text": text }));
            }
            ContentBlock::Thinking { text, signature } if !text.is_empty() => {
                let mut v = json!({ "type": "thinking", "thinking": text });
                if let Some(sig) = signature {
                    v["signature"] = Value::String(sig.clone());
                }
                out.push(v);
            }
            ContentBlock::Image { source } => {
                if let Some(data) = &source.data {
                    out.push(json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": source.media_type,
                            "data": BASE64.encode(data),
                        },
                    }));
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_extraction_joins_parts() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::system("Be concise"),
            Message::user("Hello"),
        ];
        let (system, rest) = extract_system(&messages);
        assert_eq!(system.as_deref(), Some("You are helpful\n\nBe concise"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn tool_result_becomes_user_block() {
        let msg = Message::tool_result("toolu_1", "os_control", vec![ContentBlock::text("done")]);
        let items = convert_messages(&[&msg]);
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[0]["content"][0]["type"], "tool_result");
        assert_eq!(items[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let mut msg = Message::assistant("Running it");
        msg.tool_calls.push(ToolCall {
            id: "toolu_2".into(),
            name: "os_control".into(),
            arguments: r#"{"action":"run_command","command":"ls"}"#.into(),
            provider_meta: None,
        });
        let items = convert_messages(&[&msg]);
        let blocks = items[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["input"]["command"], "ls");
    }

    #[test]
    fn thinking_blocks_carry_signature_back() {
        let block = ContentBlock::Thinking {
            text: "chain of thought".into(),
            signature: Some("sig".into()),
        };
        let out = convert_blocks(&[block]);
        assert_eq!(out[0]["type"], "thinking");
        assert_eq!(out[0]["signature"], "sig");
    }

    #[tokio::test]
    async fn event_sequence_produces_text_tools_and_final() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut state = StreamState::default();

        let events = [
            json!({"type":"content_block_start","content_block":{"type":"text"}}),
            json!({"type":"content_block_delta","delta":{"type":"text_delta","text":"I'll list it."}}),
            json!({"type":"content_block_stop"}),
            json!({"type":"content_block_start","content_block":{"type":"tool_use","id":"toolu_1","name":"os_control"}}),
            json!({"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"action\":"}}),
            json!({"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"\"run_command\"}"}}),
            json!({"type":"content_block_stop"}),
            json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"input_tokens":10,"output_tokens":5}}),
            json!({"type":"message_stop"}),
        ];
        for event in &events {
            state.handle_event(event, &tx).await.unwrap();
        }
        drop(tx);

        let text = rx.recv().await.unwrap();
        assert!(matches!(&text.content_blocks[0], ContentBlock::Text { text } if text == "I'll list it."));

        let tools = rx.recv().await.unwrap();
        assert_eq!(tools.tool_calls.len(), 1);
        assert_eq!(tools.tool_calls[0].id, "toolu_1");
        assert_eq!(
            tools.tool_calls[0].arguments,
            r#"{"action":"run_command"}"#
        );
        // No thinking block in this turn, so no signature to carry.
        assert!(tools.tool_calls[0].provider_meta.is_none());

        let last = rx.recv().await.unwrap();
        assert!(last.is_final);
        assert_eq!(last.stop_reason, "tool_use");
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 15);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn thinking_signature_emitted_at_block_stop() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut state = StreamState::default();

        let events = [
            json!({"type":"content_block_start","content_block":{"type":"thinking"}}),
            json!({"type":"content_block_delta","delta":{"type":"thinking_delta","thinking":"hmm"}}),
            json!({"type":"content_block_delta","delta":{"type":"signature_delta","signature":"c2ln"}}),
            json!({"type":"content_block_stop"}),
        ];
        for event in &events {
            state.handle_event(event, &tx).await.unwrap();
        }
        drop(tx);

        let thinking = rx.recv().await.unwrap();
        assert!(matches!(&thinking.content_blocks[0], ContentBlock::Thinking { text, .. } if text == "hmm"));

        let sig = rx.recv().await.unwrap();
        assert!(matches!(
            &sig.content_blocks[0],
            ContentBlock::Thinking { signature: Some(s), .. } if s == "c2ln"
        ));
    }

    #[tokio::test]
    async fn tool_call_after_thinking_carries_signature() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut state = StreamState::default();

        let events = [
            json!({"type":"content_block_start","content_block":{"type":"thinking"}}),
            json!({"type":"content_block_delta","delta":{"type":"thinking_delta","thinking":"weighing options"}}),
            json!({"type":"content_block_delta","delta":{"type":"signature_delta","signature":"c2lnLWJ5dGVz"}}),
            json!({"type":"content_block_stop"}),
            json!({"type":"content_block_start","content_block":{"type":"tool_use","id":"toolu_7","name":"os_control"}}),
            json!({"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{\"action\":\"run_command\"}"}}),
            json!({"type":"content_block_stop"}),
            json!({"type":"message_delta","delta":{"stop_reason":"tool_use"}}),
            json!({"type":"message_stop"}),
        ];
        for event in &events {
            state.handle_event(event, &tx).await.unwrap();
        }
        drop(tx);

        // thinking delta, trailing signature block, consolidated tool calls,
        // final chunk.
        let _thinking = rx.recv().await.unwrap();
        let _signature_block = rx.recv().await.unwrap();

        let tools = rx.recv().await.unwrap();
        assert_eq!(tools.tool_calls.len(), 1);
        let meta = tools.tool_calls[0]
            .provider_meta
            .as_ref()
            .expect("tool call after thinking must carry the signature");
        assert_eq!(meta["thinking_signature"], "c2lnLWJ5dGVz");

        let last = rx.recv().await.unwrap();
        assert!(last.is_final);
    }

    #[tokio::test]
    async fn max_tokens_normalizes_to_length() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut state = StreamState::default();
        state
            .handle_event(
                &json!({"type":"message_delta","delta":{"stop_reason":"max_tokens"}}),
                &tx,
            )
            .await
            .unwrap();
        state
            .handle_event(&json!({"type":"message_stop"}), &tx)
            .await
            .unwrap();
        drop(tx);

        let last = rx.recv().await.unwrap();
        assert!(last.is_final);
        assert_eq!(last.stop_reason, "length");
    }
}
