//! Self-hosted inference daemon provider.
//!
//! Talks to a local model server over its HTTP chat protocol: a single POST
//! to `/api/chat` answered with newline-delimited JSON frames, each carrying
//! incremental message content, optional thinking text, tool calls, and a
//! terminal frame with eval counts and a done reason. No API key involved.

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
use crate::sse::LineBuffer;

const CHUNK_BUFFER: usize = 100;

pub struct LocalClient {
    provider: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    debug_enabled: AtomicBool,
    options: serde_json::Map<String, Value>,
}

impl LocalClient {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        options: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            provider: "local".into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            // The daemon may stall for minutes while a model loads; rely on
            // the engine's deadline instead of a client-side timeout.
            client: reqwest::Client::new(),
            debug_enabled: AtomicBool::new(false),
            options,
        }
    }
}

#[async_trait]
impl ProviderClient for LocalClient {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(&request.messages),
            "stream": true,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(convert_tool).collect());
        }
        if !self.options.is_empty() {
            body["options"] = Value::Object(self.options.clone());
        }

        debug!(provider = %self.provider, model = %self.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
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
        let model = self.model.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut thought_frames: u32 = 0;

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
                    if line.is_empty() {
                        continue;
                    }
                    debugger.write(&line);

                    let frame: Value = match serde_json::from_str(&line) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "Ignoring unparsable daemon frame");
                            continue;
                        }
                    };

                    // Daemon-reported errors arrive in-band.
                    if let Some(message) = frame["error"].as_str() {
                        let _ = tx
                            .send(StreamChunk::stream_error(
                                format!("Stream error: {message}"),
                                ProviderError::StreamInterrupted(message.to_string()),
                            ))
                            .await;
                        return;
                    }

                    let message = &frame["message"];
                    if let Some(thinking) = message["thinking"].as_str() {
                        if !thinking.is_empty() {
                            thought_frames += 1;
                            if tx.send(StreamChunk::thinking(thinking)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if let Some(text) = message["content"].as_str() {
                        if !text.is_empty() && tx.send(StreamChunk::text(text)).await.is_err() {
                            return;
                        }
                    }
                    if let Some(calls) = message["tool_calls"].as_array() {
                        let tool_calls: Vec<ToolCall> = calls
                            .iter()
                            .map(|tc| ToolCall {
                                id: tc["id"].as_str().unwrap_or("").to_string(),
                                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                                arguments: tc["function"]["arguments"].to_string(),
                                // The daemon protocol carries no reasoning
                                // metadata on tool calls.
                                provider_meta: None,
                            })
                            .collect();
                        if !tool_calls.is_empty()
                            && tx.send(StreamChunk::tool_calls(tool_calls)).await.is_err()
                        {
                            return;
                        }
                    }

                    if frame["done"].as_bool() == Some(true) {
                        let prompt = frame["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
                        let completion = frame["eval_count"].as_u64().unwrap_or(0) as u32;
                        let reason = normalize_stop_reason(
                            frame["done_reason"].as_str().unwrap_or("stop"),
                        );
                        let usage = Usage {
                            prompt_tokens: prompt,
                            completion_tokens: completion,
                            total_tokens: prompt + completion,
                            thoughts_tokens: thought_frames,
                            stop_reason: reason.clone(),
                            ..Default::default()
                        };
                        debug!(model = %model, total_tokens = usage.total_tokens, reason = %reason, "Daemon stream complete");
                        let _ = tx.send(StreamChunk::final_chunk(reason, Some(usage))).await;
                        return;
                    }
                }
            }

            // Connection closed without a done frame.
            let _ = tx
                .send(StreamChunk::stream_error(
                    "Stream error: connection closed before completion",
                    ProviderError::StreamInterrupted("connection closed".into()),
                ))
                .await;
        });

        Ok(rx)
    }

    fn set_debug(&self, enabled: bool) {
        self.debug_enabled.store(enabled, Ordering::Relaxed);
    }
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

/// The daemon takes flat text plus a parallel base64 image list per message.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut items = Vec::with_capacity(messages.len());

    for msg in messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let mut item = json!({ "role": role, "content": msg.text_content() });

        if msg.has_images() {
            let images: Vec<Value> = msg
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Image { source } => {
                        source.data.as_ref().map(|d| Value::String(BASE64.encode(d)))
                    }
                    _ => None,
                })
                .collect();
            if !images.is_empty() {
                item["images"] = Value::Array(images);
            }
        }

        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    let args: Value = serde_json::from_str(&tc.arguments)
                        .unwrap_or(Value::Object(Default::default()));
                    json!({
                        "id": tc.id,
                        "function": { "name": tc.name, "arguments": args },
                    })
                })
                .collect();
            item["tool_calls"] = Value::Array(calls);
        }

        items.push(item);
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_flattens_text() {
        let items = convert_messages(&[Message::system("sys"), Message::user("hi")]);
        assert_eq!(items[0]["role"], "system");
        assert_eq!(items[0]["content"], "sys");
        assert_eq!(items[1]["role"], "user");
    }

    #[test]
    fn images_ride_in_parallel_array() {
        let mut msg = Message::user("see");
        msg.push_block(ContentBlock::image(vec![0xAB], "image/png"));
        let items = convert_messages(&[msg]);
        let images = items[0]["images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0], BASE64.encode([0xAB]));
    }

    #[test]
    fn assistant_tool_calls_carry_parsed_arguments() {
        let mut msg = Message::assistant_empty();
        msg.tool_calls.push(ToolCall {
            id: "tc".into(),
            name: "os_control".into(),
            arguments: r#"{"action":"run_command"}"#.into(),
            provider_meta: None,
        });
        let items = convert_messages(&[msg]);
        assert_eq!(
            items[0]["tool_calls"][0]["function"]["arguments"]["action"],
            "run_command"
        );
    }
}
