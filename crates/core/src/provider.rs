//! Provider trait — the abstraction over streaming LLM back-ends.
//!
//! A `ProviderClient` turns a conversation into a lazy sequence of
//! `StreamChunk`s. Start failures are returned synchronously; once the
//! stream has begun, failures arrive as `raw_error`-bearing chunks and the
//! sequence terminates.
//!
//! Implementations: OpenAI-compatible chat completions, Anthropic-style
//! reasoning, self-hosted inference daemons, and the failover composite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message, ToolCall};
use crate::tool::ToolDefinition;

/// Normalized stop reason: natural completion.
pub const STOP_REASON_STOP: &str = "stop";
/// Normalized stop reason: output truncated by the token limit.
pub const STOP_REASON_LENGTH: &str = "length";

/// Map a provider's native finish reason onto the closed normalized set:
/// natural-stop tokens become `stop`, max-token signals become `length`,
/// anything else is passed through lowercased.
pub fn normalize_stop_reason(raw: &str) -> String {
    let lowered = raw.to_ascii_lowercase();
    match lowered.as_str() {
        "stop" | "end_turn" | "stop_sequence" | "done" => STOP_REASON_STOP.to_string(),
        "length" | "max_tokens" | "max_output_tokens" | "model_length" => {
            STOP_REASON_LENGTH.to_string()
        }
        _ => lowered,
    }
}

/// Token usage statistics. Counters a provider does not report stay zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub thoughts_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cached_tokens: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stop_reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt_detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub completion_detail: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// One incremental event in a provider stream.
///
/// Every field is optional in spirit: intermediate chunks carry content or
/// tool-call deltas, the final chunk carries `is_final` with `stop_reason`
/// and `usage`, and a transport failure mid-stream arrives as `raw_error`.
#[derive(Debug, Default)]
pub struct StreamChunk {
    /// Newly emitted content blocks (incremental).
    pub content_blocks: Vec<ContentBlock>,

    /// Newly consolidated tool calls.
    pub tool_calls: Vec<ToolCall>,

    /// Terminal marker; no chunks follow.
    pub is_final: bool,

    /// Normalized stop reason, set on the final chunk.
    pub stop_reason: String,

    /// Usage snapshot; the engine keeps the most recent one.
    pub usage: Option<Usage>,

    /// Transient error text shown to the user inline.
    pub error_text: String,

    /// Transport-level failure; terminates the sequence.
    pub raw_error: Option<ProviderError>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_blocks: vec![ContentBlock::text(text)],
            ..Default::default()
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            content_blocks: vec![ContentBlock::thinking(text)],
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    pub fn final_chunk(stop_reason: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            is_final: true,
            stop_reason: stop_reason.into(),
            usage,
            ..Default::default()
        }
    }

    /// A terminal failure chunk. `error_text` is shown to the user,
    /// `raw_error` drives the engine's retry classification.
    pub fn stream_error(error_text: impl Into<String>, err: ProviderError) -> Self {
        Self {
            error_text: error_text.into(),
            raw_error: Some(err),
            ..Default::default()
        }
    }
}

/// A single streaming chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,

    /// Tools offered to the model; empty disables tool calling for the call.
    pub tools: Vec<ToolDefinition>,

    /// Identifier namespacing debug captures for this turn. Recursive calls
    /// within one user input share the same id.
    pub debug_id: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// The provider client contract.
///
/// The caller awaits either the first chunk or a start error; once
/// `stream_chat` returns `Ok`, errors are delivered in-band. Dropping the
/// receiver cancels the underlying call (the producer task exits on its next
/// failed send).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Human-readable provider name (e.g. "openai", "anthropic", "local").
    fn name(&self) -> &str;

    /// Begin a streaming chat call.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<mpsc::Receiver<StreamChunk>, ProviderError>;

    /// Classify an error for the engine's retry path.
    fn is_transient_error(&self, err: &ProviderError) -> bool {
        err.is_transient()
    }

    /// Toggle raw-frame capture. Set once at construction; implementations
    /// may ignore it.
    fn set_debug(&self, _enabled: bool) {}
}
