//! Channel adapter contract — the abstraction over transports.
//!
//! A `ChannelAdapter` connects Ariadne to a messaging surface (terminal,
//! WebSocket, chat platform). Adapters normalize platform payloads into
//! `InboundMessage`s and render outbound content-block streams natively.
//! The gateway implements `Responder` on top of the registered adapters.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::message::ContentBlock;

/// Signal name: an LLM call is in flight and no chunk has arrived yet.
pub const SIGNAL_THINKING: &str = "thinking";
/// Signal name: a tool result immediately follows on the stream.
pub const SIGNAL_ROLE_SYSTEM: &str = "role:system";

/// Identity and routing information for one conversation on one channel.
///
/// A session is keyed by `(channel_id, chat_id)`: two chats on the same
/// channel hold independent histories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub channel_id: String,
    pub user_id: String,
    pub chat_id: String,
    pub username: String,
}

impl SessionContext {
    pub fn new(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            username: username.into(),
        }
    }

    /// The session key used by the session manager.
    pub fn session_id(&self) -> String {
        format!("{}_{}", self.channel_id, self.chat_id)
    }
}

/// A file or binary object attached to an inbound message. Either `data`
/// (inline bytes) or `path` (already on local disk) is set.
#[derive(Debug, Clone, Default)]
pub struct FileAttachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Option<Vec<u8>>,
    pub path: Option<PathBuf>,
}

/// The normalized inbound message every adapter produces.
///
/// `retry_count`, `continue_count` and `tool_turn_count` are mutated in place
/// by the engine while it recurses across retries, continuations and tool
/// turns for this one user input.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub session: SessionContext,
    pub content: String,
    pub files: Vec<FileAttachment>,

    /// Original platform payload, if the adapter wants to keep it around.
    pub raw: Option<serde_json::Value>,

    pub retry_count: u32,
    pub continue_count: u32,
    pub tool_turn_count: u32,

    /// Disable tool calling for this request only.
    pub no_tools: bool,

    /// Groups all debug captures of this turn, including recursive calls.
    pub debug_id: String,
}

impl InboundMessage {
    pub fn new(session: SessionContext, content: impl Into<String>) -> Self {
        Self {
            session,
            content: content.into(),
            ..Default::default()
        }
    }
}

/// The standardized lifecycle contract for a transport.
///
/// Adapters that receive images by reference (remote file ids arriving as
/// separate platform events) must debounce media-group arrivals and deliver
/// them as one inbound message.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel instance id (e.g. "web", "terminal").
    fn id(&self) -> &str;

    /// Begin receiving. Must be non-blocking: implementations spawn their own
    /// receive loop and report inbound messages through `ctx.on_message`.
    /// The loop must terminate promptly once `stop` is called.
    async fn start(&self, ctx: Arc<dyn ChannelContext>) -> Result<(), ChannelError>;

    /// Gracefully shut down the receive loop and release resources.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Send a plain text message proactively to a session.
    async fn send(&self, session: &SessionContext, text: &str) -> Result<(), ChannelError>;

    /// Stream content blocks to a session in arrival order.
    async fn stream(
        &self,
        session: &SessionContext,
        blocks: mpsc::Receiver<ContentBlock>,
    ) -> Result<(), ChannelError>;

    /// Receive a named out-of-band UI signal. Adapters without a native
    /// affordance silently accept.
    async fn send_signal(
        &self,
        _session: &SessionContext,
        _signal: &str,
    ) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// The subset of gateway operations the engine uses to reach transports.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_reply(&self, session: &SessionContext, text: &str) -> Result<(), ChannelError>;

    async fn stream_reply(
        &self,
        session: &SessionContext,
        blocks: mpsc::Receiver<ContentBlock>,
    ) -> Result<(), ChannelError>;

    async fn send_signal(&self, session: &SessionContext, signal: &str)
        -> Result<(), ChannelError>;
}

/// What a channel adapter sees of the gateway: the responder surface plus the
/// inbound entry point.
pub trait ChannelContext: Responder {
    /// Deliver a normalized inbound message to the core. Dispatch is
    /// asynchronous; the call returns once the message is handed off.
    fn on_message(&self, channel_id: &str, inbound: InboundMessage);
}

/// Business-logic consumer of inbound messages (the chat handler).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, inbound: InboundMessage);
}

/// Components that need the responder injected after construction (the
/// engine is built before the gateway that answers for it).
pub trait ResponderAware: Send + Sync {
    fn set_responder(&self, responder: Arc<dyn Responder>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_channel_and_chat() {
        let session = SessionContext::new("web", "u1", "global", "alice");
        assert_eq!(session.session_id(), "web_global");
    }

    #[test]
    fn distinct_chats_have_distinct_sessions() {
        let a = SessionContext::new("telegram", "u1", "chat_a", "alice");
        let b = SessionContext::new("telegram", "u1", "chat_b", "alice");
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn inbound_message_counters_start_at_zero() {
        let msg = InboundMessage::new(SessionContext::default(), "hello");
        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.continue_count, 0);
        assert_eq!(msg.tool_turn_count, 0);
        assert!(!msg.no_tools);
        assert!(msg.debug_id.is_empty());
    }
}
