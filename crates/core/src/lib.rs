//! Core domain model for Ariadne.
//!
//! This crate defines the value objects and trait contracts that every other
//! crate builds on: messages and content blocks, the provider streaming
//! abstraction, the tool contract and registry, the channel adapter contract,
//! and the monitor event model. It carries no I/O of its own.

pub mod channel;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

pub use channel::{
    ChannelAdapter, ChannelContext, FileAttachment, InboundMessage, MessageHandler, Responder,
    ResponderAware, SessionContext, SIGNAL_ROLE_SYSTEM, SIGNAL_THINKING,
};
pub use error::{ChannelError, Error, ProviderError, Result, SessionError, ToolError};
pub use event::{Monitor, MonitorEvent, MonitorEventKind};
pub use message::{ContentBlock, ImageSource, ImageSourceKind, Message, Role, ToolCall};
pub use provider::{
    normalize_stop_reason, ChatRequest, ProviderClient, StreamChunk, Usage, STOP_REASON_LENGTH,
    STOP_REASON_STOP,
};
pub use tool::{Tool, ToolBlock, ToolDefinition, ToolOutput, ToolRegistry};
