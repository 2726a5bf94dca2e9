//! Error types for the Ariadne domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! (provider, channel, session, tool) has its own error enum, unified under
//! the top-level `Error`.

use thiserror::Error;

/// The top-level error type for all Ariadne operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("All providers failed. Last error: {last}")]
    Exhausted { last: Box<ProviderError> },
}

impl ProviderError {
    /// Default transient-error classification shared by all provider clients.
    ///
    /// Transient: connection refusal/reset, read timeout, deadline exceeded,
    /// HTTP 500/502/503, rate limits (429 or "resource exhausted") and
    /// provider "overloaded" notices. Permanent: HTTP 400/401/403 and
    /// schema-validation failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_)
            | Self::Overloaded(_)
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::StreamInterrupted(_) => true,
            Self::Api { status, message } => {
                if matches!(status, 429 | 500 | 502 | 503) {
                    return true;
                }
                let msg = message.to_ascii_lowercase();
                msg.contains("resource exhausted") || msg.contains("overloaded")
            }
            Self::AuthenticationFailed(_)
            | Self::InvalidRequest(_)
            | Self::NotConfigured(_)
            | Self::Exhausted { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Channel not found: {0}")]
    NotFound(String),

    #[error("Delivery failed on {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt session file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
