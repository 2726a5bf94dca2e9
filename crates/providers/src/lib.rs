//! LLM provider clients for Ariadne.
//!
//! Every client implements `ariadne_core::ProviderClient`: it validates that
//! a streaming call can begin (start errors are synchronous), then delivers
//! incremental `StreamChunk`s over a channel, normalizing stop reasons and
//! surfacing reasoning tokens as thinking blocks. `FailoverClient` composes
//! an ordered list of clients with transient-error retry, and `loader`
//! instantiates the whole stack from raw configuration.

pub mod anthropic;
pub mod debug;
pub mod failover;
pub mod loader;
pub mod local;
pub mod openai_compat;

mod sse;

pub use anthropic::AnthropicClient;
pub use failover::FailoverClient;
pub use loader::{from_config, ProviderGroupConfig};
pub use local::LocalClient;
pub use openai_compat::OpenAiCompatClient;
