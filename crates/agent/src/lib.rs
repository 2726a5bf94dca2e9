//! The Ariadne agent engine.
//!
//! `AgentEngine` runs the streaming reasoning loop for one session at a time:
//! it calls the provider, demultiplexes the chunk stream into user-visible
//! blocks and an accumulating assistant message, executes requested tools,
//! re-enters the provider on tool results, recovers from transient failures,
//! and triggers sliding-window summarization. `ChatHandler` sits in front of
//! it, serializing turns per session and assigning debug ids.

pub mod engine;
pub mod handler;

pub use engine::AgentEngine;
pub use handler::ChatHandler;
