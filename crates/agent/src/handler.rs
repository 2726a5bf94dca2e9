//! The chat handler — the gateway-facing front of the engine.
//!
//! Serializes turns per session (two racing messages in one session would
//! otherwise interleave their history appends and break tool-call pairing),
//! assigns the debug id that groups a turn's provider captures, and resolves
//! the session history before delegating to the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use uuid::Uuid;

use ariadne_core::{InboundMessage, MessageHandler};
use ariadne_sessions::SessionManager;

use crate::engine::AgentEngine;

pub struct ChatHandler {
    engine: Arc<AgentEngine>,
    sessions: Arc<SessionManager>,

    /// Per-session turn locks, created on demand and kept for the process
    /// lifetime (sessions are never destroyed in-process).
    turn_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChatHandler {
    pub fn new(engine: Arc<AgentEngine>, sessions: Arc<SessionManager>) -> Self {
        Self {
            engine,
            sessions,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    fn turn_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn locks poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

#[async_trait]
impl MessageHandler for ChatHandler {
    async fn on_message(&self, mut inbound: InboundMessage) {
        if inbound.debug_id.is_empty() {
            inbound.debug_id = short_debug_id();
        }
        let start = Instant::now();

        info!(
            channel = %inbound.session.channel_id,
            user = %inbound.session.username,
            content = %inbound.content,
            files = inbound.files.len(),
            debug_id = %inbound.debug_id,
            "Message received"
        );

        let session_id = inbound.session.session_id();

        // Hold the session's turn lock for the whole turn so concurrent
        // messages in the same session run strictly one after another.
        let lock = self.turn_lock(&session_id);
        let _guard = lock.lock().await;

        let history = self.sessions.get_history(&session_id);
        let _assistant = self.engine.handle_message(&mut inbound, &history).await;

        info!(
            duration = ?start.elapsed(),
            debug_id = %inbound.debug_id,
            "Agent loop finished"
        );
    }
}

/// Four hex characters are plenty to tell concurrent turns apart in logs.
fn short_debug_id() -> String {
    Uuid::new_v4().simple().to_string()[..4].to_string()
}
