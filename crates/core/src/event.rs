//! Monitor events — per-turn observability fan-out.
//!
//! The gateway emits one `MonitorEvent` per user message and one per drained
//! assistant stream. Monitors present the flow to an operator; delivery is
//! best-effort and must never fail the message path.

use chrono::{DateTime, Utc};

/// Who produced the monitored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEventKind {
    User,
    Assistant,
}

impl MonitorEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

/// A standardized observability packet.
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: MonitorEventKind,
    pub channel_id: String,
    pub username: String,
    pub content: String,
}

impl MonitorEvent {
    pub fn now(
        kind: MonitorEventKind,
        channel_id: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            channel_id: channel_id.into(),
            username: username.into(),
            content: content.into(),
        }
    }
}

/// Observer consuming per-turn user/assistant text summaries.
pub trait Monitor: Send + Sync {
    /// Allocate display resources.
    fn start(&self) -> crate::Result<()> {
        Ok(())
    }

    /// Release display resources.
    fn stop(&self) -> crate::Result<()> {
        Ok(())
    }

    fn on_event(&self, event: MonitorEvent);
}
