//! Monitor sink writing per-turn summaries through the log pipeline.
//!
//! Delivery is best-effort and synchronous within the gateway's stream-reply
//! forwarder; keeping the sink a plain log write means a slow terminal can
//! never backpressure the transport stream for long.

use ariadne_core::{Monitor, MonitorEvent, MonitorEventKind};
use tracing::info;

/// Default monitor: one structured log line per user/assistant turn.
#[derive(Debug, Default)]
pub struct LogMonitor;

impl LogMonitor {
    pub fn new() -> Self {
        Self
    }
}

impl Monitor for LogMonitor {
    fn on_event(&self, event: MonitorEvent) {
        let content = truncate(&event.content, 500);
        match event.kind {
            MonitorEventKind::User => info!(
                target: "monitor",
                channel = %event.channel_id,
                user = %event.username,
                "[USER] {content}"
            ),
            MonitorEventKind::Assistant => info!(
                target: "monitor",
                channel = %event.channel_id,
                user = %event.username,
                "[ASSISTANT] {content}"
            ),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
