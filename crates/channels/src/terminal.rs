//! Terminal channel — interactive stdin/stdout chat.
//!
//! The simplest transport: one local session, lines in, blocks out. Useful
//! for development and as the reference adapter implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use ariadne_config::SystemConfig;
use ariadne_core::{
    ChannelAdapter, ChannelContext, ChannelError, ContentBlock, Error, InboundMessage,
    SessionContext,
};
use ariadne_sessions::SessionManager;

use crate::ChannelFactory;

pub struct TerminalChannel {
    shutdown: watch::Sender<bool>,
}

impl TerminalChannel {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { shutdown }
    }

    fn session() -> SessionContext {
        SessionContext::new("terminal", "local_user", "local", "operator")
    }
}

impl Default for TerminalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for TerminalChannel {
    fn id(&self) -> &str {
        "terminal"
    }

    async fn start(&self, ctx: Arc<dyn ChannelContext>) -> Result<(), ChannelError> {
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut lines = BufReader::new(stdin).lines();

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Terminal channel shutting down");
                            return;
                        }
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                let line = line.trim().to_string();
                                if line.is_empty() {
                                    continue;
                                }
                                ctx.on_message(
                                    "terminal",
                                    InboundMessage::new(Self::session(), line),
                                );
                            }
                            // EOF (Ctrl+D) or read failure ends the loop.
                            Ok(None) | Err(_) => return,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        let _ = self.shutdown.send(true);
        Ok(())
    }

    async fn send(&self, _session: &SessionContext, text: &str) -> Result<(), ChannelError> {
        println!("{text}");
        Ok(())
    }

    async fn stream(
        &self,
        _session: &SessionContext,
        mut blocks: mpsc::Receiver<ContentBlock>,
    ) -> Result<(), ChannelError> {
        while let Some(block) = blocks.recv().await {
            match block {
                ContentBlock::Text { text } => print!("{text}"),
                ContentBlock::Thinking { text, .. } => print!("\x1b[2m{text}\x1b[0m"),
                ContentBlock::Error { text } => eprint!("{text}"),
                ContentBlock::Image { source } => {
                    println!("[image: {}]", source.media_type);
                }
            }
        }
        println!();
        Ok(())
    }
}

pub(crate) struct TerminalFactory;

impl ChannelFactory for TerminalFactory {
    fn create(
        &self,
        _raw_config: &serde_json::Value,
        _sessions: &Arc<SessionManager>,
        _system: &SystemConfig,
    ) -> Result<Arc<dyn ChannelAdapter>, Error> {
        Ok(Arc::new(TerminalChannel::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_identity() {
        let ch = TerminalChannel::new();
        assert_eq!(ch.id(), "terminal");
        assert_eq!(TerminalChannel::session().session_id(), "terminal_local");
    }

    #[tokio::test]
    async fn stop_without_start_is_fine() {
        let ch = TerminalChannel::new();
        assert!(ch.stop().await.is_ok());
    }

    #[tokio::test]
    async fn stream_drains_all_blocks() {
        let ch = TerminalChannel::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(ContentBlock::text("a")).await.unwrap();
        tx.send(ContentBlock::text("b")).await.unwrap();
        drop(tx);
        assert!(ch.stream(&TerminalChannel::session(), rx).await.is_ok());
    }
}
