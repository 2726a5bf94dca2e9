//! The gateway manager.
//!
//! Routes outbound traffic (send/stream/signal) to the adapter registered
//! under the session's channel id and inbound messages to the handler, one
//! fresh task per message. The stream-reply path wraps the engine's block
//! channel so the full assistant text can be aggregated for the monitor
//! while blocks flow through unchanged.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ariadne_config::SystemConfig;
use ariadne_core::{
    ChannelAdapter, ChannelContext, ChannelError, ContentBlock, InboundMessage, MessageHandler,
    Monitor, MonitorEvent, MonitorEventKind, Responder, SessionContext,
};

pub struct GatewayManager {
    channels: RwLock<HashMap<String, Arc<dyn ChannelAdapter>>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    monitor: RwLock<Option<Arc<dyn Monitor>>>,
    sys_cfg: SystemConfig,
}

impl GatewayManager {
    pub fn new(sys_cfg: SystemConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            handler: RwLock::new(None),
            monitor: RwLock::new(None),
            sys_cfg,
        }
    }

    /// Inject the business-logic callback invoked for every inbound message.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    pub fn set_monitor(&self, monitor: Arc<dyn Monitor>) {
        *self.monitor.write().expect("monitor lock poisoned") = Some(monitor);
    }

    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        let id = adapter.id().to_string();
        info!(channel = %id, "Registered channel");
        self.channels
            .write()
            .expect("channel map poisoned")
            .insert(id, adapter);
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.channels
            .read()
            .expect("channel map poisoned")
            .get(id)
            .cloned()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels
            .read()
            .expect("channel map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Start every registered adapter, handing each this manager as its
    /// context.
    pub async fn start_all(self: &Arc<Self>) -> Result<(), ChannelError> {
        let adapters: Vec<Arc<dyn ChannelAdapter>> = {
            let map = self.channels.read().expect("channel map poisoned");
            map.values().cloned().collect()
        };
        for adapter in adapters {
            info!(channel = adapter.id(), "Starting channel");
            adapter
                .start(Arc::clone(self) as Arc<dyn ChannelContext>)
                .await?;
        }
        Ok(())
    }

    /// Gracefully shut every adapter down, releasing listeners and pollers.
    pub async fn stop_all(&self) {
        let adapters: Vec<Arc<dyn ChannelAdapter>> = {
            let map = self.channels.read().expect("channel map poisoned");
            map.values().cloned().collect()
        };
        for adapter in adapters {
            info!(channel = adapter.id(), "Stopping channel");
            if let Err(e) = adapter.stop().await {
                warn!(channel = adapter.id(), error = %e, "Error stopping channel");
            }
        }
    }

    fn monitor(&self) -> Option<Arc<dyn Monitor>> {
        self.monitor.read().expect("monitor lock poisoned").clone()
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(monitor) = self.monitor() {
            monitor.on_event(event);
        }
    }
}

#[async_trait]
impl Responder for GatewayManager {
    /// Convenience wrapper: package plain text as a single block so every
    /// reply follows the one streaming code path.
    async fn send_reply(&self, session: &SessionContext, text: &str) -> Result<(), ChannelError> {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(ContentBlock::text(text)).await;
        drop(tx);
        self.stream_reply(session, rx).await
    }

    async fn stream_reply(
        &self,
        session: &SessionContext,
        mut blocks: mpsc::Receiver<ContentBlock>,
    ) -> Result<(), ChannelError> {
        let adapter = self
            .get_channel(&session.channel_id)
            .ok_or_else(|| ChannelError::NotFound(session.channel_id.clone()))?;

        // Wrapper channel: aggregate text for the monitor while forwarding.
        let (tx, rx) = mpsc::channel(self.sys_cfg.internal_channel_buffer);
        let monitor = self.monitor();
        let channel_id = session.channel_id.clone();
        let username = session.username.clone();

        tokio::spawn(async move {
            let mut aggregated = String::new();
            while let Some(block) = blocks.recv().await {
                if let ContentBlock::Text { text } = &block {
                    aggregated.push_str(text);
                }
                if tx.send(block).await.is_err() {
                    break;
                }
            }
            // One monitor entry per fully drained assistant stream.
            if !aggregated.is_empty() {
                if let Some(monitor) = monitor {
                    monitor.on_event(MonitorEvent::now(
                        MonitorEventKind::Assistant,
                        channel_id,
                        username,
                        aggregated,
                    ));
                }
            }
        });

        adapter.stream(session, rx).await
    }

    async fn send_signal(
        &self,
        session: &SessionContext,
        signal: &str,
    ) -> Result<(), ChannelError> {
        let adapter = self
            .get_channel(&session.channel_id)
            .ok_or_else(|| ChannelError::NotFound(session.channel_id.clone()))?;
        debug!(channel = %session.channel_id, user = %session.username, signal, "Signal");
        adapter.send_signal(session, signal).await
    }
}

impl ChannelContext for GatewayManager {
    fn on_message(&self, channel_id: &str, inbound: InboundMessage) {
        debug!(
            channel = channel_id,
            user = %inbound.session.username,
            user_id = %inbound.session.user_id,
            content = %inbound.content,
            "Message received"
        );

        self.emit(MonitorEvent::now(
            MonitorEventKind::User,
            channel_id,
            inbound.session.username.clone(),
            inbound.content.clone(),
        ));

        let handler = self.handler.read().expect("handler lock poisoned").clone();
        match handler {
            Some(handler) => {
                // One fresh task per inbound message; per-session ordering is
                // the handler's concern.
                tokio::spawn(async move {
                    handler.on_message(inbound).await;
                });
            }
            None => warn!("No message handler set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MockAdapter {
        id: String,
        started: AtomicBool,
        stopped: AtomicBool,
        streamed: Mutex<Vec<ContentBlock>>,
        signals: Mutex<Vec<String>>,
    }

    impl MockAdapter {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                streamed: Mutex::new(Vec::new()),
                signals: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChannelAdapter for MockAdapter {
        fn id(&self) -> &str {
            &self.id
        }
        async fn start(&self, _ctx: Arc<dyn ChannelContext>) -> Result<(), ChannelError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), ChannelError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn send(&self, _session: &SessionContext, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stream(
            &self,
            _session: &SessionContext,
            mut blocks: mpsc::Receiver<ContentBlock>,
        ) -> Result<(), ChannelError> {
            while let Some(block) = blocks.recv().await {
                self.streamed.lock().unwrap().push(block);
            }
            Ok(())
        }
        async fn send_signal(
            &self,
            _session: &SessionContext,
            signal: &str,
        ) -> Result<(), ChannelError> {
            self.signals.lock().unwrap().push(signal.into());
            Ok(())
        }
    }

    struct RecordingMonitor {
        events: Mutex<Vec<MonitorEvent>>,
    }

    impl Monitor for RecordingMonitor {
        fn on_event(&self, event: MonitorEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn session() -> SessionContext {
        SessionContext::new("web", "u1", "global", "alice")
    }

    #[tokio::test]
    async fn start_and_stop_all() {
        let gw = Arc::new(GatewayManager::new(SystemConfig::default()));
        let adapter = MockAdapter::new("web");
        gw.register(adapter.clone());

        gw.start_all().await.unwrap();
        assert!(adapter.started.load(Ordering::SeqCst));

        gw.stop_all().await;
        assert!(adapter.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn send_reply_reaches_adapter_as_one_block() {
        let gw = Arc::new(GatewayManager::new(SystemConfig::default()));
        let adapter = MockAdapter::new("web");
        gw.register(adapter.clone());

        gw.send_reply(&session(), "hello").await.unwrap();

        let streamed = adapter.streamed.lock().unwrap();
        assert_eq!(streamed.len(), 1);
        assert!(matches!(&streamed[0], ContentBlock::Text { text } if text == "hello"));
    }

    #[tokio::test]
    async fn stream_reply_preserves_order_and_emits_monitor_event() {
        let gw = Arc::new(GatewayManager::new(SystemConfig::default()));
        let adapter = MockAdapter::new("web");
        gw.register(adapter.clone());
        let monitor = Arc::new(RecordingMonitor {
            events: Mutex::new(Vec::new()),
        });
        gw.set_monitor(monitor.clone());

        let (tx, rx) = mpsc::channel(8);
        tx.send(ContentBlock::text("Hello ")).await.unwrap();
        tx.send(ContentBlock::thinking("hmm")).await.unwrap();
        tx.send(ContentBlock::text("world")).await.unwrap();
        drop(tx);

        gw.stream_reply(&session(), rx).await.unwrap();
        // The monitor entry lands after drain on the forwarder task.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let streamed = adapter.streamed.lock().unwrap();
        assert_eq!(streamed.len(), 3);
        assert!(matches!(&streamed[0], ContentBlock::Text { text } if text == "Hello "));
        assert!(matches!(&streamed[1], ContentBlock::Thinking { .. }));

        let events = monitor.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MonitorEventKind::Assistant);
        // Only text blocks aggregate into the monitor summary.
        assert_eq!(events[0].content, "Hello world");
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error() {
        let gw = Arc::new(GatewayManager::new(SystemConfig::default()));
        let err = gw.send_reply(&session(), "hello").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotFound(_)));
    }

    #[tokio::test]
    async fn signal_forwards_to_adapter() {
        let gw = Arc::new(GatewayManager::new(SystemConfig::default()));
        let adapter = MockAdapter::new("web");
        gw.register(adapter.clone());

        gw.send_signal(&session(), "thinking").await.unwrap();
        assert_eq!(*adapter.signals.lock().unwrap(), vec!["thinking".to_string()]);
    }

    #[tokio::test]
    async fn on_message_emits_user_event_and_dispatches_handler() {
        struct RecordingHandler {
            received: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl MessageHandler for RecordingHandler {
            async fn on_message(&self, inbound: InboundMessage) {
                self.received.lock().unwrap().push(inbound.content);
            }
        }

        let gw = Arc::new(GatewayManager::new(SystemConfig::default()));
        let monitor = Arc::new(RecordingMonitor {
            events: Mutex::new(Vec::new()),
        });
        gw.set_monitor(monitor.clone());
        let handler = Arc::new(RecordingHandler {
            received: Mutex::new(Vec::new()),
        });
        gw.set_handler(handler.clone());

        gw.on_message("web", InboundMessage::new(session(), "hi there"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(*handler.received.lock().unwrap(), vec!["hi there".to_string()]);
        let events = monitor.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MonitorEventKind::User);
        assert_eq!(events[0].content, "hi there");
    }
}
