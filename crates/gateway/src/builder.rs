//! Fluent assembly of the gateway and its collaborators.
//!
//! Components arrive pre-built; the builder wires them together (monitor,
//! channels, handler, engine responder) and starts everything in one place
//! so the supervisor's construction path stays linear.

use std::sync::Arc;

use ariadne_config::SystemConfig;
use ariadne_core::{ChannelAdapter, Error, MessageHandler, Monitor, Responder, ResponderAware};

use crate::manager::GatewayManager;

#[derive(Default)]
pub struct GatewayBuilder {
    sys_cfg: SystemConfig,
    monitor: Option<Arc<dyn Monitor>>,
    channels: Vec<Arc<dyn ChannelAdapter>>,
    handler: Option<Arc<dyn MessageHandler>>,
    responder_aware: Vec<Arc<dyn ResponderAware>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            sys_cfg: SystemConfig::default(),
            monitor: None,
            channels: Vec::new(),
            handler: None,
            responder_aware: Vec::new(),
        }
    }

    pub fn with_system_config(mut self, cfg: SystemConfig) -> Self {
        self.sys_cfg = cfg;
        self
    }

    /// The monitor is started during `build`.
    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_channel(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.channels.push(adapter);
        self
    }

    pub fn with_channels(mut self, adapters: Vec<Arc<dyn ChannelAdapter>>) -> Self {
        self.channels.extend(adapters);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Components (the engine) that receive the gateway as their responder.
    pub fn with_responder_aware(mut self, component: Arc<dyn ResponderAware>) -> Self {
        self.responder_aware.push(component);
        self
    }

    /// Wire everything into a `GatewayManager`, start the monitor and all
    /// channels, and hand back the running gateway.
    pub async fn build(self) -> Result<Arc<GatewayManager>, Error> {
        let gateway = Arc::new(GatewayManager::new(self.sys_cfg));

        if let Some(monitor) = self.monitor {
            monitor.start()?;
            gateway.set_monitor(monitor);
        }

        for adapter in self.channels {
            gateway.register(adapter);
        }

        if let Some(handler) = self.handler {
            gateway.set_handler(handler);
        }

        for component in self.responder_aware {
            component.set_responder(Arc::clone(&gateway) as Arc<dyn Responder>);
        }

        gateway
            .start_all()
            .await
            .map_err(|e| Error::Internal(format!("failed to start channels: {e}")))?;

        Ok(gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ariadne_core::{
        ChannelContext, ChannelError, ContentBlock, SessionContext,
    };
    use tokio::sync::mpsc;

    struct NoopAdapter {
        started: AtomicBool,
    }

    #[async_trait]
    impl ChannelAdapter for NoopAdapter {
        fn id(&self) -> &str {
            "noop"
        }
        async fn start(&self, _ctx: Arc<dyn ChannelContext>) -> Result<(), ChannelError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, _session: &SessionContext, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stream(
            &self,
            _session: &SessionContext,
            _blocks: mpsc::Receiver<ContentBlock>,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    struct CapturingEngine {
        responder: Mutex<Option<Arc<dyn Responder>>>,
    }

    impl ResponderAware for CapturingEngine {
        fn set_responder(&self, responder: Arc<dyn Responder>) {
            *self.responder.lock().unwrap() = Some(responder);
        }
    }

    #[tokio::test]
    async fn build_starts_channels_and_wires_responder() {
        let adapter = Arc::new(NoopAdapter {
            started: AtomicBool::new(false),
        });
        let engine = Arc::new(CapturingEngine {
            responder: Mutex::new(None),
        });

        let gateway = GatewayBuilder::new()
            .with_channel(adapter.clone())
            .with_responder_aware(engine.clone())
            .build()
            .await
            .unwrap();

        assert!(adapter.started.load(Ordering::SeqCst));
        assert!(engine.responder.lock().unwrap().is_some());
        assert_eq!(gateway.channel_ids(), vec!["noop".to_string()]);
    }
}
