//! Channel adapters for Ariadne.
//!
//! Each adapter normalizes one transport onto the `ChannelAdapter` contract.
//! `ChannelSource` maps the `channels` configuration section onto adapter
//! instances via name-keyed factories, so new platforms plug in without
//! touching the gateway.

pub mod terminal;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;

use ariadne_config::SystemConfig;
use ariadne_core::{ChannelAdapter, Error};
use ariadne_sessions::SessionManager;
use tracing::warn;

pub use terminal::TerminalChannel;
pub use web::{WebChannel, WebConfig};

/// Creates an adapter from its raw configuration payload and the shared
/// system resources.
pub trait ChannelFactory: Send + Sync {
    fn create(
        &self,
        raw_config: &serde_json::Value,
        sessions: &Arc<SessionManager>,
        system: &SystemConfig,
    ) -> Result<Arc<dyn ChannelAdapter>, Error>;
}

/// Name-keyed factory registry with the built-in adapters pre-registered.
pub struct ChannelSource {
    factories: HashMap<String, Box<dyn ChannelFactory>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        let mut source = Self {
            factories: HashMap::new(),
        };
        source.register("terminal", Box::new(terminal::TerminalFactory));
        source.register("web", Box::new(web::WebFactory));
        source
    }

    pub fn register(&mut self, name: &str, factory: Box<dyn ChannelFactory>) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Instantiate an adapter for every configured channel. Unknown names
    /// and failed constructions are skipped with a warning; one broken
    /// channel must not take the rest of the gateway down.
    pub fn load(
        &self,
        configs: &HashMap<String, serde_json::Value>,
        sessions: &Arc<SessionManager>,
        system: &SystemConfig,
    ) -> Vec<Arc<dyn ChannelAdapter>> {
        let mut adapters = Vec::new();
        for (name, raw) in configs {
            let Some(factory) = self.factories.get(name) else {
                warn!(channel = %name, "No factory registered for channel");
                continue;
            };
            match factory.create(raw, sessions, system) {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => warn!(channel = %name, error = %e, "Failed to create channel"),
            }
        }
        adapters
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_factories_load_configured_channels() {
        let source = ChannelSource::new();
        let sessions = Arc::new(SessionManager::new(None));
        let system = SystemConfig::default();

        let mut configs = HashMap::new();
        configs.insert("terminal".to_string(), serde_json::json!({}));
        configs.insert("web".to_string(), serde_json::json!({ "port": 9453 }));
        configs.insert("carrier-pigeon".to_string(), serde_json::json!({}));

        let adapters = source.load(&configs, &sessions, &system);
        assert_eq!(adapters.len(), 2);
        let mut ids: Vec<&str> = adapters.iter().map(|a| a.id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["terminal", "web"]);
    }

    #[test]
    fn empty_config_loads_nothing() {
        let source = ChannelSource::new();
        let sessions = Arc::new(SessionManager::new(None));
        let adapters = source.load(&HashMap::new(), &sessions, &SystemConfig::default());
        assert!(adapters.is_empty());
    }
}
