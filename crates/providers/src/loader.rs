//! Provider instantiation from raw configuration.
//!
//! The `llm` section of the business config is an array of provider groups.
//! Each group expands into one atomic client per (model × api key)
//! combination; more than one atomic client gets wrapped in the failover
//! composite with the system-level retry settings.

use std::sync::Arc;
use std::time::Duration;

use ariadne_config::SystemConfig;
use ariadne_core::{Error, ProviderClient};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::anthropic::AnthropicClient;
use crate::failover::FailoverClient;
use crate::local::LocalClient;
use crate::openai_compat::OpenAiCompatClient;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_DEFAULT_URL: &str = "https://api.anthropic.com";

/// One entry of the `llm` configuration array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderGroupConfig {
    #[serde(rename = "type")]
    pub kind: String,

    pub models: Vec<String>,

    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Build the provider stack from the raw `llm` config section.
pub fn from_config(
    raw_llm: &serde_json::Value,
    system: &SystemConfig,
) -> Result<Arc<dyn ProviderClient>, Error> {
    let groups: Vec<ProviderGroupConfig> = serde_json::from_value(raw_llm.clone())
        .map_err(|e| Error::Config(format!("failed to parse 'llm' config: {e}")))?;

    let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::new();

    for group in &groups {
        info!(kind = %group.kind, models = group.models.len(), "Loading LLM group");
        match expand_group(group, system) {
            Ok(mut expanded) => clients.append(&mut expanded),
            Err(e) => {
                warn!(kind = %group.kind, error = %e, "Skipping provider group");
            }
        }
    }

    if clients.is_empty() {
        return Err(Error::Config("no LLM clients could be initialized".into()));
    }

    info!(count = clients.len(), "Atomic LLM clients initialized");

    if clients.len() == 1 {
        return Ok(clients.remove(0));
    }

    Ok(Arc::new(FailoverClient::new(
        clients,
        system.max_retries,
        Duration::from_millis(system.retry_delay_ms),
    )))
}

fn expand_group(
    group: &ProviderGroupConfig,
    system: &SystemConfig,
) -> Result<Vec<Arc<dyn ProviderClient>>, Error> {
    let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::new();

    match group.kind.as_str() {
        "openai" | "openai_compat" => {
            let base = group
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.into());
            let keys = non_empty_keys(&group.api_keys)?;
            for model in &group.models {
                for key in &keys {
                    clients.push(Arc::new(OpenAiCompatClient::new(
                        group.kind.clone(),
                        key.clone(),
                        model.clone(),
                        base.clone(),
                        group.options.clone(),
                    )));
                }
            }
        }
        "anthropic" => {
            let base = group
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_DEFAULT_URL.into());
            let keys = non_empty_keys(&group.api_keys)?;
            for model in &group.models {
                for key in &keys {
                    clients.push(Arc::new(AnthropicClient::new(
                        key.clone(),
                        model.clone(),
                        base.clone(),
                        group.options.clone(),
                    )));
                }
            }
        }
        "local" | "ollama" => {
            let base = group
                .base_url
                .clone()
                .unwrap_or_else(|| system.local_default_url.clone());
            for model in &group.models {
                clients.push(Arc::new(LocalClient::new(
                    model.clone(),
                    base.clone(),
                    group.options.clone(),
                )));
            }
        }
        other => {
            return Err(Error::Config(format!("unknown provider type: {other}")));
        }
    }

    Ok(clients)
}

fn non_empty_keys(keys: &[String]) -> Result<Vec<String>, Error> {
    if keys.is_empty() {
        return Err(Error::Config("provider group requires 'api_keys'".into()));
    }
    Ok(keys.to_vec())
}
