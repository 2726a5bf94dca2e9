//! Configuration loading and validation for Ariadne.
//!
//! Two JSON documents: `config.json` carries business settings (channel
//! payloads, LLM provider groups, system prompt) and `system.json` carries
//! engine-level technical parameters with safe defaults. Invalid business
//! configuration is fatal at startup; a missing or unparsable system file
//! silently falls back to defaults.

pub mod watcher;

use std::collections::HashMap;
use std::path::Path;

use ariadne_core::Error;
use serde::{Deserialize, Serialize};

/// Business-level application configuration, mapped from `config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Channel id → opaque adapter configuration payload. The core hands each
    /// payload to the factory registered under the same name.
    #[serde(default)]
    pub channels: HashMap<String, serde_json::Value>,

    /// Raw LLM provider-group configuration, parsed by the provider loader.
    #[serde(default)]
    pub llm: serde_json::Value,

    /// Persona/instruction string injected as the system message.
    #[serde(default)]
    pub system_prompt: String,
}

impl AppConfig {
    /// Guard against structurally unusable configuration before the system
    /// proceeds to component construction.
    pub fn validate(&self) -> Result<(), Error> {
        if self.llm.is_null() {
            return Err(Error::Config(
                "mandatory 'llm' configuration is missing or empty".into(),
            ));
        }
        Ok(())
    }
}

/// Engine-level technical parameters, mapped from `system.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Recovery attempts for transient LLM/stream errors before giving up.
    pub max_retries: u32,

    /// Delay between consecutive retry attempts.
    pub retry_delay_ms: u64,

    /// Hard wall-clock cutoff for one LLM call.
    pub llm_timeout_ms: u64,

    /// Buffer size of the internal block channels between engine, gateway
    /// and adapters.
    pub internal_channel_buffer: usize,

    /// How long to wait for the first chunk before signalling "thinking".
    pub thinking_init_delay_ms: u64,

    /// Timeout for fetching external media referenced by inbound messages.
    pub download_timeout_ms: u64,

    /// Forward thinking blocks to the user-facing stream.
    pub show_thinking: bool,

    /// Capture every raw provider frame under debug/chunks.
    pub debug_chunks: bool,

    /// Minimum log severity: "debug", "info", "warn", "error".
    pub log_level: String,

    /// Globally toggle tool calling.
    pub enable_tools: bool,

    /// Message count that triggers sliding-window summarization.
    pub history_summarize_threshold: usize,

    /// Messages kept verbatim after summarization.
    pub history_keep_recent_count: usize,

    /// Character budget for the history before summarization.
    pub history_max_chars: usize,

    /// Token budget (provider-reported) before summarization.
    pub history_max_tokens: u32,

    /// Upper bound on tool turns for one inbound message.
    pub max_tool_turns: u32,

    /// Upper bound on automatic length continuations per inbound message.
    pub max_continuations: u32,

    /// Fallback endpoint for the self-hosted inference daemon.
    pub local_default_url: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            llm_timeout_ms: 600_000,
            internal_channel_buffer: 100,
            thinking_init_delay_ms: 500,
            download_timeout_ms: 10_000,
            show_thinking: true,
            debug_chunks: false,
            log_level: "info".into(),
            enable_tools: true,
            history_summarize_threshold: 10,
            history_keep_recent_count: 5,
            history_max_chars: 10_000,
            history_max_tokens: 4_000,
            max_tool_turns: 25,
            max_continuations: 3,
            local_default_url: "http://localhost:11434".into(),
        }
    }
}

/// Load both configuration documents from the working directory.
pub fn load() -> Result<(AppConfig, SystemConfig), Error> {
    load_from(Path::new("config.json"), Path::new("system.json"))
}

/// Load from explicit paths. The business config is mandatory; the system
/// config degrades to defaults.
pub fn load_from(app_path: &Path, system_path: &Path) -> Result<(AppConfig, SystemConfig), Error> {
    let raw = std::fs::read_to_string(app_path).map_err(|e| {
        Error::Config(format!(
            "config file '{}' not readable: {e}",
            app_path.display()
        ))
    })?;
    let cfg: AppConfig = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("failed to parse '{}': {e}", app_path.display())))?;
    cfg.validate()?;

    Ok((cfg, load_system_config(system_path)))
}

/// Load system settings, returning defaults when the file is absent or
/// malformed.
pub fn load_system_config(path: &Path) -> SystemConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unparsable system config, using defaults");
                SystemConfig::default()
            }
        },
        Err(_) => SystemConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn system_defaults() {
        let cfg = SystemConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_delay_ms, 500);
        assert_eq!(cfg.llm_timeout_ms, 600_000);
        assert_eq!(cfg.internal_channel_buffer, 100);
        assert_eq!(cfg.thinking_init_delay_ms, 500);
        assert!(cfg.show_thinking);
        assert!(cfg.enable_tools);
        assert_eq!(cfg.history_summarize_threshold, 10);
        assert_eq!(cfg.history_keep_recent_count, 5);
        assert_eq!(cfg.history_max_chars, 10_000);
        assert_eq!(cfg.history_max_tokens, 4_000);
    }

    #[test]
    fn partial_system_config_fills_defaults() {
        let cfg: SystemConfig = serde_json::from_str(r#"{"max_retries": 7}"#).unwrap();
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.retry_delay_ms, 500);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn validate_rejects_missing_llm() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_err());

        let cfg: AppConfig =
            serde_json::from_str(r#"{"llm": [{"type": "openai", "models": ["m"]}]}"#).unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_from_reads_both_documents() {
        let dir = tempfile::tempdir().unwrap();
        let app_path = dir.path().join("config.json");
        let sys_path = dir.path().join("system.json");

        let mut f = std::fs::File::create(&app_path).unwrap();
        write!(
            f,
            r#"{{"llm": [{{"type":"openai","models":["gpt-test"]}}], "system_prompt": "Be brief.", "channels": {{"web": {{"port": 9453}}}}}}"#
        )
        .unwrap();
        let mut f = std::fs::File::create(&sys_path).unwrap();
        write!(f, r#"{{"show_thinking": false}}"#).unwrap();

        let (app, sys) = load_from(&app_path, &sys_path).unwrap();
        assert_eq!(app.system_prompt, "Be brief.");
        assert!(app.channels.contains_key("web"));
        assert!(!sys.show_thinking);
        assert_eq!(sys.max_retries, 3);
    }

    #[test]
    fn missing_system_file_yields_defaults() {
        let cfg = load_system_config(Path::new("/nonexistent/system.json"));
        assert_eq!(cfg.max_retries, 3);
    }
}
