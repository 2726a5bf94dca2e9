//! Tool trait and registry — the agentic capability layer.
//!
//! Tools are what the model can invoke to act on the world. Each tool
//! publishes JSON-schema metadata for prompt injection and executes with a
//! structured result the engine converts into history content blocks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Tool metadata sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,

    /// JSON-schema `properties` object.
    pub parameters: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolBlock>,

    /// Arbitrary technical metadata for callers that want more than blocks.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolBlock::Text { text: text.into() }],
            details: serde_json::Map::new(),
        }
    }
}

/// An atomic unit of tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// The tool contract.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "os_control").
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON-schema `properties` describing the arguments.
    fn parameters(&self) -> serde_json::Value;

    fn required_parameters(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute with the parsed argument map.
    async fn execute(
        &self,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<ToolOutput, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            required: self.required_parameters(),
        }
    }
}

/// A name-indexed, lock-protected set of tools.
///
/// Reads vastly outnumber writes (registration happens at startup), so a
/// read-write lock guards the map. The lock is never held across an await.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool, replacing any existing tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().expect("tool registry poisoned").insert(name, tool);
    }

    pub fn unregister(&self, name: &str) {
        self.tools.write().expect("tool registry poisoned").remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry poisoned")
            .get(name)
            .cloned()
    }

    /// Definitions for every registered tool, for prompt injection.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .expect("tool registry poisoned")
            .values()
            .map(|t| t.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .expect("tool registry poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("tool registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "text": { "type": "string", "description": "Text to echo" }
            })
        }
        fn required_parameters(&self) -> Vec<String> {
            vec!["text".into()]
        }
        async fn execute(
            &self,
            args: serde_json::Map<String, serde_json::Value>,
        ) -> Result<ToolOutput, ToolError> {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(ToolOutput::text(text))
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definitions_carry_schema() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].required, vec!["text".to_string()]);
        assert!(defs[0].parameters.get("text").is_some());
    }

    #[tokio::test]
    async fn execute_through_registry() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let mut args = serde_json::Map::new();
        args.insert("text".into(), serde_json::json!("hello"));
        let result = tool.execute(args).await.unwrap();
        assert!(matches!(&result.content[0], ToolBlock::Text { text } if text == "hello"));
    }

    #[test]
    fn unregister_removes_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.unregister("echo");
        assert!(registry.is_empty());
    }
}
