//! OS control tool — shell commands and filesystem inspection.
//!
//! Dispatches on an `action` argument so one tool surface covers the
//! operator-style requests the model makes (`run_command`,
//! `list_directory`). Commands run through the platform shell with an
//! optional allowlist on the base command.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use ariadne_core::{Tool, ToolError, ToolOutput};

pub struct OsControlTool {
    /// If non-empty, only these base commands may run.
    allowed_commands: Vec<String>,
}

impl OsControlTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }
        let base = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base)
    }

    async fn run_command(&self, command: &str) -> Result<ToolOutput, ToolError> {
        if !self.is_command_allowed(command) {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!(
                    "command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        debug!(command = %command, "Executing shell command");

        let output = if cfg!(target_os = "windows") {
            Command::new("cmd").args(["/C", command]).output().await
        } else {
            Command::new("sh").args(["-c", command]).output().await
        }
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let text = if output.status.success() {
            if stderr.is_empty() {
                stdout.to_string()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        let mut result = ToolOutput::text(text.trim());
        result
            .details
            .insert("exit_code".into(), json!(output.status.code().unwrap_or(-1)));
        Ok(result)
    }

    async fn list_directory(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("read_dir {path}: {e}"),
            })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?
        {
            let suffix = match entry.file_type().await {
                Ok(t) if t.is_dir() => "/",
                _ => "",
            };
            names.push(format!("{}{}", entry.file_name().to_string_lossy(), suffix));
        }
        names.sort();

        Ok(ToolOutput::text(names.join("\n")))
    }
}

#[async_trait]
impl Tool for OsControlTool {
    fn name(&self) -> &str {
        "os_control"
    }

    fn description(&self) -> &str {
        "Interact with the host operating system. Actions: 'run_command' executes a shell command and returns its output; 'list_directory' lists the entries of a directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "action": {
                "type": "string",
                "enum": ["run_command", "list_directory"],
                "description": "Which operation to perform"
            },
            "command": {
                "type": "string",
                "description": "Shell command to execute (run_command)"
            },
            "path": {
                "type": "string",
                "description": "Directory to list (list_directory), defaults to the current directory"
            }
        })
    }

    fn required_parameters(&self) -> Vec<String> {
        vec!["action".into()]
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let action = args
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'action'".into()))?;

        match action {
            "run_command" => {
                let command = args
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArguments("missing 'command'".into()))?;
                self.run_command(command).await
            }
            "list_directory" => {
                let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
                self.list_directory(path).await
            }
            other => Err(ToolError::InvalidArguments(format!(
                "unknown action '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ariadne_core::ToolBlock;

    fn args(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn allowlist_check() {
        let tool = OsControlTool::new(vec!["ls".into(), "cat".into()]);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("cat file.txt"));
        assert!(!tool.is_command_allowed("rm -rf /"));

        let open = OsControlTool::new(vec![]);
        assert!(open.is_command_allowed("anything"));
    }

    #[tokio::test]
    async fn run_command_echo() {
        let tool = OsControlTool::new(vec![]);
        let result = tool
            .execute(args(&[("action", "run_command"), ("command", "echo hello")]))
            .await
            .unwrap();
        let ToolBlock::Text { text } = &result.content[0] else {
            panic!("expected text block");
        };
        assert!(text.contains("hello"));
        assert_eq!(result.details["exit_code"], 0);
    }

    #[tokio::test]
    async fn blocked_command_errors() {
        let tool = OsControlTool::new(vec!["ls".into()]);
        let err = tool
            .execute(args(&[("action", "run_command"), ("command", "rm -rf /")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn missing_action_is_invalid() {
        let tool = OsControlTool::new(vec![]);
        let err = tool.execute(Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn list_directory_sorts_entries() {
        let tool = OsControlTool::new(vec![]);
        let dir = std::env::temp_dir().join(format!("ariadne-ls-test-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("b.txt"), b"b").unwrap();
        std::fs::write(dir.join("a.txt"), b"a").unwrap();

        let result = tool
            .execute(args(&[
                ("action", "list_directory"),
                ("path", dir.to_str().unwrap()),
            ]))
            .await
            .unwrap();
        let ToolBlock::Text { text } = &result.content[0] else {
            panic!("expected text block");
        };
        assert_eq!(text, "a.txt\nb.txt\nsub/");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn schema_requires_action() {
        let tool = OsControlTool::new(vec![]);
        let def = tool.definition();
        assert_eq!(def.name, "os_control");
        assert_eq!(def.required, vec!["action".to_string()]);
        assert!(def.parameters.get("command").is_some());
    }
}
