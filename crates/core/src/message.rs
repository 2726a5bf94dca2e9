//! Message and content-block domain types.
//!
//! These are the value objects that flow through the entire system: a channel
//! receives user input, the engine turns it into `Message`s, providers stream
//! back `ContentBlock`s, and histories persist the whole exchange as JSON.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::Usage;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable message identifier.
    #[serde(default)]
    pub id: String,

    pub role: Role,

    /// Ordered content blocks (text, thinking, images, errors).
    pub content: Vec<ContentBlock>,

    /// Tool invocations requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Back-reference to the tool call this message resolves (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Name of the tool that produced this message (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Token usage reported by the provider (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Unix-second timestamp.
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            usage: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// An assistant message with no content yet; the engine fills it while
    /// collecting stream chunks.
    pub fn assistant_empty() -> Self {
        Self::new(Role::Assistant, Vec::new())
    }

    /// A tool-result message paired to `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<ContentBlock>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }

    pub fn push_block(&mut self, block: ContentBlock) {
        self.content.push(block);
    }

    /// Concatenated text content, excluding thinking blocks.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated thinking content.
    pub fn thinking_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Thinking { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_images(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,

    /// Raw JSON argument text exactly as the provider emitted it.
    pub arguments: String,

    /// Opaque provider tokens (e.g. reasoning signatures) that must be echoed
    /// back verbatim on subsequent turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A tagged content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// User-facing natural language.
    Text { text: String },

    /// Model-internal reasoning. Stored in history for multi-turn fidelity;
    /// forwarded to the UI only when configuration enables it.
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    Image { source: ImageSource },

    /// User-visible failure notice.
    Error { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking {
            text: text.into(),
            signature: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    /// An image block carrying inline bytes.
    pub fn image(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: ImageSourceKind::Base64,
                media_type: media_type.into(),
                data: Some(data),
                url: None,
                path: None,
            },
        }
    }

    /// An image block referencing a file on local disk.
    pub fn image_from_file(path: impl Into<PathBuf>, media_type: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: ImageSourceKind::File,
                media_type: media_type.into(),
                data: None,
                url: None,
                path: Some(path.into()),
            },
        }
    }

    /// An image block referencing a remote URL.
    pub fn image_from_url(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: ImageSourceKind::Url,
                media_type: media_type.into(),
                data: None,
                url: Some(url.into()),
                path: None,
            },
        }
    }
}

/// Where an image's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSourceKind {
    Base64,
    Url,
    File,
}

/// The source descriptor of an image block. Exactly one of `data`, `url`,
/// `path` is populated per kind; inline bytes serialize as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: ImageSourceKind,

    pub media_type: String,

    #[serde(default, with = "b64_bytes", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ImageSource {
    /// Hydrate file-sourced bytes from disk. No-op for other kinds or when
    /// bytes are already present.
    pub fn load_data(&mut self) -> std::io::Result<()> {
        if self.kind == ImageSourceKind::File && self.data.is_none() {
            if let Some(path) = &self.path {
                self.data = Some(std::fs::read(path)?);
            }
        }
        Ok(())
    }

    pub fn file_path(&self) -> Option<&Path> {
        if self.kind == ImageSourceKind::File {
            self.path.as_deref()
        } else {
            None
        }
    }
}

/// Serialize optional raw bytes as standard base64.
mod b64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) if !s.is_empty() => BASE64
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
