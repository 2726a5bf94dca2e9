//! The per-session conversation log.
//!
//! A `ChatHistory` accumulates messages from all roles, carries one summary
//! slot for sliding-window compaction, and owns the disk representation of
//! the session. All operations are protected by one read-write lock; callers
//! never hold it across an await.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use ariadne_core::{ContentBlock, ImageSourceKind, Message, Role, SessionError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    summary: String,
    messages: Vec<Message>,
}

/// Concurrency-safe manager for one session's linear message log.
#[derive(Debug, Default)]
pub struct ChatHistory {
    inner: RwLock<HistoryState>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end of the log.
    pub fn append(&self, msg: Message) {
        self.inner.write().expect("history poisoned").messages.push(msg);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("history poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A deep copy of the message sequence. Callers may iterate and mutate
    /// freely without racing subsequent appends.
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.read().expect("history poisoned").messages.clone()
    }

    /// Like `snapshot`, but with file-sourced images hydrated into inline
    /// bytes — for transports that cannot dereference local paths.
    pub fn snapshot_ui(&self) -> Vec<Message> {
        let mut msgs = self.snapshot();
        for msg in &mut msgs {
            for block in &mut msg.content {
                if let ContentBlock::Image { source } = block {
                    if let Err(e) = source.load_data() {
                        warn!(path = ?source.path, error = %e, "Failed to hydrate image for UI snapshot");
                    }
                }
            }
        }
        msgs
    }

    pub fn summary(&self) -> String {
        self.inner.read().expect("history poisoned").summary.clone()
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        self.inner.write().expect("history poisoned").summary = summary.into();
    }

    /// Ensure a system message with the given content sits at position 0:
    /// replace an existing one, otherwise prepend.
    pub fn ensure_system_message(&self, content: impl Into<String>) {
        let mut state = self.inner.write().expect("history poisoned");
        let sys = Message::system(content);
        match state.messages.first() {
            Some(first) if first.role == Role::System => state.messages[0] = sys,
            _ => state.messages.insert(0, sys),
        }
    }

    /// Keep only the most recent `keep` messages. A system message at
    /// position 0 is re-prepended after truncation. Local files referenced by
    /// dropped image blocks are deleted; deletion failures are logged, never
    /// propagated.
    pub fn truncate_keep(&self, keep: usize) {
        let mut state = self.inner.write().expect("history poisoned");
        if state.messages.len() <= keep {
            return;
        }

        let sys_msg = state
            .messages
            .first()
            .filter(|m| m.role == Role::System)
            .cloned();

        let cut = state.messages.len() - keep;
        let dropped: Vec<Message> = state.messages.drain(..cut).collect();

        if let Some(sys) = &sys_msg {
            if state.messages.first().map(|m| m.role) != Some(Role::System) {
                state.messages.insert(0, sys.clone());
            }
        }
        drop(state);

        for msg in dropped {
            if let Some(sys) = &sys_msg {
                if msg.id == sys.id {
                    continue;
                }
            }
            for block in &msg.content {
                if let ContentBlock::Image { source } = block {
                    if let Some(path) = source.file_path() {
                        match std::fs::remove_file(path) {
                            Ok(()) => debug!(path = %path.display(), "Deleted expired attachment"),
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "Failed to delete expired attachment")
                            }
                        }
                    }
                }
            }
        }
    }

    /// Move every inline image out to `dir`, replacing bytes with a file
    /// reference. Filenames are an 8-hex timestamp prefix followed by the
    /// content hash, so identical images dedupe and age-based cleanup can
    /// read creation time straight off the name. Idempotent.
    pub fn materialize_attachments(&self, dir: &Path) -> Result<(), SessionError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SessionError::Storage(format!("create attachments dir: {e}")))?;

        let mut state = self.inner.write().expect("history poisoned");
        for msg in &mut state.messages {
            for block in &mut msg.content {
                let ContentBlock::Image { source } = block else {
                    continue;
                };
                let Some(data) = source.data.as_ref() else {
                    continue;
                };
                if data.is_empty() {
                    continue;
                }

                let hash = Sha256::digest(data);
                let ext = extension_for(&source.media_type);
                let filename = format!("{}{:x}{ext}", timestamp_prefix(), hash);
                let full_path = dir.join(filename);

                if !full_path.exists() {
                    std::fs::write(&full_path, data).map_err(|e| {
                        SessionError::Storage(format!(
                            "save image {}: {e}",
                            full_path.display()
                        ))
                    })?;
                }

                source.kind = ImageSourceKind::File;
                source.path = Some(full_path);
                source.data = None;
            }
        }
        Ok(())
    }

    /// Serialize the history to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let state = self.inner.read().expect("history poisoned");
        let data = serde_json::to_vec_pretty(&*state)
            .map_err(|e| SessionError::Storage(format!("serialize history: {e}")))?;
        drop(state);
        std::fs::write(path, data)
            .map_err(|e| SessionError::Storage(format!("write {}: {e}", path.display())))
    }

    /// Replace the in-memory history with the contents of a JSON file.
    ///
    /// A missing file is not an error (the session starts empty). The loader
    /// accepts both the `{summary, messages}` shape and the legacy bare
    /// message array.
    pub fn load(&self, path: &Path) -> Result<(), SessionError> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(SessionError::Storage(format!(
                    "read {}: {e}",
                    path.display()
                )))
            }
        };

        let state = match serde_json::from_slice::<HistoryState>(&data) {
            Ok(s) => s,
            Err(_) => {
                // Legacy format: a bare array of messages.
                let messages: Vec<Message> =
                    serde_json::from_slice(&data).map_err(|e| SessionError::Corrupt {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                HistoryState {
                    summary: String::new(),
                    messages,
                }
            }
        };

        *self.inner.write().expect("history poisoned") = state;
        Ok(())
    }
}

/// 8-hex-char unix-second prefix, underscore-terminated.
fn timestamp_prefix() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as u32;
    format!("{secs:08x}_")
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ariadne_core::ImageSource;

    fn text_history(texts: &[&str]) -> ChatHistory {
        let h = ChatHistory::new();
        for t in texts {
            h.append(Message::user(*t));
        }
        h
    }

    #[test]
    fn append_and_snapshot() {
        let h = text_history(&["one", "two"]);
        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        // The snapshot is detached from the live history.
        h.append(Message::user("three"));
        assert_eq!(snap.len(), 2);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn ensure_system_message_replaces_in_place() {
        let h = text_history(&["hi"]);
        h.ensure_system_message("first prompt");
        h.ensure_system_message("second prompt");

        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].role, Role::System);
        assert_eq!(snap[0].text_content(), "second prompt");
        // Idempotence: a repeat call with identical text changes nothing
        // structurally.
        h.ensure_system_message("second prompt");
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn truncate_preserves_system_message() {
        let h = ChatHistory::new();
        h.ensure_system_message("sys");
        for i in 0..10 {
            h.append(Message::user(format!("msg {i}")));
        }

        h.truncate_keep(3);
        let snap = h.snapshot();
        // keep + re-prepended system message
        assert_eq!(snap.len(), 4);
        assert_eq!(snap[0].role, Role::System);
        assert_eq!(snap[1].text_content(), "msg 7");
    }

    #[test]
    fn truncate_noop_when_short() {
        let h = text_history(&["a", "b"]);
        h.truncate_keep(5);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn truncate_deletes_dropped_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let img_path = dir.path().join("old.png");
        std::fs::write(&img_path, b"png-bytes").unwrap();

        let h = ChatHistory::new();
        let mut msg = Message::user("with image");
        msg.push_block(ContentBlock::image_from_file(&img_path, "image/png"));
        h.append(msg);
        for i in 0..5 {
            h.append(Message::user(format!("later {i}")));
        }

        h.truncate_keep(2);
        assert!(!img_path.exists(), "dropped attachment must be removed");
    }

    #[test]
    fn materialize_attachments_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let h = ChatHistory::new();
        let mut msg = Message::user("screenshot");
        msg.push_block(ContentBlock::image(vec![9, 9, 9], "image/png"));
        h.append(msg);

        h.materialize_attachments(dir.path()).unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);

        let snap = h.snapshot();
        let ContentBlock::Image { source } = &snap[0].content[1] else {
            panic!("expected image block");
        };
        assert_eq!(source.kind, ImageSourceKind::File);
        assert!(source.data.is_none());
        assert!(source.path.as_ref().unwrap().exists());

        // Second pass finds no inline bytes and changes nothing.
        h.materialize_attachments(dir.path()).unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn snapshot_ui_hydrates_file_images() {
        let dir = tempfile::tempdir().unwrap();
        let img_path = dir.path().join("pic.png");
        std::fs::write(&img_path, b"image-bytes").unwrap();

        let h = ChatHistory::new();
        let mut msg = Message::user("look");
        msg.push_block(ContentBlock::image_from_file(&img_path, "image/png"));
        h.append(msg);

        let ui = h.snapshot_ui();
        let ContentBlock::Image { source } = &ui[0].content[1] else {
            panic!("expected image block");
        };
        assert_eq!(source.data.as_deref(), Some(b"image-bytes".as_slice()));

        // The live history keeps the lean file reference.
        let plain = h.snapshot();
        let ContentBlock::Image { source } = &plain[0].content[1] else {
            panic!("expected image block");
        };
        assert!(source.data.is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history_web_global.json");

        let h = ChatHistory::new();
        h.ensure_system_message("sys");
        h.append(Message::user("hello"));
        h.append(Message::assistant("hi there"));
        h.set_summary("they greeted each other");
        h.save(&path).unwrap();

        let loaded = ChatHistory::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.summary(), "they greeted each other");
        assert_eq!(loaded.snapshot(), h.snapshot());
    }

    #[test]
    fn load_accepts_legacy_bare_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let legacy = serde_json::to_vec(&vec![Message::user("old format")]).unwrap();
        std::fs::write(&path, legacy).unwrap();

        let h = ChatHistory::new();
        h.load(&path).unwrap();
        assert_eq!(h.len(), 1);
        assert!(h.summary().is_empty());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let h = ChatHistory::new();
        h.load(Path::new("/nonexistent/history.json")).unwrap();
        assert!(h.is_empty());
    }

    #[test]
    fn load_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();

        let h = ChatHistory::new();
        assert!(h.load(&path).is_err());
    }

    #[test]
    fn timestamp_prefix_shape() {
        let prefix = timestamp_prefix();
        assert_eq!(prefix.len(), 9);
        assert!(prefix.ends_with('_'));
        assert!(u32::from_str_radix(&prefix[..8], 16).is_ok());
    }
}
