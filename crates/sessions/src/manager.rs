//! The named-session registry.
//!
//! Histories are created on first lookup and never destroyed in-process.
//! When a storage directory is configured, lookups lazily load the session
//! file and saves run attachment materialization first so the JSON on disk
//! never embeds raw image bytes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use ariadne_core::SessionError;
use tracing::{debug, warn};

use crate::history::ChatHistory;

/// Manages conversation histories isolated by session id.
///
/// The manager's map lock and each history's lock are distinct and always
/// taken manager-then-history, briefly.
pub struct SessionManager {
    histories: RwLock<HashMap<String, Arc<ChatHistory>>>,
    storage: Option<PathBuf>,
}

impl SessionManager {
    /// Create a manager persisting under `storage`, or fully in-memory when
    /// `None`.
    pub fn new(storage: Option<PathBuf>) -> Self {
        if let Some(dir) = &storage {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to create session storage directory");
            }
        }
        Self {
            histories: RwLock::new(HashMap::new()),
            storage,
        }
    }

    /// Fetch the live history for a session, creating (and loading, when
    /// storage is configured) it on first access. Unreadable session files
    /// degrade to an empty history.
    pub fn get_history(&self, session_id: &str) -> Arc<ChatHistory> {
        if let Some(h) = self
            .histories
            .read()
            .expect("session map poisoned")
            .get(session_id)
        {
            return Arc::clone(h);
        }

        let mut map = self.histories.write().expect("session map poisoned");
        // Double check under the write lock.
        if let Some(h) = map.get(session_id) {
            return Arc::clone(h);
        }

        let history = Arc::new(ChatHistory::new());
        if let Some(path) = self.history_path(session_id) {
            match history.load(&path) {
                Ok(()) => debug!(session = session_id, messages = history.len(), "Session loaded"),
                Err(e) => {
                    warn!(session = session_id, error = %e, "Failed to load session, starting empty")
                }
            }
        }

        map.insert(session_id.to_string(), Arc::clone(&history));
        history
    }

    /// Persist one session: materialize inline attachments, then write the
    /// history JSON. A no-op without configured storage or for unknown ids.
    pub fn save_session(&self, session_id: &str) -> Result<(), SessionError> {
        let history = {
            let map = self.histories.read().expect("session map poisoned");
            match map.get(session_id) {
                Some(h) => Arc::clone(h),
                None => return Ok(()),
            }
        };

        let Some(path) = self.history_path(session_id) else {
            return Ok(());
        };

        history.materialize_attachments(&self.attachments_dir())?;
        history.save(&path)
    }

    /// Attachment files live beside the sessions directory so they survive
    /// session-file rewrites.
    pub fn attachments_dir(&self) -> PathBuf {
        match &self.storage {
            Some(dir) => dir.join("..").join("attachments"),
            None => PathBuf::from("attachments"),
        }
    }

    fn history_path(&self, session_id: &str) -> Option<PathBuf> {
        self.storage
            .as_ref()
            .map(|dir| dir.join(format!("history_{}.json", safe_id(session_id))))
    }
}

/// Filename-safe encoding: everything outside `[A-Za-z0-9_-]` becomes `_`.
fn safe_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
