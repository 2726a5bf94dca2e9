//! Raw-frame capture for provider streams.
//!
//! When `debug_chunks` is enabled, every raw frame a provider receives is
//! appended to `debug/chunks/<provider>/<debug_id_or_ts>.log`, one frame per
//! line. A `--- ROUND START ---` separator precedes each call so the
//! recursive calls of one turn stay distinguishable inside a shared file.
//! The file is opened lazily on the first frame so a silent stream leaves no
//! empty artifact behind.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

pub struct StreamDebugger {
    enabled: bool,
    path: PathBuf,
    file: Option<File>,
}

impl StreamDebugger {
    /// Prepare a capture for one streaming call. `debug_id` namespaces the
    /// file so all round-trips of one user input land together; without it a
    /// timestamp is used.
    pub fn new(provider: &str, debug_id: Option<&str>, enabled: bool) -> Self {
        Self::rooted(Path::new("debug"), provider, debug_id, enabled)
    }

    /// Same capture rooted at an explicit base directory.
    fn rooted(base: &Path, provider: &str, debug_id: Option<&str>, enabled: bool) -> Self {
        let stem = match debug_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Utc::now().format("%Y%m%d_%H%M%S").to_string(),
        };
        let path = base
            .join("chunks")
            .join(provider)
            .join(format!("{stem}.log"));
        Self {
            enabled,
            path,
            file: None,
        }
    }

    /// Append one raw frame.
    pub fn write(&mut self, frame: &str) {
        if !self.enabled {
            return;
        }
        if self.file.is_none() && !self.open() {
            return;
        }
        if let Some(f) = &mut self.file {
            if let Err(e) = writeln!(f, "{frame}") {
                warn!(error = %e, "Failed to write debug frame");
            }
        }
    }

    fn open(&mut self) -> bool {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(dir = %parent.display(), error = %e, "Failed to create debug directory");
                self.enabled = false;
                return false;
            }
        }
        match OpenOptions::new().append(true).create(true).open(&self.path) {
            Ok(mut f) => {
                let _ = writeln!(
                    f,
                    "--- ROUND START: {} ---",
                    Utc::now().format("%Y-%m-%d %H:%M:%S")
                );
                self.file = Some(f);
                true
            }
            Err(e) => {
                warn!(file = %self.path.display(), error = %e, "Failed to open debug file");
                self.enabled = false;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_debugger_writes_nothing() {
        let mut d = StreamDebugger::new("test", Some("abcd"), false);
        d.write("{\"frame\":1}");
        assert!(d.file.is_none());
    }

    #[test]
    fn lazy_open_and_round_separator() {
        let dir = tempfile::tempdir().unwrap();

        let mut d = StreamDebugger::rooted(dir.path(), "test", Some("abcd"), true);
        let expected = dir.path().join("chunks/test/abcd.log");
        assert!(!expected.exists(), "no file before the first frame");

        d.write("{\"frame\":1}");
        d.write("{\"frame\":2}");

        let content = std::fs::read_to_string(&expected).unwrap();
        assert!(content.starts_with("--- ROUND START:"));
        assert!(content.contains("{\"frame\":1}"));
        assert!(content.contains("{\"frame\":2}"));
    }

    #[test]
    fn default_root_builds_expected_path() {
        let d = StreamDebugger::new("openai", Some("beef"), false);
        assert_eq!(
            d.path,
            Path::new("debug").join("chunks").join("openai").join("beef.log")
        );
    }
}
