//! Configuration-file watcher.
//!
//! Polls the modification times of the watched files from a background task
//! and emits one debounced reload tick roughly 500 ms after the last observed
//! change. Polling (rather than a platform notification API) also survives
//! the atomic rename-into-place saves editors perform, because the path is
//! re-stat'd on every pass.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watch the given files for changes.
///
/// Returns a receiver yielding one `()` per debounced change burst. The
/// watcher task exits when the receiver is dropped.
pub fn watch_config(files: Vec<PathBuf>) -> mpsc::Receiver<()> {
    // Buffer of 1 so a pending tick never blocks the watcher.
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut mtimes: Vec<Option<SystemTime>> = files.iter().map(|p| mtime_of(p)).collect();
        for file in &files {
            debug!(file = %file.display(), "Watching configuration file");
        }

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut pending_since: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tx.closed() => return,
            }

            let mut changed = false;
            for (i, file) in files.iter().enumerate() {
                let current = mtime_of(file);
                if current != mtimes[i] {
                    mtimes[i] = current;
                    changed = true;
                    info!(file = %file.display(), "Configuration change detected");
                }
            }

            if changed {
                pending_since = Some(tokio::time::Instant::now());
            }

            if let Some(since) = pending_since {
                if since.elapsed() >= DEBOUNCE {
                    pending_since = None;
                    // Non-blocking send: coalesce while a tick is unread.
                    let _ = tx.try_send(());
                }
            }
        }
    });

    rx
}

fn mtime_of(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn emits_tick_after_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let mut rx = watch_config(vec![path.clone()]);

        // Give the watcher a baseline pass, then rewrite the file. Some
        // filesystems have coarse mtime resolution, so force a distinct value.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"changed": true}}"#).unwrap();
        drop(f);
        filetime_touch(&path);

        let tick = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(tick.is_ok(), "expected a reload tick after file change");
    }

    #[tokio::test]
    async fn silent_files_emit_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let mut rx = watch_config(vec![path]);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let tick = rx.try_recv();
        assert!(tick.is_err(), "no tick expected without changes");
    }

    fn filetime_touch(path: &std::path::Path) {
        // Re-open in append mode and write a byte to bump mtime reliably.
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(b"\n").unwrap();
    }
}
