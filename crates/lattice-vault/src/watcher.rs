//! File system watcher for note changes.
//!
//! Uses the `notify` crate for cross-platform file system events. Only
//! note files outside hidden directories are reported, so whiteboard
//! writes and backups under `.whiteboards/` never trigger a rescan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use lattice_core::error::{LatticeError, Result};

/// Events emitted by the vault watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    /// A note file was created or modified.
    Changed(PathBuf),
    /// A note file was deleted.
    Removed(PathBuf),
}

impl VaultEvent {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Changed(p) | Self::Removed(p) => p,
        }
    }
}

/// Watches a vault directory and emits [`VaultEvent`]s.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<VaultEvent>,
}

impl std::fmt::Debug for VaultWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultWatcher").finish_non_exhaustive()
    }
}

impl VaultWatcher {
    /// Start watching `vault_root` for files ending in `.{extension}`.
    ///
    /// # Errors
    ///
    /// Returns [`LatticeError::Io`] if the watcher cannot be created.
    pub fn start(vault_root: &Path, extension: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let root = vault_root.to_path_buf();
        let extension = extension.trim_start_matches('.').to_string();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("watch error: {e}");
                    return;
                }
            };
            for path in &event.paths {
                if path.extension().and_then(|e| e.to_str()) != Some(extension.as_str()) {
                    continue;
                }
                if is_hidden(&root, path) {
                    continue;
                }
                let vault_event = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => VaultEvent::Changed(path.clone()),
                    EventKind::Remove(_) => VaultEvent::Removed(path.clone()),
                    _ => continue,
                };
                // The receiver is gone once the watcher is dropped.
                let _ = tx.send(vault_event);
            }
        })
        .map_err(|e| LatticeError::Io(std::io::Error::other(e)))?;

        watcher
            .watch(vault_root, RecursiveMode::Recursive)
            .map_err(|e| LatticeError::Io(std::io::Error::other(e)))?;
        tracing::debug!(root = %vault_root.display(), "watching vault");

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Next event, or `None` if nothing arrives within `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<VaultEvent> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<VaultEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait for an event, then keep collecting until `quiet` passes with no
    /// new event. Returns `None` once the watcher has shut down.
    pub async fn next_batch(&mut self, quiet: Duration) -> Option<Vec<VaultEvent>> {
        let first = self.receiver.recv().await?;
        let mut batch = vec![first];
        while let Some(event) = self.recv_timeout(quiet).await {
            batch.push(event);
        }
        Some(batch)
    }
}

/// True if any component of `path` below `root` starts with `.`.
fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root).is_ok_and(|rel| {
        rel.components()
            .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn hidden_paths() {
        let root = Path::new("/vault");
        assert!(is_hidden(root, Path::new("/vault/.whiteboards/x.md")));
        assert!(is_hidden(root, Path::new("/vault/a/.drafts/x.md")));
        assert!(!is_hidden(root, Path::new("/vault/a/x.md")));
    }

    #[tokio::test]
    async fn watcher_detects_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let vault_root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(vault_root.join("projects")).unwrap();

        let mut watcher = VaultWatcher::start(&vault_root, "md").unwrap();
        fs::write(vault_root.join("projects/test.md"), "# Test").unwrap();

        match watcher.recv_timeout(Duration::from_secs(2)).await {
            Some(VaultEvent::Changed(path)) => {
                assert!(path.to_string_lossy().contains("test.md"));
            }
            other => panic!("expected Changed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watcher_detects_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let vault_root = dir.path().canonicalize().unwrap();
        let file = vault_root.join("gone.md");
        fs::write(&file, "# Delete me").unwrap();

        let mut watcher = VaultWatcher::start(&vault_root, "md").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::remove_file(&file).unwrap();

        let mut found_removed = false;
        for _ in 0..10 {
            match watcher.recv_timeout(Duration::from_secs(2)).await {
                Some(VaultEvent::Removed(path)) => {
                    assert!(path.to_string_lossy().contains("gone.md"));
                    found_removed = true;
                    break;
                }
                Some(VaultEvent::Changed(_)) => continue,
                None => break,
            }
        }
        assert!(found_removed, "expected watcher to emit Removed event");
    }

    #[tokio::test]
    async fn watcher_ignores_hidden_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let vault_root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(vault_root.join(".whiteboards")).unwrap();

        let mut watcher = VaultWatcher::start(&vault_root, "md").unwrap();
        fs::write(vault_root.join(".whiteboards/index.md"), "{}").unwrap();
        fs::write(vault_root.join("notes.txt"), "plain").unwrap();

        let event = watcher.recv_timeout(Duration::from_millis(500)).await;
        assert!(event.is_none(), "unexpected event {event:?}");
    }
}
