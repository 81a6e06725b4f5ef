//! Timestamped backups taken before a file is overwritten.
//!
//! Backups live flat in one directory as `<file-name>.<timestamp>.bak`,
//! where the timestamp sorts lexicographically in time order. After each
//! new backup, all but the newest `retention` backups of that file name
//! are deleted.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime, Utc};
use tokio::fs;

use lattice_core::error::Result;

/// `2025-02-10T09-15-00.123456Z`: ISO 8601 with `-` in place of `:` so it
/// is a valid file name everywhere.
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6fZ";

/// Creates, lists, and prunes backups in a single directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    /// `retention` below 1 is treated as 1.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Copy `path` into the backup directory and prune older backups of the
    /// same file name.
    ///
    /// Returns `Ok(None)` if `path` does not exist (nothing to back up).
    ///
    /// # Errors
    ///
    /// Returns [`lattice_core::LatticeError::Io`] if the copy fails. Pruning
    /// failures are logged, not returned.
    pub async fn snapshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        if !fs::try_exists(path).await? {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir).await?;
        let target = self.next_backup_path(name).await?;
        match fs::copy(path, &target).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(source = %path.display(), backup = %target.display(), "backup taken");

        if let Err(e) = self.prune(name).await {
            tracing::warn!(file = name, "failed to prune backups: {e}");
        }
        Ok(Some(target))
    }

    /// Backups of `file_name`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`lattice_core::LatticeError::Io`] if the directory cannot be read.
    pub async fn list(&self, file_name: &str) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let entry_name = entry.file_name();
            let Some(entry_name) = entry_name.to_str() else {
                continue;
            };
            if let Some(stamp) = backup_stamp(entry_name, file_name) {
                found.push((stamp, entry.path()));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, p)| p).collect())
    }

    /// Most recent backup of `file_name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`lattice_core::LatticeError::Io`] if the directory cannot be read.
    pub async fn latest(&self, file_name: &str) -> Result<Option<PathBuf>> {
        Ok(self.list(file_name).await?.pop())
    }

    /// Delete all but the newest `retention` backups of `file_name`.
    /// Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`lattice_core::LatticeError::Io`] if listing or deleting fails.
    pub async fn prune(&self, file_name: &str) -> Result<usize> {
        let backups = self.list(file_name).await?;
        let excess = backups.len().saturating_sub(self.retention);
        for old in &backups[..excess] {
            fs::remove_file(old).await?;
            tracing::debug!(backup = %old.display(), "pruned backup");
        }
        Ok(excess)
    }

    /// A backup path that does not exist yet. Two backups within the same
    /// microsecond get consecutive stamps.
    async fn next_backup_path(&self, file_name: &str) -> Result<PathBuf> {
        let mut stamp = Utc::now().naive_utc();
        loop {
            let candidate = self
                .dir
                .join(format!("{file_name}.{}.bak", stamp.format(STAMP_FORMAT)));
            if !fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
            stamp += Duration::microseconds(1);
        }
    }
}

/// Parse the timestamp out of `<file_name>.<stamp>.bak`, or `None` if
/// `entry` is not a backup of `file_name`.
fn backup_stamp(entry: &str, file_name: &str) -> Option<NaiveDateTime> {
    let stamp = entry
        .strip_prefix(file_name)?
        .strip_prefix('.')?
        .strip_suffix(".bak")?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_stamp_matches_only_own_file() {
        assert!(backup_stamp("index.json.2025-02-10T09-15-00.000001Z.bak", "index.json").is_some());
        assert!(backup_stamp("a.json.2025-02-10T09-15-00.000001Z.bak", "index.json").is_none());
        // `index.json` must not claim the backups of `index.json.old`.
        assert!(backup_stamp("index.json.old.2025-02-10T09-15-00.000001Z.bak", "index.json").is_none());
        assert!(backup_stamp("index.json.notastamp.bak", "index.json").is_none());
    }

    #[tokio::test]
    async fn snapshot_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BackupManager::new(dir.path().join(".backups"), 5);
        let taken = mgr.snapshot(&dir.path().join("absent.json")).await.unwrap();
        assert!(taken.is_none());
    }

    #[tokio::test]
    async fn snapshot_copies_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.json");
        std::fs::write(&file, "{\"v\":1}").unwrap();

        let mgr = BackupManager::new(dir.path().join(".backups"), 5);
        let backup = mgr.snapshot(&file).await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "{\"v\":1}");
    }

    #[tokio::test]
    async fn retention_keeps_newest_backups() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.json");
        let mgr = BackupManager::new(dir.path().join(".backups"), 3);

        for v in 0..6 {
            std::fs::write(&file, format!("v{v}")).unwrap();
            mgr.snapshot(&file).await.unwrap();
        }

        let kept = mgr.list("doc.json").await.unwrap();
        assert_eq!(kept.len(), 3);
        let contents: Vec<String> = kept
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(contents, ["v3", "v4", "v5"]);

        let latest = mgr.latest("doc.json").await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(latest).unwrap(), "v5");
    }

    #[tokio::test]
    async fn retention_is_per_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        let mgr = BackupManager::new(dir.path().join(".backups"), 1);

        mgr.snapshot(&a).await.unwrap();
        mgr.snapshot(&a).await.unwrap();
        mgr.snapshot(&b).await.unwrap();

        assert_eq!(mgr.list("a.json").await.unwrap().len(), 1);
        assert_eq!(mgr.list("b.json").await.unwrap().len(), 1);
    }
}
