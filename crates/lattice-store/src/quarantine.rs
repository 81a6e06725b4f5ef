//! Quarantine: move a corrupt file aside instead of deleting or overwriting it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;

/// Rename `path` to `<path>.corrupted.<epoch-millis>.bak` in the same
/// directory. An earlier quarantine in the same millisecond bumps the stamp.
///
/// Best-effort: if the file is already gone (another reader moved it first)
/// or the rename fails, this logs and returns `None` instead of failing the
/// load that discovered the corruption.
pub async fn quarantine(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let target = free_target(path, name).await;

    match fs::rename(path, &target).await {
        Ok(()) => {
            tracing::warn!(file = %path.display(), moved_to = %target.display(), "quarantined corrupt file");
            Some(target)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(file = %path.display(), "corrupt file already moved aside");
            None
        }
        Err(e) => {
            tracing::warn!(file = %path.display(), "could not quarantine corrupt file: {e}");
            None
        }
    }
}

async fn free_target(path: &Path, name: &str) -> PathBuf {
    let mut stamp = Utc::now().timestamp_millis();
    loop {
        let candidate = path.with_file_name(format!("{name}.corrupted.{stamp}.bak"));
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        stamp += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn moves_file_and_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.json");
        std::fs::write(&file, "{ not json").unwrap();

        let moved = quarantine(&file).await.unwrap();
        assert!(!file.exists());
        let name = moved.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("index.json.corrupted."));
        assert!(name.ends_with(".bak"));
        assert_eq!(std::fs::read_to_string(moved).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn earlier_quarantines_are_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.json");
        let now = Utc::now().timestamp_millis();
        for stamp in now..now + 50 {
            let taken = dir.path().join(format!("index.json.corrupted.{stamp}.bak"));
            std::fs::write(taken, stamp.to_string()).unwrap();
        }

        std::fs::write(&file, "second").unwrap();
        let moved = quarantine(&file).await.unwrap();
        assert_eq!(std::fs::read_to_string(&moved).unwrap(), "second");

        for stamp in now..now + 50 {
            let taken = dir.path().join(format!("index.json.corrupted.{stamp}.bak"));
            assert_ne!(taken, moved);
            assert_eq!(std::fs::read_to_string(taken).unwrap(), stamp.to_string());
        }
    }

    #[tokio::test]
    async fn already_moved_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(quarantine(&dir.path().join("gone.json")).await.is_none());
    }
}
