//! Where note text comes from.
//!
//! The graph engine never opens files itself; it asks a [`NoteSource`] for
//! the list of note ids and for each note's raw text and timestamps.
//! [`FsNoteSource`] is the filesystem implementation used by a vault.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use lattice_core::error::{LatticeError, Result};

/// Raw text and file timestamps of one note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNote {
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Supplies note ids and note contents. Calls are blocking.
pub trait NoteSource: Send + Sync {
    /// Every note id currently available.
    ///
    /// # Errors
    ///
    /// Implementation-defined; typically [`LatticeError::Io`].
    fn list(&self) -> Result<Vec<String>>;

    /// Raw text and timestamps of note `id`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::NotFound`] if the note does not exist.
    fn read(&self, id: &str) -> Result<RawNote>;
}

/// Notes stored as files with a fixed extension under a root directory.
/// Hidden files and directories (leading `.`) are skipped.
#[derive(Debug, Clone)]
pub struct FsNoteSource {
    root: PathBuf,
    extension: String,
}

impl FsNoteSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of note `id` on disk.
    #[must_use]
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{}", self.extension))
    }

    /// Note id of a file under the root, or `None` if the path is outside
    /// the root, hidden, or has another extension.
    #[must_use]
    pub fn id_for(&self, path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
            return None;
        }
        let rel = path.strip_prefix(&self.root).ok()?.with_extension("");
        let mut parts = Vec::new();
        for component in rel.components() {
            let part = component.as_os_str().to_str()?;
            if part.starts_with('.') {
                return None;
            }
            parts.push(part);
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    fn visit_dir(&self, dir: &Path, ids: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type()?.is_dir() {
                self.visit_dir(&path, ids)?;
            } else if let Some(id) = self.id_for(&path) {
                ids.push(id);
            }
        }
        Ok(())
    }
}

impl NoteSource for FsNoteSource {
    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.root.is_dir() {
            return Ok(ids);
        }
        self.visit_dir(&self.root, &mut ids)?;
        ids.sort();
        Ok(ids)
    }

    fn read(&self, id: &str) -> Result<RawNote> {
        let path = self.path_for(id);
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LatticeError::NotFound {
                    kind: "note",
                    id: id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let meta = fs::metadata(&path)?;
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        // Not every filesystem records a birth time.
        let created = meta.created().unwrap_or(modified);
        Ok(RawNote {
            source,
            created_at: DateTime::<Utc>::from(created),
            modified_at: DateTime::<Utc>::from(modified),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_skips_hidden_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("top.md"), "").unwrap();
        fs::create_dir_all(root.join("ideas/deep")).unwrap();
        fs::write(root.join("ideas/deep/one.md"), "").unwrap();
        fs::write(root.join("ideas/readme.txt"), "").unwrap();
        fs::write(root.join(".hidden.md"), "").unwrap();
        fs::create_dir_all(root.join(".whiteboards")).unwrap();
        fs::write(root.join(".whiteboards/not-a-note.md"), "").unwrap();

        let source = FsNoteSource::new(root, "md");
        assert_eq!(source.list().unwrap(), ["ideas/deep/one", "top"]);
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsNoteSource::new(dir.path().join("nope"), "md");
        assert!(source.list().unwrap().is_empty());
    }

    #[test]
    fn custom_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.markdown"), "x").unwrap();
        fs::write(dir.path().join("b.md"), "x").unwrap();

        let source = FsNoteSource::new(dir.path(), ".markdown");
        assert_eq!(source.list().unwrap(), ["a"]);
        assert_eq!(source.read("a").unwrap().source, "x");
    }

    #[test]
    fn read_returns_text_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("n.md"), "# N\nbody").unwrap();

        let raw = FsNoteSource::new(dir.path(), "md").read("n").unwrap();
        assert_eq!(raw.source, "# N\nbody");
        assert!(raw.modified_at.timestamp() > 0);
    }

    #[test]
    fn read_missing_note_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsNoteSource::new(dir.path(), "md").read("ghost").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn id_for_rejects_hidden_and_outside_paths() {
        let source = FsNoteSource::new("/vault", "md");
        assert_eq!(source.id_for(Path::new("/vault/a/b.md")).as_deref(), Some("a/b"));
        assert_eq!(source.id_for(Path::new("/vault/.trash/b.md")), None);
        assert_eq!(source.id_for(Path::new("/elsewhere/b.md")), None);
        assert_eq!(source.id_for(Path::new("/vault/a/b.txt")), None);
    }
}
