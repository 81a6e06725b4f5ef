//! On-disk layout of a vault's whiteboard storage.
//!
//! ```text
//! <root>/.whiteboards/index.json
//! <root>/.whiteboards/<id>.json
//! <root>/.whiteboards/.backups/<name>.<timestamp>.bak
//! <root>/.whiteboard-metadata.json          legacy, pre-migration
//! <root>/.whiteboard-metadata.json.backup   legacy, after migration
//! ```

use std::path::{Path, PathBuf};

use lattice_core::error::{LatticeError, Result};

pub const WHITEBOARD_DIR: &str = ".whiteboards";
pub const INDEX_FILE: &str = "index.json";
pub const BACKUP_DIR: &str = ".backups";
pub const LEGACY_METADATA_FILE: &str = ".whiteboard-metadata.json";
pub const LEGACY_BACKUP_SUFFIX: &str = ".backup";

/// Resolves whiteboard storage paths under a vault root.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn whiteboard_dir(&self) -> PathBuf {
        self.root.join(WHITEBOARD_DIR)
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.whiteboard_dir().join(INDEX_FILE)
    }

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.whiteboard_dir().join(BACKUP_DIR)
    }

    #[must_use]
    pub fn legacy_metadata_path(&self) -> PathBuf {
        self.root.join(LEGACY_METADATA_FILE)
    }

    #[must_use]
    pub fn legacy_backup_path(&self) -> PathBuf {
        self.root
            .join(format!("{LEGACY_METADATA_FILE}{LEGACY_BACKUP_SUFFIX}"))
    }

    /// Path of the document file for whiteboard `id`.
    ///
    /// # Errors
    ///
    /// Returns [`LatticeError::Parse`] if `id` is not usable as a file stem.
    pub fn document_path(&self, id: &str) -> Result<PathBuf> {
        validate_whiteboard_id(id)?;
        Ok(self.whiteboard_dir().join(format!("{id}.json")))
    }
}

/// Whiteboard ids become file stems inside `.whiteboards/`, so they must be
/// a single non-hidden path segment and must not shadow the index file.
///
/// # Errors
///
/// Returns [`LatticeError::Parse`] describing why `id` was rejected.
pub fn validate_whiteboard_id(id: &str) -> Result<()> {
    let reject = |why: &str| -> Result<()> {
        Err(LatticeError::Parse(format!("invalid whiteboard id '{id}': {why}")))
    };

    if id.trim().is_empty() {
        return reject("empty");
    }
    if id.contains(['/', '\\', '\0']) {
        return reject("contains a path separator");
    }
    if id.starts_with('.') {
        return reject("starts with '.'");
    }
    if format!("{id}.json") == INDEX_FILE {
        return reject("reserved for the index file");
    }
    Ok(())
}
