//! Vault configuration.
//!
//! Read from an optional `.lattice.toml` at the vault root. Every key has a
//! default, so an absent file and an empty file behave the same.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LatticeError, Result};

/// File name of the per-vault configuration, relative to the vault root.
pub const CONFIG_FILE: &str = ".lattice.toml";

/// Tunables for storage and note discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Backups kept per file name.
    pub backup_retention: usize,
    /// Retries of a failed temp-file write (in addition to the first attempt).
    pub write_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub retry_base_delay_ms: u64,
    /// Extension of note-bearing files, without the dot.
    pub note_extension: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backup_retention: 5,
            write_retries: 3,
            retry_base_delay_ms: 100,
            note_extension: "md".to_string(),
        }
    }
}

impl VaultConfig {
    /// Load the config for a vault, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`LatticeError::Config`] if the file exists but is not valid TOML
    /// for this schema, or [`LatticeError::Io`] if it cannot be read.
    pub fn load(vault_root: &Path) -> Result<Self> {
        let path = vault_root.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`LatticeError::Config`] on malformed input.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| LatticeError::Config(e.to_string()))
    }

    /// Base backoff delay as a [`Duration`].
    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}
