//! Note type: one markdown file in the vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed markdown note. The file on disk is the source of truth;
/// this value is rebuilt on every full scan and never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Vault-relative path with `/` separators and no extension.
    pub id: String,
    pub title: String,

    /// Body below the frontmatter block.
    pub content: String,

    /// Frontmatter keys in authored order.
    #[serde(default)]
    pub frontmatter: serde_json::Map<String, serde_json::Value>,

    /// Raw wikilink targets in order of appearance, repeats included.
    #[serde(default)]
    pub links: Vec<String>,

    /// Ids of notes linking here. Computed, one entry per resolved link.
    #[serde(default)]
    pub backlinks: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Note {
    /// Last path segment of the id (the file stem).
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

/// Normalize a vault-relative path or link target into note-id form:
/// backslashes become `/`, leading `./` and `/` are dropped, and a trailing
/// `.md` is stripped.
#[must_use]
pub fn normalize_note_id(raw: &str) -> String {
    let mut s = raw.trim().replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    let s = s.trim_start_matches('/');
    let s = s.strip_suffix(".md").unwrap_or(s);
    s.to_string()
}
