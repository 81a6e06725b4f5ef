//! Whiteboard persistence: one JSON file per document plus an index.
//!
//! Reads never fail on bad data. An empty or unparsable file is quarantined
//! and replaced by a default; a document with missing collections, legacy
//! arrows or malformed elements is normalized element by element; a
//! document with dangling references is sanitized on its way back to disk.
//! Every write goes through the [`WriteQueue`].
//!
//! Loading the index may write (a migrated or default index), so every
//! operation that loads it holds the store's mutation lock.

use std::sync::Arc;

use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use lattice_core::error::{LatticeError, Result};
use lattice_core::normalize::{normalize_whiteboard, LegacyMetadata};
use lattice_core::sanitize::sanitize;
use lattice_core::whiteboard::{
    CardPosition, Whiteboard, WhiteboardIndex, WhiteboardSet, DEFAULT_WHITEBOARD_ID,
};

use crate::atomic::WriteQueue;
use crate::layout::{validate_whiteboard_id, VaultLayout};
use crate::quarantine::quarantine;

/// Where a loaded index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// `index.json` existed and parsed.
    Found,
    /// Built by splitting the legacy single-file metadata.
    LegacyMigrated,
    /// Neither existed (or both were unusable); a default was written.
    DefaultSynthesized,
}

/// An index together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedIndex {
    pub index: WhiteboardIndex,
    pub source: IndexSource,
}

/// Outcome of reading one JSON file.
enum JsonFile {
    Missing,
    Corrupt(String),
    Parsed(Value),
}

/// Loads and saves whiteboard documents under a vault's `.whiteboards/`.
#[derive(Debug)]
pub struct DocumentStore {
    layout: VaultLayout,
    writer: Arc<WriteQueue>,
    /// Serializes read-modify-write operations issued through this store.
    mutation: Mutex<()>,
}

impl DocumentStore {
    #[must_use]
    pub fn new(layout: VaultLayout, writer: Arc<WriteQueue>) -> Self {
        Self {
            layout,
            writer,
            mutation: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    #[must_use]
    pub fn writer(&self) -> &WriteQueue {
        &self.writer
    }

    /// Load the index, migrating or synthesizing one if needed.
    ///
    /// # Errors
    ///
    /// Only I/O errors other than "not found" while reading, and write
    /// failures while persisting a migrated or default index.
    pub async fn load_index(&self) -> Result<LoadedIndex> {
        let _guard = self.mutation.lock().await;
        self.load_index_locked().await
    }

    /// [`DocumentStore::load_index`] for callers already holding the lock.
    async fn load_index_locked(&self) -> Result<LoadedIndex> {
        let path = self.layout.index_path();
        match read_json(&path).await? {
            JsonFile::Parsed(value) => match serde_json::from_value::<WhiteboardIndex>(value) {
                Ok(index) => {
                    return Ok(LoadedIndex {
                        index: repair_index(index),
                        source: IndexSource::Found,
                    })
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), "index does not match schema: {e}");
                    quarantine(&path).await;
                }
            },
            JsonFile::Corrupt(why) => {
                tracing::warn!(file = %path.display(), "index is corrupt: {why}");
                quarantine(&path).await;
            }
            JsonFile::Missing => {}
        }

        if let Some(index) = self.migrate_legacy().await? {
            return Ok(LoadedIndex {
                index,
                source: IndexSource::LegacyMigrated,
            });
        }

        let index = WhiteboardIndex::default();
        self.save_index(&index).await?;
        tracing::info!("synthesized default whiteboard index");
        Ok(LoadedIndex {
            index,
            source: IndexSource::DefaultSynthesized,
        })
    }

    /// Load every document listed in the index, in index order.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::load_index`].
    pub async fn load_all(&self) -> Result<WhiteboardSet> {
        let _guard = self.mutation.lock().await;
        let index = self.load_index_locked().await?.index;
        let mut whiteboards = Vec::with_capacity(index.whiteboards.len());
        for id in &index.whiteboards {
            whiteboards.push(self.load_document(id).await?);
        }
        Ok(WhiteboardSet { index, whiteboards })
    }

    /// Persist every document in `set`, then the index. Documents missing
    /// from the index are appended to it.
    ///
    /// # Errors
    ///
    /// Fails on the first document or index write that fails; earlier
    /// writes stay on disk.
    pub async fn save_all(&self, set: &WhiteboardSet) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let mut index = set.index.clone();
        for doc in &set.whiteboards {
            self.save_document(doc).await?;
            if !index.contains(&doc.id) {
                index.whiteboards.push(doc.id.clone());
            }
        }
        self.save_index(&repair_index(index)).await
    }

    /// Load document `id`, or an empty one if its file does not exist.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Parse`] for an invalid id; I/O errors other than
    /// "not found".
    pub async fn load_document(&self, id: &str) -> Result<Whiteboard> {
        Ok(self
            .read_document(id)
            .await?
            .unwrap_or_else(|| Whiteboard::empty(id)))
    }

    /// Sanitize a copy of `doc` and write it to its file.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Parse`] for an invalid id; any write failure.
    pub async fn save_document(&self, doc: &Whiteboard) -> Result<()> {
        let path = self.layout.document_path(&doc.id)?;
        let mut doc = doc.clone();
        sanitize(&mut doc);
        let json = serde_json::to_string_pretty(&doc)?;
        self.writer.write(&path, json).await
    }

    /// Write the index file.
    ///
    /// # Errors
    ///
    /// Any write failure.
    pub async fn save_index(&self, index: &WhiteboardIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index)?;
        self.writer.write(self.layout.index_path(), json).await
    }

    /// Place `card` on `card.whiteboard_id`, first removing it from every
    /// other whiteboard in the index.
    ///
    /// Each document save is atomic, but the operation as a whole is not:
    /// a crash between the removals and the final save can leave the card
    /// on no board.
    ///
    /// # Errors
    ///
    /// [`LatticeError::Parse`] for an invalid target id; any write failure.
    pub async fn update_card_position(&self, card: CardPosition) -> Result<()> {
        let target = card.whiteboard_id.clone();
        validate_whiteboard_id(&target)?;

        let _guard = self.mutation.lock().await;
        let mut index = self.load_index_locked().await?.index;

        for other in index.whiteboards.iter().filter(|id| **id != target) {
            let Some(mut doc) = self.read_document(other).await? else {
                continue;
            };
            if doc.remove_card(&card.note_id) {
                doc.touch();
                self.save_document(&doc).await?;
                tracing::debug!(card = %card.note_id, from = %other, to = %target, "moved card off whiteboard");
            }
        }

        let mut doc = self.load_document(&target).await?;
        doc.upsert_card(card);
        doc.touch();
        self.save_document(&doc).await?;

        if !index.contains(&target) {
            index.whiteboards.push(target);
            self.save_index(&index).await?;
        }
        Ok(())
    }

    /// Remove a card, its group memberships, and arrows touching it from
    /// whiteboard `whiteboard_id`.
    ///
    /// # Errors
    ///
    /// [`LatticeError::NotFound`] if the whiteboard is not in the index or
    /// has no file; any write failure.
    pub async fn remove_card_from_document(&self, note_id: &str, whiteboard_id: &str) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let index = self.load_index_locked().await?.index;
        if !index.contains(whiteboard_id) {
            return Err(LatticeError::whiteboard_not_found(whiteboard_id));
        }
        let Some(mut doc) = self.read_document(whiteboard_id).await? else {
            return Err(LatticeError::whiteboard_not_found(whiteboard_id));
        };

        if !doc.remove_card(note_id) {
            tracing::debug!(card = note_id, whiteboard = whiteboard_id, "card was not on whiteboard");
        }
        doc.touch();
        self.save_document(&doc).await
    }

    /// Card positions on `whiteboard_id`; empty for an unknown whiteboard.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::load_index`].
    pub async fn get_card_positions(&self, whiteboard_id: &str) -> Result<Vec<CardPosition>> {
        let _guard = self.mutation.lock().await;
        let index = self.load_index_locked().await?.index;
        if !index.contains(whiteboard_id) {
            return Ok(Vec::new());
        }
        Ok(self.load_document(whiteboard_id).await?.cards)
    }

    /// `Ok(None)` if the file does not exist. Corrupt files are quarantined
    /// and come back as an empty document.
    async fn read_document(&self, id: &str) -> Result<Option<Whiteboard>> {
        let path = self.layout.document_path(id)?;
        let value = match read_json(&path).await? {
            JsonFile::Missing => return Ok(None),
            JsonFile::Corrupt(why) => {
                tracing::warn!(whiteboard = id, "document is corrupt: {why}");
                quarantine(&path).await;
                return Ok(Some(Whiteboard::empty(id)));
            }
            JsonFile::Parsed(value) => value,
        };

        match normalize_whiteboard(value, id) {
            Ok((mut doc, report)) => {
                if !report.is_clean() {
                    tracing::info!(
                        whiteboard = id,
                        backfilled = ?report.backfilled,
                        legacy_arrows = report.legacy_arrows,
                        repaired = report.repaired_elements,
                        dropped = report.dropped_elements,
                        "normalized whiteboard schema"
                    );
                }
                if doc.id != id {
                    tracing::warn!(whiteboard = id, stored_id = %doc.id, "document id does not match its file; using file id");
                    doc.id = id.to_string();
                }
                Ok(Some(doc))
            }
            Err(e) => {
                tracing::warn!(whiteboard = id, "document is not a whiteboard: {e}");
                quarantine(&path).await;
                Ok(Some(Whiteboard::empty(id)))
            }
        }
    }

    /// Split `.whiteboard-metadata.json` into per-document files and an
    /// index, then rename it to `.whiteboard-metadata.json.backup`.
    /// `Ok(None)` when there is no usable legacy file.
    async fn migrate_legacy(&self) -> Result<Option<WhiteboardIndex>> {
        let legacy_path = self.layout.legacy_metadata_path();
        let value = match read_json(&legacy_path).await? {
            JsonFile::Parsed(value) => value,
            JsonFile::Missing => return Ok(None),
            JsonFile::Corrupt(why) => {
                tracing::warn!(file = %legacy_path.display(), "legacy metadata unreadable, skipping migration: {why}");
                return Ok(None);
            }
        };
        let legacy: LegacyMetadata = match serde_json::from_value(value) {
            Ok(legacy) => legacy,
            Err(e) => {
                tracing::warn!(file = %legacy_path.display(), "legacy metadata has unexpected shape: {e}");
                return Ok(None);
            }
        };

        let active = legacy.active_whiteboard_id.clone();
        let mut ids: Vec<String> = Vec::new();
        for (doc, _) in legacy.into_whiteboards() {
            if let Err(e) = validate_whiteboard_id(&doc.id) {
                tracing::warn!("skipping legacy whiteboard: {e}");
                continue;
            }
            if ids.contains(&doc.id) {
                tracing::warn!(whiteboard = %doc.id, "skipping duplicate legacy whiteboard");
                continue;
            }
            self.save_document(&doc).await?;
            ids.push(doc.id);
        }

        let mut index = repair_index(WhiteboardIndex::with_ids(ids));
        if let Some(active) = active.filter(|a| index.contains(a)) {
            index.active_whiteboard_id = active;
        }
        self.save_index(&index).await?;

        let backup = self.layout.legacy_backup_path();
        if let Err(e) = fs::rename(&legacy_path, &backup).await {
            tracing::warn!(file = %legacy_path.display(), "migrated, but could not rename legacy file: {e}");
        }
        tracing::info!(whiteboards = index.whiteboards.len(), "migrated legacy whiteboard metadata");
        Ok(Some(index))
    }
}

async fn read_json(path: &std::path::Path) -> Result<JsonFile> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(JsonFile::Missing),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Ok(JsonFile::Corrupt(format!("not UTF-8: {e}")))
        }
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(JsonFile::Corrupt("file is empty".to_string()));
    }
    Ok(match serde_json::from_str(&raw) {
        Ok(value) => JsonFile::Parsed(value),
        Err(e) => JsonFile::Corrupt(e.to_string()),
    })
}

/// Drop invalid and duplicate ids, guarantee at least one whiteboard, and
/// point the active id at a listed whiteboard.
fn repair_index(mut index: WhiteboardIndex) -> WhiteboardIndex {
    let mut seen: Vec<String> = Vec::with_capacity(index.whiteboards.len());
    for id in index.whiteboards.drain(..) {
        if let Err(e) = validate_whiteboard_id(&id) {
            tracing::warn!("dropping index entry: {e}");
        } else if !seen.contains(&id) {
            seen.push(id);
        }
    }
    if seen.is_empty() {
        seen.push(DEFAULT_WHITEBOARD_ID.to_string());
    }
    index.whiteboards = seen;

    if !index.contains(&index.active_whiteboard_id) {
        index.active_whiteboard_id = index.whiteboards[0].clone();
    }
    index
}
