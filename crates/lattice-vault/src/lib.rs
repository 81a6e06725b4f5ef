//! # lattice-vault
//!
//! One explicitly constructed [`Vault`] per vault directory. It owns the
//! write queue, the whiteboard document store and the graph engine, and is
//! the single surface the rest of an application talks to.
//!
//! The markdown files are the source of truth for notes; the graph is a
//! derived view rebuilt by [`Vault::build_graph`]. Whiteboards live under
//! `.whiteboards/` and are only ever written through the write queue.

pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lattice_core::config::VaultConfig;
use lattice_core::error::Result;
use lattice_core::note::Note;
use lattice_core::whiteboard::{CardPosition, WhiteboardSet};
use lattice_graph::{FsNoteSource, Graph, GraphEngine};
use lattice_store::{BackupManager, DocumentStore, QueueStats, RetryPolicy, VaultLayout, WriteQueue};

pub use watcher::{VaultEvent, VaultWatcher};

/// Default depth of [`Vault::get_local_graph`] when callers have no
/// preference.
pub const DEFAULT_LOCAL_DEPTH: usize = 1;

/// A knowledge-base directory: notes, whiteboards, and their backups.
#[derive(Debug)]
pub struct Vault {
    root: PathBuf,
    config: VaultConfig,
    writer: Arc<WriteQueue>,
    store: DocumentStore,
    graph: GraphEngine,
}

impl Vault {
    /// Open the vault at `root`, reading `.lattice.toml` if present.
    /// Nothing is written until the first operation that needs to.
    ///
    /// # Errors
    ///
    /// Returns [`lattice_core::LatticeError::Config`] if the config file is
    /// malformed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = VaultConfig::load(&root)?;
        Ok(Self::with_config(root, config))
    }

    /// Open the vault at `root` with an explicit configuration.
    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: VaultConfig) -> Self {
        let root = root.into();
        let layout = VaultLayout::new(&root);
        let writer = Arc::new(WriteQueue::new(
            BackupManager::new(layout.backup_dir(), config.backup_retention),
            RetryPolicy::from_config(&config),
        ));
        let store = DocumentStore::new(layout, Arc::clone(&writer));
        let graph = GraphEngine::new(Arc::new(FsNoteSource::new(&root, config.note_extension.as_str())));
        tracing::debug!(root = %root.display(), "vault opened");
        Self {
            root,
            config,
            writer,
            store,
            graph,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    // --- whiteboards ---

    /// Every whiteboard listed in the index, migrating or creating the
    /// index first if needed.
    ///
    /// # Errors
    ///
    /// I/O failures other than corruption, which is repaired in place.
    pub async fn load_metadata(&self) -> Result<WhiteboardSet> {
        self.store.load_all().await
    }

    /// Persist every whiteboard in `set` and the index.
    ///
    /// # Errors
    ///
    /// The first failing write.
    pub async fn save_metadata(&self, set: &WhiteboardSet) -> Result<()> {
        self.store.save_all(set).await
    }

    /// Move or place a card; see [`DocumentStore::update_card_position`].
    ///
    /// # Errors
    ///
    /// Invalid whiteboard id or a failing write.
    pub async fn update_card_position(&self, card: CardPosition) -> Result<()> {
        self.store.update_card_position(card).await
    }

    /// Remove a note's card from one whiteboard.
    ///
    /// # Errors
    ///
    /// [`lattice_core::LatticeError::NotFound`] if the whiteboard does not
    /// exist.
    pub async fn remove_card_from_whiteboard(&self, note_id: &str, whiteboard_id: &str) -> Result<()> {
        self.store.remove_card_from_document(note_id, whiteboard_id).await
    }

    /// Cards on a whiteboard; empty for an unknown whiteboard.
    ///
    /// # Errors
    ///
    /// I/O failures reading the index or document.
    pub async fn get_card_positions(&self, whiteboard_id: &str) -> Result<Vec<CardPosition>> {
        self.store.get_card_positions(whiteboard_id).await
    }

    // --- notes and graph ---

    /// Rescan every note and return the global graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault directory cannot be listed.
    pub async fn build_graph(&self) -> Result<Graph> {
        self.graph.build_graph().await
    }

    pub async fn get_note(&self, id: &str) -> Option<Note> {
        self.graph.get_note(id).await
    }

    pub async fn get_all_notes(&self) -> Vec<Note> {
        self.graph.get_all_notes().await
    }

    pub async fn find_note_by_link(&self, link: &str) -> Option<Note> {
        self.graph.find_note_by_link(link).await
    }

    pub async fn get_local_graph(&self, id: &str, depth: usize) -> Graph {
        self.graph.get_local_graph(id, depth).await
    }

    pub async fn global_graph(&self) -> Graph {
        self.graph.global_graph().await
    }

    /// Watch the vault for note changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be started.
    pub fn watch(&self) -> Result<VaultWatcher> {
        VaultWatcher::start(&self.root, &self.config.note_extension)
    }

    // --- durability ---

    /// Overwrite `path` with its newest backup. Relative paths are taken
    /// from the vault root. Returns `false` if there is no backup.
    ///
    /// # Errors
    ///
    /// Any failure reading the backup or writing the target.
    pub async fn restore_from_backup(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let target = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        self.writer.restore_from_backup(target).await
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.writer.stats()
    }

    /// Wait for every queued write to finish. Call before shutdown.
    pub async fn flush(&self) {
        self.writer.drain().await;
    }
}
