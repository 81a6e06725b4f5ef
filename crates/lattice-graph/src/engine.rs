//! The graph engine: full scans and queries over the latest scan.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::task::JoinSet;

use lattice_core::error::{LatticeError, Result};
use lattice_core::frontmatter::parse_note;
use lattice_core::note::{normalize_note_id, Note};

use crate::graph::Graph;
use crate::index::NoteIndex;
use crate::source::NoteSource;

/// Parses every note from a [`NoteSource`] and answers note and graph
/// queries against the most recent scan.
///
/// Queries before the first [`GraphEngine::build_graph`] see an empty vault.
pub struct GraphEngine {
    source: Arc<dyn NoteSource>,
    index: RwLock<Arc<NoteIndex>>,
}

impl std::fmt::Debug for GraphEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphEngine").finish_non_exhaustive()
    }
}

impl GraphEngine {
    #[must_use]
    pub fn new(source: Arc<dyn NoteSource>) -> Self {
        Self {
            source,
            index: RwLock::new(Arc::new(NoteIndex::default())),
        }
    }

    /// Rescan every note, replace the index in one step, and return the
    /// global graph.
    ///
    /// Notes are read and parsed on the blocking pool in parallel. A note
    /// that cannot be read is left out with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the note list itself cannot be obtained.
    pub async fn build_graph(&self) -> Result<Graph> {
        let started = Instant::now();

        let source = Arc::clone(&self.source);
        let ids = tokio::task::spawn_blocking(move || source.list())
            .await
            .map_err(|e| LatticeError::Io(std::io::Error::other(e)))??;

        let mut tasks = JoinSet::new();
        for id in ids {
            let source = Arc::clone(&self.source);
            tasks.spawn_blocking(move || {
                let note = source
                    .read(&id)
                    .map(|raw| parse_note(&id, &raw.source, raw.created_at, raw.modified_at));
                (id, note)
            });
        }

        let mut notes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(note))) => notes.push(note),
                Ok((id, Err(e))) => tracing::warn!(note = %id, "skipping unreadable note: {e}"),
                Err(e) => tracing::warn!("note parse task failed: {e}"),
            }
        }

        let index = Arc::new(NoteIndex::new(notes));
        *self.index.write().await = Arc::clone(&index);

        let graph = Graph::global(&index);
        tracing::info!(
            notes = graph.nodes.len(),
            edges = graph.edges.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph built"
        );
        Ok(graph)
    }

    /// Note with id `id` (normalized), if present in the last scan.
    pub async fn get_note(&self, id: &str) -> Option<Note> {
        self.snapshot().await.get(&normalize_note_id(id)).cloned()
    }

    /// Every note from the last scan, in id order.
    pub async fn get_all_notes(&self) -> Vec<Note> {
        self.snapshot().await.notes().cloned().collect()
    }

    /// Resolve link text the way wikilinks are resolved.
    pub async fn find_note_by_link(&self, link: &str) -> Option<Note> {
        self.snapshot().await.find_note_by_link(link).cloned()
    }

    /// Neighbourhood of `id` up to `depth` levels; see [`Graph::local`].
    pub async fn get_local_graph(&self, id: &str, depth: usize) -> Graph {
        Graph::local(&*self.snapshot().await, &normalize_note_id(id), depth)
    }

    /// Global graph of the last scan without rescanning.
    pub async fn global_graph(&self) -> Graph {
        Graph::global(&*self.snapshot().await)
    }

    async fn snapshot(&self) -> Arc<NoteIndex> {
        Arc::clone(&*self.index.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FsNoteSource, RawNote};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::fs;

    struct MemorySource(HashMap<&'static str, Option<&'static str>>);

    impl NoteSource for MemorySource {
        fn list(&self) -> Result<Vec<String>> {
            Ok(self.0.keys().map(|k| (*k).to_string()).collect())
        }

        fn read(&self, id: &str) -> Result<RawNote> {
            match self.0.get(id).copied().flatten() {
                Some(text) => Ok(RawNote {
                    source: text.to_string(),
                    created_at: Utc::now(),
                    modified_at: Utc::now(),
                }),
                None => Err(LatticeError::Io(std::io::Error::other("disk on fire"))),
            }
        }
    }

    #[tokio::test]
    async fn empty_before_first_build() {
        let engine = GraphEngine::new(Arc::new(MemorySource(HashMap::new())));
        assert!(engine.get_all_notes().await.is_empty());
        assert_eq!(engine.global_graph().await, Graph::default());
    }

    #[tokio::test]
    async fn builds_from_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("people")).unwrap();
        fs::write(
            root.join("people/ada.md"),
            "---\ntitle: Ada Lovelace\ntags: [math]\n---\nWorks with [[babbage]].\n",
        )
        .unwrap();
        fs::write(root.join("babbage.md"), "# Charles Babbage\nSee [[Ada Lovelace]].\n").unwrap();
        fs::write(root.join(".hidden.md"), "[[babbage]]").unwrap();

        let engine = GraphEngine::new(Arc::new(FsNoteSource::new(root, "md")));
        let graph = engine.build_graph().await.unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.has_edge("people/ada", "babbage"));
        assert!(graph.has_edge("babbage", "people/ada"));

        let ada = engine.get_note("people/ada.md").await.unwrap();
        assert_eq!(ada.title, "Ada Lovelace");
        assert_eq!(ada.tags, ["math"]);
        assert_eq!(ada.backlinks, ["babbage"]);
        assert_eq!(
            engine.find_note_by_link("charles babbage").await.unwrap().id,
            "babbage"
        );
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.md"), "").unwrap();
        let engine = GraphEngine::new(Arc::new(FsNoteSource::new(dir.path(), "md")));
        engine.build_graph().await.unwrap();
        assert!(engine.get_note("old").await.is_some());

        fs::remove_file(dir.path().join("old.md")).unwrap();
        fs::write(dir.path().join("new.md"), "").unwrap();
        engine.build_graph().await.unwrap();
        assert!(engine.get_note("old").await.is_none());
        assert!(engine.get_note("new").await.is_some());
    }

    #[tokio::test]
    async fn unreadable_notes_are_skipped() {
        let engine = GraphEngine::new(Arc::new(MemorySource(HashMap::from([
            ("x", Some("[[y]]")),
            ("y", None),
            ("z", Some("[[x]]")),
        ]))));
        let graph = engine.build_graph().await.unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.has_edge("z", "x"));
        assert!(!graph.contains_node("y"));
    }

    #[tokio::test]
    async fn local_graph_through_engine() {
        let engine = GraphEngine::new(Arc::new(MemorySource(HashMap::from([
            ("x", Some("[[y]]")),
            ("y", Some("")),
            ("z", Some("[[x]]")),
        ]))));
        engine.build_graph().await.unwrap();

        let local = engine.get_local_graph("x", 1).await;
        assert_eq!(local.nodes.len(), 3);
        assert!(local.has_edge("x", "y") && local.has_edge("z", "x"));
        assert_eq!(engine.get_local_graph("x", 0).await.nodes.len(), 1);
        assert!(engine.get_local_graph("missing", 2).await.nodes.is_empty());
    }
}
