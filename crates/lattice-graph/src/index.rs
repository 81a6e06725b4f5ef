//! In-memory note index: link resolution and backlinks.
//!
//! An index is built once from a full set of parsed notes and never patched;
//! a rescan builds a new one.

use std::collections::{BTreeMap, HashMap};

use lattice_core::note::{normalize_note_id, Note};

/// Every note of a vault, keyed by id, with backlinks filled in.
#[derive(Debug, Clone, Default)]
pub struct NoteIndex {
    notes: BTreeMap<String, Note>,
    /// Lowercased short name -> id. First id in id order wins.
    by_short_name: HashMap<String, String>,
    /// Lowercased title -> id. First id in id order wins.
    by_title: HashMap<String, String>,
}

impl NoteIndex {
    /// Build an index and compute every note's backlinks.
    ///
    /// Incoming backlinks on `notes` are discarded. A note id that appears
    /// twice keeps the later note.
    #[must_use]
    pub fn new(notes: impl IntoIterator<Item = Note>) -> Self {
        let notes: BTreeMap<String, Note> = notes
            .into_iter()
            .map(|mut n| {
                n.backlinks.clear();
                (n.id.clone(), n)
            })
            .collect();

        let mut by_short_name = HashMap::new();
        let mut by_title = HashMap::new();
        for note in notes.values() {
            by_short_name
                .entry(note.short_name().to_lowercase())
                .or_insert_with(|| note.id.clone());
            by_title
                .entry(note.title.to_lowercase())
                .or_insert_with(|| note.id.clone());
        }

        let mut index = Self {
            notes,
            by_short_name,
            by_title,
        };
        index.compute_backlinks();
        index
    }

    /// Resolve link text to a note id.
    ///
    /// First match wins: exact normalized id, then case-insensitive file
    /// short name, then case-insensitive title.
    #[must_use]
    pub fn find_note_by_link(&self, link: &str) -> Option<&Note> {
        let normalized = normalize_note_id(link);
        if normalized.is_empty() {
            return None;
        }
        if let Some(note) = self.notes.get(&normalized) {
            return Some(note);
        }
        let lower = normalized.to_lowercase();
        self.by_short_name
            .get(&lower)
            .or_else(|| self.by_title.get(&lower))
            .or_else(|| self.by_title.get(&link.trim().to_lowercase()))
            .and_then(|id| self.notes.get(id))
    }

    /// Resolved link targets of note `id` in order of appearance, repeats
    /// included. Unresolved links and self-links are left out.
    #[must_use]
    pub fn resolved_links(&self, id: &str) -> Vec<&str> {
        let Some(note) = self.notes.get(id) else {
            return Vec::new();
        };
        note.links
            .iter()
            .filter_map(|link| self.find_note_by_link(link))
            .map(|target| target.id.as_str())
            .filter(|target| *target != id)
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    /// Notes in id order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    fn compute_backlinks(&mut self) {
        let mut incoming: Vec<(String, String)> = Vec::new();
        for source in self.notes.keys() {
            for target in self.resolved_links(source) {
                incoming.push((target.to_string(), source.clone()));
            }
        }
        for (target, source) in incoming {
            if let Some(note) = self.notes.get_mut(&target) {
                note.backlinks.push(source);
            }
        }
    }
}
