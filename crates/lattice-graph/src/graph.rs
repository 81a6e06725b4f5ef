//! Graph views over a [`NoteIndex`] and their text renderings.
//!
//! Graphs are derived on demand and never stored. Supports DOT, Mermaid,
//! and JSON output formats.

use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;

use serde::Serialize;

use lattice_core::note::Note;

use crate::index::NoteIndex;

/// A node in the note graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub note: Note,
}

/// Whether the reverse of an edge is also in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    Unidirectional,
    Bidirectional,
}

/// A directed link between two notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub direction: EdgeDirection,
}

/// A set of notes and the links between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    /// One node per note and one edge per ordered pair of linked notes.
    /// The first occurrence of a pair wins; self-links produce no edge.
    #[must_use]
    pub fn global(index: &NoteIndex) -> Self {
        let nodes = index
            .notes()
            .map(|note| GraphNode {
                id: note.id.clone(),
                note: note.clone(),
            })
            .collect();
        Self {
            nodes,
            edges: link_edges(index, |_| true),
        }
    }

    /// Breadth-first neighbourhood of `center`, following both forward
    /// links and backlinks for `depth` levels. Returns the induced subgraph:
    /// every visited note, and only edges between visited notes. An unknown
    /// `center` gives an empty graph.
    #[must_use]
    pub fn local(index: &NoteIndex, center: &str, depth: usize) -> Self {
        let Some(start) = index.get(center) else {
            return Self::default();
        };

        let mut order: Vec<&str> = vec![start.id.as_str()];
        let mut visited: HashSet<&str> = HashSet::from([start.id.as_str()]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start.id.as_str(), 0)]);

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            let Some(note) = index.get(current) else {
                continue;
            };
            let forward = index.resolved_links(current);
            let backward = note.backlinks.iter().map(String::as_str);
            for neighbour in forward.into_iter().chain(backward) {
                if visited.insert(neighbour) {
                    order.push(neighbour);
                    queue.push_back((neighbour, level + 1));
                }
            }
        }

        let nodes = order
            .iter()
            .filter_map(|id| index.get(id))
            .map(|note| GraphNode {
                id: note.id.clone(),
                note: note.clone(),
            })
            .collect();
        Self {
            nodes,
            edges: link_edges(index, |id| visited.contains(id)),
        }
    }

    #[must_use]
    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    #[must_use]
    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source == source && e.target == target)
    }

    /// Format as DOT (Graphviz).
    #[must_use]
    pub fn format_dot(&self) -> String {
        let mut out = String::from("digraph lattice {\n  rankdir=LR;\n  node [shape=box];\n\n");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\"];",
                escape_dot(&node.id),
                escape_dot(&node.note.title)
            );
        }
        out.push('\n');
        for edge in &self.edges {
            let attrs = match edge.direction {
                EdgeDirection::Bidirectional => " [dir=both]",
                EdgeDirection::Unidirectional => "",
            };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\"{attrs};",
                escape_dot(&edge.source),
                escape_dot(&edge.target)
            );
        }
        out.push_str("}\n");
        out
    }

    /// Format as a Mermaid flowchart.
    #[must_use]
    pub fn format_mermaid(&self) -> String {
        let mut out = String::from("graph LR\n");
        for node in &self.nodes {
            let label = node.note.title.replace('"', "'");
            let _ = writeln!(out, "  {}[\"{label}\"]", mermaid_id(&node.id));
        }
        out.push('\n');
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "  {} --> {}",
                mermaid_id(&edge.source),
                mermaid_id(&edge.target)
            );
        }
        out
    }

    /// Format as pretty-printed JSON.
    #[must_use]
    pub fn format_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Deduplicated edges between notes accepted by `keep`, in note-id order
/// then link order. Direction is tagged once the full edge set is known.
fn link_edges(index: &NoteIndex, keep: impl Fn(&str) -> bool) -> Vec<GraphEdge> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for note in index.notes().filter(|n| keep(n.id.as_str())) {
        for target in index.resolved_links(&note.id) {
            if keep(target) && seen.insert((note.id.as_str(), target)) {
                pairs.push((note.id.as_str(), target));
            }
        }
    }

    pairs
        .iter()
        .map(|&(source, target)| GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            direction: if seen.contains(&(target, source)) {
                EdgeDirection::Bidirectional
            } else {
                EdgeDirection::Unidirectional
            },
        })
        .collect()
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
