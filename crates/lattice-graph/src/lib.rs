//! # lattice-graph
//!
//! Note parsing and the derived link graph:
//! - [`NoteSource`]: where note text comes from ([`FsNoteSource`] for a vault)
//! - [`NoteIndex`]: wikilink resolution and backlinks
//! - [`Graph`]: global and bounded-depth local views, DOT/Mermaid/JSON output
//! - [`GraphEngine`]: parallel full scans and queries over the latest scan

pub mod engine;
pub mod graph;
pub mod index;
pub mod source;

pub use engine::GraphEngine;
pub use graph::{EdgeDirection, Graph, GraphEdge, GraphNode};
pub use index::NoteIndex;
pub use source::{FsNoteSource, NoteSource, RawNote};
