//! # lattice-core
//!
//! Core types and pure logic shared by every Lattice crate:
//! - [`Note`] and markdown parsing ([`frontmatter`])
//! - The whiteboard data model ([`Whiteboard`], [`WhiteboardIndex`], [`WhiteboardSet`])
//! - Schema normalization of documents read from disk ([`normalize`])
//! - Pre-save validation and sanitization ([`sanitize`])
//! - Vault configuration ([`VaultConfig`])
//! - Error hierarchy ([`LatticeError`])

pub mod config;
pub mod error;
pub mod frontmatter;
pub mod normalize;
pub mod note;
pub mod sanitize;
pub mod whiteboard;

pub use config::VaultConfig;
pub use error::{LatticeError, Result};
pub use note::{normalize_note_id, Note};
pub use whiteboard::{
    Arrow, CardPosition, ElementKind, Group, HighlightCard, PdfCard, Side, StickyNote, TextBox,
    Timestamp, Whiteboard, WhiteboardIndex, WhiteboardSet,
};
