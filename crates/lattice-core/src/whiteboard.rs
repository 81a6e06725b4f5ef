//! Whiteboard documents: spatial canvases of cards, arrows, and groups.
//!
//! Every entity keeps unknown JSON keys in an `extra` map so that fields
//! this crate does not model (UI state, explicit colors, type tags) survive
//! a load/sanitize/save cycle untouched.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current on-disk format version of the whiteboard index.
pub const INDEX_VERSION: &str = "2.0";

/// Id of the whiteboard synthesized when nothing else exists.
pub const DEFAULT_WHITEBOARD_ID: &str = "default";

/// Fallback group width when a stored group has no usable width.
pub const DEFAULT_GROUP_WIDTH: f64 = 400.0;

/// Fallback group height when a stored group has no usable height.
pub const DEFAULT_GROUP_HEIGHT: f64 = 300.0;

/// Edge of an element an arrow attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

impl Side {
    fn right() -> Self {
        Self::Right
    }

    fn left() -> Self {
        Self::Left
    }
}

/// The kind of element an arrow endpoint refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    #[default]
    Note,
    TextBox,
    Pdf,
    Highlight,
}

/// Placement of a note on a whiteboard. The note id doubles as the card id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPosition {
    pub note_id: String,
    #[serde(default)]
    pub whiteboard_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CardPosition {
    /// A bare card at `(x, y)` on `whiteboard_id`.
    #[must_use]
    pub fn new(note_id: impl Into<String>, whiteboard_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            note_id: note_id.into(),
            whiteboard_id: whiteboard_id.into(),
            x,
            y,
            width: None,
            height: None,
            extra: Map::new(),
        }
    }
}

/// A directed connection between two addressable elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrow {
    #[serde(default)]
    pub id: String,
    pub source_note_id: String,
    pub target_note_id: String,
    #[serde(default = "Side::right")]
    pub source_side: Side,
    #[serde(default = "Side::left")]
    pub target_side: Side,
    #[serde(default)]
    pub source_type: ElementKind,
    #[serde(default)]
    pub target_type: ElementKind,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Arrow {
    /// `true` if either endpoint is `element_id`.
    #[must_use]
    pub fn touches(&self, element_id: &str) -> bool {
        self.source_note_id == element_id || self.target_note_id == element_id
    }
}

/// A named cluster of cards with its own bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub card_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyNote {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An imported PDF placed on the board. Bytes and thumbnails live elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfCard {
    pub id: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An excerpt anchored to a [`PdfCard`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightCard {
    pub id: String,
    pub pdf_card_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One whiteboard, persisted as `.whiteboards/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Whiteboard {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cards: Vec<CardPosition>,
    #[serde(default)]
    pub arrows: Vec<Arrow>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub sticky_notes: Vec<StickyNote>,
    #[serde(default)]
    pub text_boxes: Vec<TextBox>,
    #[serde(default)]
    pub pdf_cards: Vec<PdfCard>,
    #[serde(default)]
    pub highlight_cards: Vec<HighlightCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Whiteboard {
    /// An empty whiteboard stamped with the current time.
    #[must_use]
    pub fn empty(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = if id == DEFAULT_WHITEBOARD_ID {
            "Default".to_string()
        } else {
            id.clone()
        };
        let now = Timestamp::now();
        Self {
            id,
            name,
            cards: Vec::new(),
            arrows: Vec::new(),
            groups: Vec::new(),
            sticky_notes: Vec::new(),
            text_boxes: Vec::new(),
            pdf_cards: Vec::new(),
            highlight_cards: Vec::new(),
            created_at: Some(now.clone()),
            updated_at: Some(now),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn contains_card(&self, note_id: &str) -> bool {
        self.cards.iter().any(|c| c.note_id == note_id)
    }

    /// Insert `card`, or replace the card with the same note id in place.
    pub fn upsert_card(&mut self, mut card: CardPosition) {
        card.whiteboard_id.clone_from(&self.id);
        match self.cards.iter_mut().find(|c| c.note_id == card.note_id) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    /// Remove a card along with every reference to it: group memberships
    /// (empty groups are deleted) and arrows touching it.
    ///
    /// Returns `false` if the card was not on this board; references are
    /// still cleaned in that case.
    pub fn remove_card(&mut self, note_id: &str) -> bool {
        let before = self.cards.len();
        self.cards.retain(|c| c.note_id != note_id);

        for group in &mut self.groups {
            group.card_ids.retain(|id| id != note_id);
        }
        self.groups.retain(|g| !g.card_ids.is_empty());
        self.arrows.retain(|a| !a.touches(note_id));

        self.cards.len() != before
    }

    /// Ids addressable by an arrow endpoint of the given kind. Note cards
    /// count whether they sit in `cards` or only in a group's member list.
    #[must_use]
    pub fn element_ids(&self, kind: ElementKind) -> HashSet<&str> {
        match kind {
            ElementKind::Note => self
                .cards
                .iter()
                .map(|c| c.note_id.as_str())
                .chain(self.groups.iter().flat_map(|g| g.card_ids.iter().map(String::as_str)))
                .collect(),
            ElementKind::TextBox => self.text_boxes.iter().map(|t| t.id.as_str()).collect(),
            ElementKind::Pdf => self.pdf_cards.iter().map(|p| p.id.as_str()).collect(),
            ElementKind::Highlight => self.highlight_cards.iter().map(|h| h.id.as_str()).collect(),
        }
    }

    /// Stamp `updated_at` with the current time, keeping epoch-millisecond
    /// form if that is how the document stored it.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = Some(match &self.updated_at {
            Some(prev) if prev.raw().is_number() => Timestamp::millis(now),
            _ => Timestamp::from(now),
        });
    }
}

/// The index file: the only thing read to discover which documents exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardIndex {
    pub version: String,
    pub active_whiteboard_id: String,
    pub whiteboards: Vec<String>,
}

impl WhiteboardIndex {
    /// Index listing `ids` in order, with the first one active.
    #[must_use]
    pub fn with_ids(ids: Vec<String>) -> Self {
        let active = ids
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_WHITEBOARD_ID.to_string());
        Self {
            version: INDEX_VERSION.to_string(),
            active_whiteboard_id: active,
            whiteboards: ids,
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.whiteboards.iter().any(|w| w == id)
    }
}

impl Default for WhiteboardIndex {
    fn default() -> Self {
        Self::with_ids(vec![DEFAULT_WHITEBOARD_ID.to_string()])
    }
}

/// Every whiteboard in the vault plus the index that lists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhiteboardSet {
    pub index: WhiteboardIndex,
    pub whiteboards: Vec<Whiteboard>,
}

impl WhiteboardSet {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Whiteboard> {
        self.whiteboards.iter().find(|w| w.id == id)
    }
}

/// A stored `createdAt`/`updatedAt` value, kept exactly as read.
///
/// Files written by other tools carry RFC 3339 strings, bare dates, or epoch
/// milliseconds (integer or float). The raw value is written back unchanged;
/// [`Timestamp::as_datetime`] interprets it when a real instant is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(Value);

impl Timestamp {
    /// The current time as an RFC 3339 string with millisecond precision.
    #[must_use]
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// `at` as integer epoch milliseconds.
    #[must_use]
    pub fn millis(at: DateTime<Utc>) -> Self {
        Self(Value::from(at.timestamp_millis()))
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// The instant this value denotes, if it is one of the recognised shapes.
    #[must_use]
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match &self.0 {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|d| d.and_utc())
                }),
            Value::Number(n) => {
                #[allow(clippy::cast_possible_truncation)]
                let ms = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
                Utc.timestamp_millis_opt(ms).single()
            }
            _ => None,
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self(Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)))
    }
}
