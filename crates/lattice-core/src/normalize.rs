//! Schema normalization for whiteboard documents read from disk.
//!
//! Runs once, right after JSON parsing and before typed deserialization.
//! Output is a fully-defaulted [`Whiteboard`]: every collection present,
//! arrows in the current shape, ids filled in.
//!
//! Problems are contained to the element that has them. A malformed field
//! is defaulted or removed; an element missing an identifying key is
//! dropped. Neither affects the rest of the document.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{LatticeError, Result};
use crate::whiteboard::Whiteboard;

/// Collection keys every document must carry.
pub const COLLECTION_KEYS: [&str; 7] = [
    "cards",
    "arrows",
    "groups",
    "stickyNotes",
    "textBoxes",
    "pdfCards",
    "highlightCards",
];

/// Legacy → current arrow key renames.
const LEGACY_ARROW_KEYS: [(&str, &str); 4] = [
    ("from", "sourceNoteId"),
    ("to", "targetNoteId"),
    ("fromSide", "sourceSide"),
    ("toSide", "targetSide"),
];

/// Expected JSON shape of one element field.
#[derive(Debug, Clone, Copy)]
enum Shape {
    /// Identifying string. An element without one is dropped.
    Key,
    /// Number; 0 when missing or not a number.
    Coord,
    /// Optional number; removed when not a number.
    OptNumber,
    /// Optional or defaulted string; removed when not a string.
    Text,
    /// One of `top`/`right`/`bottom`/`left`; removed otherwise.
    Side,
    /// One of the arrow endpoint kinds; removed otherwise.
    Kind,
    /// List of ids; non-string entries are removed.
    IdList,
}

type Fields = &'static [(&'static str, Shape)];

const CARD_FIELDS: Fields = &[
    ("noteId", Shape::Key),
    ("whiteboardId", Shape::Text),
    ("x", Shape::Coord),
    ("y", Shape::Coord),
    ("width", Shape::OptNumber),
    ("height", Shape::OptNumber),
];

const ARROW_FIELDS: Fields = &[
    ("id", Shape::Text),
    ("sourceNoteId", Shape::Key),
    ("targetNoteId", Shape::Key),
    ("sourceSide", Shape::Side),
    ("targetSide", Shape::Side),
    ("sourceType", Shape::Kind),
    ("targetType", Shape::Kind),
];

const GROUP_FIELDS: Fields = &[
    ("id", Shape::Key),
    ("name", Shape::Text),
    ("cardIds", Shape::IdList),
    ("color", Shape::Text),
    ("x", Shape::Coord),
    ("y", Shape::Coord),
    ("width", Shape::OptNumber),
    ("height", Shape::OptNumber),
];

const STICKY_NOTE_FIELDS: Fields = &[
    ("id", Shape::Key),
    ("text", Shape::Text),
    ("x", Shape::Coord),
    ("y", Shape::Coord),
    ("color", Shape::Text),
];

const TEXT_BOX_FIELDS: Fields = &[
    ("id", Shape::Key),
    ("text", Shape::Text),
    ("x", Shape::Coord),
    ("y", Shape::Coord),
    ("width", Shape::OptNumber),
    ("height", Shape::OptNumber),
];

const PDF_CARD_FIELDS: Fields = &[
    ("id", Shape::Key),
    ("filePath", Shape::Text),
    ("x", Shape::Coord),
    ("y", Shape::Coord),
    ("width", Shape::OptNumber),
    ("height", Shape::OptNumber),
];

const HIGHLIGHT_FIELDS: Fields = &[
    ("id", Shape::Key),
    ("pdfCardId", Shape::Key),
    ("text", Shape::Text),
    ("x", Shape::Coord),
    ("y", Shape::Coord),
];

/// Per-collection field shapes, in [`COLLECTION_KEYS`] order.
const COLLECTION_FIELDS: [(&str, Fields); 7] = [
    ("cards", CARD_FIELDS),
    ("arrows", ARROW_FIELDS),
    ("groups", GROUP_FIELDS),
    ("stickyNotes", STICKY_NOTE_FIELDS),
    ("textBoxes", TEXT_BOX_FIELDS),
    ("pdfCards", PDF_CARD_FIELDS),
    ("highlightCards", HIGHLIGHT_FIELDS),
];

const SIDES: [&str; 4] = ["top", "right", "bottom", "left"];
const KINDS: [&str; 4] = ["note", "textBox", "pdf", "highlight"];

/// What normalization had to change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Collections that were missing (or not arrays) and were defaulted to empty.
    pub backfilled: Vec<&'static str>,
    /// Arrows rewritten from the `from`/`to` shape.
    pub legacy_arrows: usize,
    /// The document had no id and took the one it was loaded under.
    pub filled_id: bool,
    /// Elements kept after defaulting or removing malformed fields.
    pub repaired_elements: usize,
    /// Elements dropped for lacking an identifying key or not being objects.
    pub dropped_elements: usize,
}

impl NormalizeReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.backfilled.is_empty()
            && self.legacy_arrows == 0
            && !self.filled_id
            && self.repaired_elements == 0
            && self.dropped_elements == 0
    }
}

/// Normalize a parsed JSON value into a [`Whiteboard`].
///
/// `fallback_id` is used when the document carries no id of its own
/// (typically the file stem it was loaded from).
///
/// # Errors
///
/// Returns [`LatticeError::Parse`] if `value` is not a JSON object.
/// [`LatticeError::Serialization`] is only possible if the repaired object
/// still does not match the document schema.
pub fn normalize_whiteboard(value: Value, fallback_id: &str) -> Result<(Whiteboard, NormalizeReport)> {
    let Value::Object(mut obj) = value else {
        return Err(LatticeError::Parse(format!(
            "whiteboard '{fallback_id}' is not a JSON object"
        )));
    };
    let mut report = NormalizeReport::default();

    for key in COLLECTION_KEYS {
        if !obj.get(key).is_some_and(Value::is_array) {
            obj.insert(key.to_string(), Value::Array(Vec::new()));
            report.backfilled.push(key);
        }
    }

    if let Some(Value::Array(arrows)) = obj.get_mut("arrows") {
        for arrow in arrows.iter_mut().filter_map(Value::as_object_mut) {
            if rewrite_legacy_arrow(arrow) {
                report.legacy_arrows += 1;
            }
        }
    }

    for (key, fields) in COLLECTION_FIELDS {
        if let Some(Value::Array(items)) = obj.get_mut(key) {
            repair_collection(items, key, fields, fallback_id, &mut report);
        }
    }
    if obj.get("name").is_some_and(|v| !v.is_string()) {
        tracing::warn!(whiteboard = fallback_id, "ignoring non-string whiteboard name");
        obj.remove("name");
    }

    let has_id = obj
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    if !has_id {
        obj.insert("id".to_string(), Value::String(fallback_id.to_string()));
        report.filled_id = true;
    }

    let mut doc: Whiteboard = serde_json::from_value(Value::Object(obj))?;

    if doc.name.is_empty() {
        doc.name.clone_from(&doc.id);
    }
    for card in &mut doc.cards {
        if card.whiteboard_id.is_empty() {
            card.whiteboard_id.clone_from(&doc.id);
        }
    }
    for arrow in &mut doc.arrows {
        if arrow.id.is_empty() {
            arrow.id = format!("{}->{}", arrow.source_note_id, arrow.target_note_id);
        }
    }

    Ok((doc, report))
}

/// Rename `from`/`to`/`fromSide`/`toSide` to the current keys. Current keys
/// win if both shapes are present. Returns `true` if anything was renamed.
fn rewrite_legacy_arrow(arrow: &mut Map<String, Value>) -> bool {
    let mut rewrote = false;
    for (old, new) in LEGACY_ARROW_KEYS {
        if let Some(v) = arrow.remove(old) {
            if !arrow.contains_key(new) {
                arrow.insert(new.to_string(), v);
            }
            rewrote = true;
        }
    }
    rewrote
}

/// Repair each element of one collection in place, dropping the ones that
/// cannot be kept.
fn repair_collection(
    items: &mut Vec<Value>,
    collection: &'static str,
    fields: Fields,
    whiteboard: &str,
    report: &mut NormalizeReport,
) {
    items.retain_mut(|item| {
        let Value::Object(element) = item else {
            tracing::warn!(whiteboard, collection, "dropping element that is not an object");
            report.dropped_elements += 1;
            return false;
        };
        match repair_element(element, fields) {
            Ok(0) => true,
            Ok(fixed) => {
                tracing::warn!(whiteboard, collection, fields = fixed, "repaired malformed element");
                report.repaired_elements += 1;
                true
            }
            Err(key) => {
                tracing::warn!(whiteboard, collection, key, "dropping element without a usable key");
                report.dropped_elements += 1;
                false
            }
        }
    });
}

/// Bring one element's fields into shape. Returns how many fields changed,
/// or the name of a missing identifying key.
fn repair_element(
    element: &mut Map<String, Value>,
    fields: Fields,
) -> std::result::Result<usize, &'static str> {
    let mut fixed = 0;
    for &(key, shape) in fields {
        let value = element.get(key);
        let keep = match shape {
            Shape::Key => {
                if !value.is_some_and(Value::is_string) {
                    return Err(key);
                }
                true
            }
            Shape::Coord => {
                if !value.is_some_and(Value::is_number) {
                    element.insert(key.to_string(), Value::from(0.0));
                    fixed += 1;
                }
                true
            }
            Shape::OptNumber => value.is_none_or(Value::is_number),
            Shape::Text => value.is_none_or(Value::is_string),
            Shape::Side => value.is_none_or(|v| v.as_str().is_some_and(|s| SIDES.contains(&s))),
            Shape::Kind => value.is_none_or(|v| v.as_str().is_some_and(|s| KINDS.contains(&s))),
            Shape::IdList => match element.get_mut(key) {
                None => true,
                Some(Value::Array(ids)) => {
                    let before = ids.len();
                    ids.retain(Value::is_string);
                    if ids.len() != before {
                        fixed += 1;
                    }
                    true
                }
                Some(_) => false,
            },
        };
        if !keep {
            element.remove(key);
            fixed += 1;
        }
    }
    Ok(fixed)
}

/// The pre-index single-file format (`.whiteboard-metadata.json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMetadata {
    #[serde(default)]
    pub active_whiteboard_id: Option<String>,
    pub whiteboards: LegacyBoards,
}

/// Legacy files stored boards either as a list or as an id-keyed map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyBoards {
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl LegacyMetadata {
    /// Split into normalized documents, in stored order. Entries that cannot
    /// be normalized are skipped with a warning.
    #[must_use]
    pub fn into_whiteboards(self) -> Vec<(Whiteboard, NormalizeReport)> {
        let entries: Vec<(String, Value)> = match self.whiteboards {
            LegacyBoards::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("whiteboard-{}", i + 1), v))
                .collect(),
            LegacyBoards::Map(map) => map.into_iter().collect(),
        };

        entries
            .into_iter()
            .filter_map(|(fallback, value)| match normalize_whiteboard(value, &fallback) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    tracing::warn!(whiteboard = %fallback, "skipping unreadable legacy whiteboard: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whiteboard::Side;
    use serde_json::json;

    #[test]
    fn missing_collections_are_backfilled() {
        let (doc, report) = normalize_whiteboard(json!({"id": "w", "cards": []}), "w").unwrap();
        assert!(doc.groups.is_empty());
        assert!(doc.highlight_cards.is_empty());
        assert_eq!(report.backfilled.len(), 6);
        assert!(!report.backfilled.contains(&"cards"));
    }

    #[test]
    fn null_collection_counts_as_missing() {
        let (_, report) = normalize_whiteboard(
            json!({"id": "w", "cards": [], "arrows": null, "groups": [], "stickyNotes": [],
                   "textBoxes": [], "pdfCards": [], "highlightCards": []}),
            "w",
        )
        .unwrap();
        assert_eq!(report.backfilled, ["arrows"]);
    }

    #[test]
    fn legacy_arrows_are_rewritten() {
        let (doc, report) = normalize_whiteboard(
            json!({
                "id": "w",
                "cards": [{"noteId": "a", "x": 0, "y": 0}, {"noteId": "b", "x": 1, "y": 1}],
                "arrows": [{"id": "old", "from": "a", "to": "b", "fromSide": "bottom", "toSide": "top", "color": "red"}]
            }),
            "w",
        )
        .unwrap();
        assert_eq!(report.legacy_arrows, 1);
        let arrow = &doc.arrows[0];
        assert_eq!(arrow.source_note_id, "a");
        assert_eq!(arrow.target_note_id, "b");
        assert_eq!(arrow.source_side, Side::Bottom);
        assert_eq!(arrow.target_side, Side::Top);
        assert_eq!(arrow.extra["color"], json!("red"));
        assert!(!arrow.extra.contains_key("from"));
    }

    #[test]
    fn missing_ids_are_filled() {
        let (doc, report) = normalize_whiteboard(
            json!({"cards": [{"noteId": "n", "x": 0, "y": 0}], "arrows": [{"sourceNoteId": "n", "targetNoteId": "m"}]}),
            "from-file",
        )
        .unwrap();
        assert!(report.filled_id);
        assert_eq!(doc.id, "from-file");
        assert_eq!(doc.name, "from-file");
        assert_eq!(doc.cards[0].whiteboard_id, "from-file");
        assert_eq!(doc.arrows[0].id, "n->m");
    }

    #[test]
    fn already_current_document_reports_clean() {
        let doc = Whiteboard::empty("clean");
        let value = serde_json::to_value(&doc).unwrap();
        let (back, report) = normalize_whiteboard(value, "clean").unwrap();
        assert!(report.is_clean());
        assert_eq!(back, doc);
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(normalize_whiteboard(json!([1, 2]), "x").is_err());
    }

    fn two_cards_and(extra: (&str, Value)) -> Value {
        let mut doc = json!({
            "id": "w",
            "cards": [{"noteId": "a", "x": 0, "y": 0}, {"noteId": "b", "x": 5, "y": 5}],
            "groups": [{"id": "g", "cardIds": ["a", "b"], "x": 0, "y": 0}]
        });
        doc[extra.0] = extra.1;
        doc
    }

    #[test]
    fn unknown_arrow_side_falls_back_to_default() {
        let (doc, report) = normalize_whiteboard(
            two_cards_and((
                "arrows",
                json!([{"sourceNoteId": "a", "targetNoteId": "b", "sourceSide": "center", "targetSide": 3}]),
            )),
            "w",
        )
        .unwrap();
        assert_eq!(doc.cards.len(), 2);
        assert_eq!(doc.groups.len(), 1);
        assert_eq!(doc.arrows.len(), 1);
        assert_eq!(doc.arrows[0].source_side, Side::Right);
        assert_eq!(doc.arrows[0].target_side, Side::Left);
        assert_eq!(report.repaired_elements, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn card_missing_coordinate_is_placed_at_zero() {
        let (doc, report) = normalize_whiteboard(
            json!({"id": "w", "cards": [
                {"noteId": "a", "x": 12},
                {"noteId": "b", "x": "far", "y": 4, "width": "wide"},
                {"noteId": "c", "x": 1, "y": 1}
            ]}),
            "w",
        )
        .unwrap();
        assert_eq!(doc.cards.len(), 3);
        assert!((doc.cards[0].x - 12.0).abs() < f64::EPSILON);
        assert!(doc.cards[0].y.abs() < f64::EPSILON);
        assert!(doc.cards[1].x.abs() < f64::EPSILON);
        assert_eq!(doc.cards[1].width, None);
        assert_eq!(report.repaired_elements, 2);
    }

    #[test]
    fn elements_without_keys_are_dropped_alone() {
        let (doc, report) = normalize_whiteboard(
            two_cards_and((
                "highlightCards",
                json!([
                    {"id": "h1", "text": "orphan"},
                    {"id": "h2", "pdfCardId": "p", "text": "kept"},
                    "not an element"
                ]),
            )),
            "w",
        )
        .unwrap();
        assert_eq!(doc.cards.len(), 2);
        assert_eq!(doc.highlight_cards.len(), 1);
        assert_eq!(doc.highlight_cards[0].id, "h2");
        assert_eq!(report.dropped_elements, 2);
    }

    #[test]
    fn malformed_group_members_and_name_are_cleaned() {
        let (doc, _) = normalize_whiteboard(
            json!({"id": "w", "name": 7, "groups": [
                {"id": "g1", "name": null, "cardIds": ["a", 1, null]},
                {"id": "g2", "cardIds": "a"}
            ]}),
            "w",
        )
        .unwrap();
        assert_eq!(doc.name, "w");
        assert_eq!(doc.groups[0].card_ids, ["a"]);
        assert!(doc.groups[0].name.is_empty());
        assert!(doc.groups[1].card_ids.is_empty());
    }

    #[test]
    fn legacy_map_keeps_stored_order() {
        let legacy: LegacyMetadata = serde_json::from_value(json!({
            "activeWhiteboardId": "b",
            "whiteboards": {
                "b": {"id": "b", "name": "Bee"},
                "a": {"name": "Ay"}
            }
        }))
        .unwrap();
        let boards = legacy.into_whiteboards();
        let ids: Vec<&str> = boards.iter().map(|(w, _)| w.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }
}
