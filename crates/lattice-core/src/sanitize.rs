//! Pre-save validation and sanitization of whiteboard documents.
//!
//! Violations are never fatal. [`validate`] reports them; [`sanitize`]
//! repairs them in place, touching only the offending entities and only
//! the offending fields of those entities.

use std::fmt;

use crate::whiteboard::{ElementKind, Whiteboard, DEFAULT_GROUP_HEIGHT, DEFAULT_GROUP_WIDTH};

/// A single problem found in a whiteboard document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// An arrow endpoint does not name an existing element of its kind.
    DanglingArrow {
        arrow_id: String,
        missing: String,
        kind: ElementKind,
    },
    /// A group is missing a usable width or height.
    InvalidGroupBounds { group_id: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingArrow {
                arrow_id,
                missing,
                kind,
            } => write!(f, "arrow '{arrow_id}' references missing {kind:?} '{missing}'"),
            Self::InvalidGroupBounds { group_id } => {
                write!(f, "group '{group_id}' has invalid bounds")
            }
        }
    }
}

/// Report every violation in `doc` without changing it.
#[must_use]
pub fn validate(doc: &Whiteboard) -> Vec<Violation> {
    let mut violations = Vec::new();

    for arrow in &doc.arrows {
        if let Some((missing, kind)) = dangling_endpoint(doc, arrow) {
            violations.push(Violation::DanglingArrow {
                arrow_id: arrow.id.clone(),
                missing: missing.to_string(),
                kind,
            });
        }
    }

    for group in &doc.groups {
        if !is_valid_extent(group.width) || !is_valid_extent(group.height) {
            violations.push(Violation::InvalidGroupBounds {
                group_id: group.id.clone(),
            });
        }
    }

    violations
}

/// Repair `doc` in place: drop dangling arrows and give groups without a
/// usable size the default 400×300. Returns what was repaired; an empty
/// result means `doc` was left untouched.
pub fn sanitize(doc: &mut Whiteboard) -> Vec<Violation> {
    let violations = validate(doc);
    if violations.is_empty() {
        return violations;
    }

    let has_dangling = violations
        .iter()
        .any(|v| matches!(v, Violation::DanglingArrow { .. }));
    if has_dangling {
        // Arrow ids are not guaranteed unique; decide per arrow, not per id.
        let keep: Vec<bool> = doc
            .arrows
            .iter()
            .map(|a| dangling_endpoint(doc, a).is_none())
            .collect();
        let mut keep = keep.into_iter();
        doc.arrows.retain(|_| keep.next().unwrap_or(true));
    }

    for group in &mut doc.groups {
        if !is_valid_extent(group.width) {
            group.width = Some(DEFAULT_GROUP_WIDTH);
        }
        if !is_valid_extent(group.height) {
            group.height = Some(DEFAULT_GROUP_HEIGHT);
        }
    }

    for v in &violations {
        tracing::warn!(whiteboard = %doc.id, "sanitized: {v}");
    }
    violations
}

fn is_valid_extent(value: Option<f64>) -> bool {
    value.is_some_and(|v| v.is_finite() && v > 0.0)
}

/// The first endpoint of `arrow` that does not exist in `doc`, if any.
fn dangling_endpoint<'a>(
    doc: &Whiteboard,
    arrow: &'a crate::whiteboard::Arrow,
) -> Option<(&'a str, ElementKind)> {
    let endpoints = [
        (arrow.source_note_id.as_str(), arrow.source_type),
        (arrow.target_note_id.as_str(), arrow.target_type),
    ];
    endpoints
        .into_iter()
        .find(|(id, kind)| !doc.element_ids(*kind).contains(id))
}
