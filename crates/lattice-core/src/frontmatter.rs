//! Markdown note parsing: YAML frontmatter, wikilinks, tags, and titles.
//!
//! Format:
//! ```markdown
//! ---
//! title: "Alpha Project"
//! tags: [rust, planning]
//! ---
//!
//! # Alpha
//!
//! Depends on [[beta]] and [[people/jane|Jane]]. #active
//! ```
//!
//! Frontmatter is optional. A malformed block is logged and treated as
//! empty; a note never fails to parse.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::note::Note;

static WIKILINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]\n]+)\]\]").expect("wikilink pattern"));
static INLINE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)#([A-Za-z][A-Za-z0-9_/-]*)").expect("inline tag pattern")
});

/// Split a markdown source into the raw YAML between `---` delimiters and
/// the body after the closing delimiter.
///
/// Returns `(None, source)` when the file has no complete frontmatter block.
#[must_use]
pub fn split_frontmatter(source: &str) -> (Option<&str>, &str) {
    let content = source.trim_start_matches('\u{feff}');

    let Some(first_end) = content.find('\n') else {
        return (None, content);
    };
    if content[..first_end].trim_end() != "---" {
        return (None, content);
    }

    let yaml_start = first_end + 1;
    let mut offset = yaml_start;
    for line in content[yaml_start..].split_inclusive('\n') {
        let bare = line.trim_end();
        if bare == "---" || bare == "..." {
            let yaml = &content[yaml_start..offset];
            let body = content[offset + line.len()..].trim_start_matches(['\r', '\n']);
            return (Some(yaml), body);
        }
        offset += line.len();
    }

    (None, content)
}

/// Parse frontmatter YAML into an ordered map. Non-mapping or malformed
/// YAML yields an empty map with a warning.
#[must_use]
pub fn parse_frontmatter(yaml: &str, note_id: &str) -> Map<String, Value> {
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        Ok(other) => {
            tracing::warn!(note = note_id, "frontmatter is not a mapping: {other}");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(note = note_id, "malformed frontmatter ignored: {e}");
            Map::new()
        }
    }
}

/// Build a [`Note`] from its id, raw source, and file timestamps.
#[must_use]
pub fn parse_note(
    id: &str,
    source: &str,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
) -> Note {
    let (yaml, body) = split_frontmatter(source);
    let frontmatter = yaml
        .map(|y| parse_frontmatter(y, id))
        .unwrap_or_default();

    let short_name = id.rsplit('/').next().unwrap_or(id);
    let title = derive_title(&frontmatter, body, short_name);
    let links = extract_wikilinks(body);
    let tags = collect_tags(&frontmatter, body);

    Note {
        id: id.to_string(),
        title,
        content: body.to_string(),
        frontmatter,
        links,
        backlinks: Vec::new(),
        tags,
        created_at,
        modified_at,
    }
}

/// Title precedence: frontmatter `title`, first `# ` heading, file stem.
#[must_use]
pub fn derive_title(frontmatter: &Map<String, Value>, body: &str, fallback: &str) -> String {
    if let Some(title) = frontmatter.get("title").and_then(Value::as_str) {
        let title = title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }

    outside_code_fences(body)
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| fallback.to_string(), str::to_string)
}

/// Extract `[[wikilink]]` targets in order, keeping repeats.
///
/// `[[target|alias]]` and `[[target#heading]]` both yield `target`.
/// Links inside fenced code blocks are ignored.
#[must_use]
pub fn extract_wikilinks(body: &str) -> Vec<String> {
    let mut links = Vec::new();
    for line in outside_code_fences(body) {
        for cap in WIKILINK_RE.captures_iter(line) {
            let inner = &cap[1];
            let target = inner.split('|').next().unwrap_or(inner);
            let target = target.split('#').next().unwrap_or(target).trim();
            if !target.is_empty() {
                links.push(target.to_string());
            }
        }
    }
    links
}

/// Extract inline `#tag` tokens from the body.
#[must_use]
pub fn extract_inline_tags(body: &str) -> Vec<String> {
    outside_code_fences(body)
        .flat_map(|line| INLINE_TAG_RE.captures_iter(line))
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Frontmatter tags followed by inline tags, deduplicated case-insensitively.
fn collect_tags(frontmatter: &Map<String, Value>, body: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    let declared: Vec<String> = match frontmatter.get("tags") {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    for tag in declared.into_iter().chain(extract_inline_tags(body)) {
        let tag = tag.trim().trim_start_matches('#');
        if tag.is_empty() {
            continue;
        }
        let lower = tag.to_lowercase();
        if !tags.iter().any(|t| t.to_lowercase() == lower) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Lines of `body` that are not inside a ``` or ~~~ fenced block.
fn outside_code_fences(body: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    body.lines().filter(move |line| {
        let t = line.trim_start();
        if t.starts_with("```") || t.starts_with("~~~") {
            in_fence = !in_fence;
            return false;
        }
        !in_fence
    })
}
