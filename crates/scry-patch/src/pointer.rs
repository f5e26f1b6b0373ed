//! Slash-delimited pointers into JSON documents.
//!
//! Segments are object keys or array indices; the literal final segment `-`
//! means "append" when the parent is an array. Keys containing `/` or `~`
//! arrive escaped as `~1` and `~0` (the server-side differ escapes them).

use serde_json::Value;

/// Final path segment that appends to an array parent.
pub const APPEND: &str = "-";

/// A parsed pointer: the segments between slashes, unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    segments: Vec<String>,
}

impl Pointer {
    /// Parse a pointer string. The empty string addresses the document root;
    /// a missing leading slash is tolerated.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw == "/" {
            return Self {
                segments: Vec::new(),
            };
        }
        let body = raw.strip_prefix('/').unwrap_or(raw);
        Self {
            segments: body.split('/').map(unescape).collect(),
        }
    }

    /// Whether this pointer addresses the document root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Split into parent segments and the final segment, or `None` for root.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        let (last, parents) = self.segments.split_last()?;
        Some((parents, last.as_str()))
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", escape(segment))?;
        }
        Ok(())
    }
}

/// Unescape a pointer segment: `~1` is `/`, `~0` is `~`.
fn unescape(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace("~1", "/").replace("~0", "~")
}

fn escape(segment: &str) -> String {
    if !segment.contains('~') && !segment.contains('/') {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

/// Parse a segment as an array index. `-` and non-decimal segments are not
/// indices.
pub(crate) fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Resolve a pointer against a document without creating anything.
///
/// Returns `None` when any segment fails to resolve, including `-` (which
/// only names a position for insertion, never an existing element).
pub fn resolve<'a>(doc: &'a Value, pointer: &Pointer) -> Option<&'a Value> {
    let mut current = doc;
    for segment in pointer.segments() {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(array_index(segment)?)?,
            _ => return None,
        };
    }
    Some(current)
}
