//! Memoized session metadata
//!
//! Parsing a stored document is the expensive part of an index refresh, so
//! the result of every parse is kept in a [`MetadataCache`] keyed by
//! `source:path:lastmod:size`. A changed file produces a new key instead of
//! invalidating the old entry, which makes every entry immutable.
//!
//! The cache has no eviction policy. It lives as long as the indexer and
//! holds only small metadata records, one per file version ever seen.

use super::preview::extract_session_preview;
use crate::session::{ASSISTANT_CODE_KEY, DISPLAY_HISTORY_KEY, HISTORY_KEY, LEGACY_MARKER_KEY};
use crate::storage::SessionSource;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Metadata extracted from a valid session document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Owning assistant
    pub code: String,
    /// Stored name, or the file stem when the document has none
    pub conversation_name: String,
    /// Summary of the last relevant message
    pub preview: String,
}

/// Parse results by file version; `None` marks "not a session"
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<String, Option<SessionMetadata>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Composite key of one file version
    pub fn key(source: SessionSource, path: &str, lastmod: &DateTime<Utc>, size: u64) -> String {
        format!(
            "{}:{}:{}:{}",
            source.as_str(),
            path,
            lastmod.timestamp_millis(),
            size
        )
    }

    /// Cached parse result; the outer `None` means "never parsed"
    pub fn get(&self, key: &str) -> Option<&Option<SessionMetadata>> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, metadata: Option<SessionMetadata>) {
        self.entries.insert(key, metadata);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a parsed document has the shape of a stored session
///
/// It must be an object with a non-empty assistant code and either the
/// legacy marker set to `true` or a display/raw history array.
pub fn is_session_payload(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    if session_code(value).is_empty() {
        return false;
    }
    map.get(LEGACY_MARKER_KEY) == Some(&Value::Bool(true))
        || map.get(DISPLAY_HISTORY_KEY).is_some_and(Value::is_array)
        || map.get(HISTORY_KEY).is_some_and(Value::is_array)
}

/// Assistant code of a document, accepting the lowercase spelling
pub fn session_code(value: &Value) -> String {
    [ASSISTANT_CODE_KEY, "code"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|code| !code.is_empty())
        .unwrap_or("")
        .to_string()
}

/// File name without its extension
pub fn file_stem(basename: &str) -> &str {
    match basename.rfind('.') {
        Some(0) | None => basename,
        Some(dot) => &basename[..dot],
    }
}

/// Parse raw file text into metadata, `None` if it is not a session
pub fn parse_session_metadata(text: &str, basename: &str) -> Option<SessionMetadata> {
    let value: Value = serde_json::from_str(text).ok()?;
    if !is_session_payload(&value) {
        return None;
    }

    let conversation_name = value
        .get("conversationName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| file_stem(basename))
        .to_string();

    Some(SessionMetadata {
        code: session_code(&value),
        conversation_name,
        preview: extract_session_preview(&value),
    })
}
