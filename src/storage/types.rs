use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which backend a session was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    /// Local filesystem directory
    Local,
    /// Remote WebDAV-style store
    Cloud,
}

impl SessionSource {
    /// Lowercase tag used in cache keys and list item ids
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Local => "local",
            SessionSource::Cloud => "cloud",
        }
    }
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file reported by the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full path of the file
    pub path: String,
    /// File name without directory
    pub basename: String,
    /// Last modification time
    pub lastmod: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

/// Kind of an entry in a remote directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntryKind {
    /// Regular file
    File,
    /// Collection / directory
    Directory,
}

/// An entry reported by the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File or directory
    pub kind: RemoteEntryKind,
    /// Entry name without directory
    pub basename: String,
    /// Last modification time
    pub lastmod: DateTime<Utc>,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

/// Credentials a remote client is constructed from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteCredentials {
    /// Base URL of the remote store
    pub url: String,
    /// Basic auth user
    pub username: String,
    /// Basic auth password
    pub password: String,
}

/// Document sent to the upsert backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertPayload {
    /// Existing id, empty for a first save
    pub conversation_id: String,
    /// Human-readable name
    pub conversation_name: String,
    /// Owning assistant
    pub assistant_code: String,
    /// Full session document
    pub session_data: Value,
    /// Canonical key of (assistant, name, snapshot signature)
    pub idempotency_key: String,
    /// Milliseconds since the Unix epoch when the key was computed
    pub idempotency_at: i64,
}

/// Reply of the upsert backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpsertResult {
    /// Whether the write was accepted
    pub ok: bool,
    /// Backend reported that nothing changed
    pub unchanged: bool,
    /// Id assigned (or confirmed) by the backend
    pub conversation_id: String,
    /// Name stored by the backend
    pub conversation_name: String,
    /// Preview stored alongside the document
    pub preview: String,
    /// Stored size in bytes
    pub size: u64,
    /// Stored modification time
    pub lastmod: Option<DateTime<Utc>>,
}

/// Lightweight index entry for one stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListItem {
    /// `<source>:<path>`, unique across both backends
    pub id: String,
    /// Backend the file was found in
    pub source: SessionSource,
    /// Owning assistant
    pub assistant_code: String,
    /// Display name
    pub conversation_name: String,
    /// Summary of the last relevant message
    pub preview: String,
    /// File name
    pub basename: String,
    /// Path the document can be read back from
    pub path: String,
    /// Last modification time
    pub lastmod: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

/// A session materialized from one of the backends
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    /// Id the document is stored under, if known
    pub conversation_id: Option<String>,
    /// Full session document
    pub session_data: Value,
    /// Display name
    pub conversation_name: String,
    /// Owning assistant
    pub assistant_code: String,
}
