//! Storage capabilities consumed by the engine
//!
//! The engine never talks to a filesystem or a network directly; it goes
//! through the async traits defined here. Concrete adapters live in the
//! submodules: [`local::FsLocalStore`] for a local directory,
//! [`webdav::WebDavClient`] for a WebDAV-style remote, and
//! [`directory::DirectoryBackend`] for upserting session documents into a
//! local directory.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod directory;
pub mod local;
pub mod types;
pub mod webdav;

pub use directory::DirectoryBackend;
pub use local::FsLocalStore;
pub use types::{
    FileEntry, LoadedSession, RemoteCredentials, RemoteEntry, RemoteEntryKind, SessionListItem,
    SessionSource, UpsertPayload, UpsertResult,
};
pub use webdav::{WebDavClient, WebDavConnector};

/// File extension of stored session documents
pub const SESSION_FILE_EXTENSION: &str = ".json";

/// Local filesystem access
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// List regular files directly inside `dir`
    async fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>>;

    /// Read a file as UTF-8 text
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Write (create or replace) a file
    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;
}

/// Remote object store reached over a WebDAV-style protocol
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether `path` exists on the remote
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List the direct children of a remote directory
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Read a remote file as text
    async fn read_file(&self, path: &str) -> Result<String>;
}

/// Builds remote clients from credentials
pub trait RemoteConnector: Send + Sync {
    /// Construct a client for the given credentials
    fn connect(&self, credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteStore>>;
}

/// Backend that creates or updates one conversation document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Create the conversation when `payload.conversation_id` is empty,
    /// otherwise replace it
    async fn upsert_conversation(&self, payload: UpsertPayload) -> Result<UpsertResult>;
}

/// Join a directory and a file name with a single `/`
pub fn join_remote_path(dir: &str, basename: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), basename.trim_start_matches('/'))
}

/// Whether a file name carries the session document extension
pub fn is_session_file_name(basename: &str) -> bool {
    basename.to_lowercase().ends_with(SESSION_FILE_EXTENSION)
}
