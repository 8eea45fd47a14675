//! sessync - session persistence and synchronization engine
//!
//! This library persists assistant session documents to a local directory,
//! indexes them together with sessions found on a WebDAV remote, and keeps
//! the active session saved while it is being edited.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `signature`: bounded fingerprints of messages and sessions
//! - `session`: the live session document shared by the writers
//! - `persistence`: idempotent, single-flight upserts of a session
//! - `autosave`: debounced and periodic saving on top of `persistence`
//! - `index`: merged, sorted listing of stored sessions per assistant
//! - `storage`: store and backend traits plus local, WebDAV and directory adapters
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use sessync::{AutoSaveScheduler, Config, PersistenceCoordinator, SessionHandle};
//! use sessync::storage::{DirectoryBackend, FsLocalStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let session = SessionHandle::new("AI");
//!     session.mark_initialized();
//!     let backend = DirectoryBackend::new(
//!         Arc::new(FsLocalStore::new()),
//!         config.storage.sessions_dir.clone(),
//!     );
//!     let coordinator = PersistenceCoordinator::with_options(
//!         session.clone(),
//!         Arc::new(backend),
//!         config.coordinator_options(),
//!     );
//!     let autosave = AutoSaveScheduler::new(coordinator, config.autosave_options("AI"));
//!     autosave.start_fallback();
//!
//!     session.push_message(serde_json::json!({"role": "user", "content": "hello"}));
//!     autosave.mark_dirty();
//!     autosave.flush_auto_save(true).await?;
//!     Ok(())
//! }
//! ```

pub mod autosave;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod index;
pub mod naming;
pub mod persistence;
pub mod session;
pub mod signature;
pub mod storage;

// Re-export commonly used types
pub use autosave::{AutoSaveOptions, AutoSaveScheduler};
pub use config::Config;
pub use error::{Result, SessyncError};
pub use index::{IndexerConfig, SessionIndex, SessionIndexer};
pub use persistence::{PersistOutcome, PersistRequest, PersistenceCoordinator};
pub use session::SessionHandle;
pub use signature::{build_message_signature, build_session_snapshot_signature, canonicalize};

#[cfg(test)]
pub mod test_utils;
