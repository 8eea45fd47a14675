/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `sessions`  : list the merged index and load a stored session
- `save`      : persist a session document into the sessions directory
- `signature` : print the snapshot signature of a document
*/

use crate::config::Config;
use crate::error::{Result, SessyncError};
use crate::index::SessionIndexer;
use crate::storage::{FsLocalStore, WebDavConnector};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub mod save;
pub mod sessions;

/// Indexer over the configured local directory and remote
pub fn build_indexer(config: &Config) -> SessionIndexer {
    SessionIndexer::new(
        Arc::new(FsLocalStore::new()),
        Arc::new(WebDavConnector::default()),
        config.indexer_config(),
    )
}

/// Read a JSON document from disk
pub(crate) async fn read_json_file(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        SessyncError::Storage(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        SessyncError::InvalidSessionPayload(format!("{}: {}", path.display(), e)).into()
    })
}

// Signature command handler
pub mod signature {
    //! Prints the snapshot signature of a session document.

    use super::*;
    use crate::signature::build_session_snapshot_signature;

    /// Print the snapshot signature of the document in `file`
    pub async fn print_signature(file: &Path) -> Result<()> {
        let value = read_json_file(file).await?;
        println!("{}", build_session_snapshot_signature(&value));
        Ok(())
    }
}
