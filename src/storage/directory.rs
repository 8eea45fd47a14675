//! Upsert backend that stores each conversation as a JSON file
//!
//! Documents land in `<dir>/<conversationId>.json`, which is also where the
//! session indexer's local scan finds them. A first save derives the id from
//! the conversation name so the file stays recognizable on disk.

use super::types::{UpsertPayload, UpsertResult};
use super::{ConversationBackend, LocalStore, SESSION_FILE_EXTENSION};
use crate::error::{Result, SessyncError};
use crate::index::preview::extract_session_preview;
use crate::naming::sanitize_file_component;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Stores conversations as files in one directory
///
/// # Examples
///
/// ```
/// use sessync::storage::{
///     ConversationBackend, DirectoryBackend, FsLocalStore, UpsertPayload,
/// };
/// use std::sync::Arc;
///
/// let dir = tempfile::tempdir().unwrap();
/// let backend = DirectoryBackend::new(
///     Arc::new(FsLocalStore::new()),
///     dir.path().to_string_lossy().to_string(),
/// );
///
/// let result = tokio_test::block_on(backend.upsert_conversation(UpsertPayload {
///     conversation_id: String::new(),
///     conversation_name: "Weekly plan".to_string(),
///     assistant_code: "AI".to_string(),
///     session_data: serde_json::json!({"history": []}),
///     idempotency_key: String::new(),
///     idempotency_at: 0,
/// }))
/// .unwrap();
///
/// assert_eq!(result.conversation_id, "Weekly plan");
/// assert!(dir.path().join("Weekly plan.json").exists());
/// ```
pub struct DirectoryBackend {
    store: Arc<dyn LocalStore>,
    dir: String,
}

impl DirectoryBackend {
    /// Create a backend writing into `dir`
    pub fn new(store: Arc<dyn LocalStore>, dir: impl Into<String>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    /// Directory documents are written to
    pub fn dir(&self) -> &str {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> String {
        Path::new(&self.dir)
            .join(format!("{}{}", conversation_id, SESSION_FILE_EXTENSION))
            .to_string_lossy()
            .to_string()
    }

    async fn existing_ids(&self) -> HashSet<String> {
        match self.store.list_files(&self.dir).await {
            Ok(files) => files
                .into_iter()
                .filter_map(|f| {
                    f.basename
                        .strip_suffix(SESSION_FILE_EXTENSION)
                        .map(str::to_string)
                })
                .collect(),
            // A missing directory just means nothing has been saved yet.
            Err(_) => HashSet::new(),
        }
    }

    async fn allocate_id(&self, conversation_name: &str) -> String {
        let mut base = sanitize_file_component(conversation_name);
        if base.is_empty() {
            base = uuid::Uuid::new_v4().to_string();
        }

        let taken = self.existing_ids().await;
        if !taken.contains(&base) {
            return base;
        }
        loop {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let candidate = format!("{}-{}", base, &suffix[..8]);
            if !taken.contains(&candidate) {
                return candidate;
            }
        }
    }
}

#[async_trait]
impl ConversationBackend for DirectoryBackend {
    async fn upsert_conversation(&self, payload: UpsertPayload) -> Result<UpsertResult> {
        let mut session = match payload.session_data {
            Value::Object(map) => map,
            _ => {
                return Err(SessyncError::Backend(
                    "Session payload is required and must be an object.".into(),
                )
                .into())
            }
        };

        let conversation_id = match payload.conversation_id.trim() {
            "" => self.allocate_id(&payload.conversation_name).await,
            id => id.to_string(),
        };

        session.insert("conversationId".into(), Value::String(conversation_id.clone()));
        session.insert(
            "conversationName".into(),
            Value::String(payload.conversation_name.clone()),
        );
        session.insert("CODE".into(), Value::String(payload.assistant_code.clone()));

        let document = Value::Object(session);
        let text = serde_json::to_string_pretty(&document)?;
        let preview = extract_session_preview(&document);
        let path = self.path_for(&conversation_id);

        let unchanged = match self.store.read_file(&path).await {
            Ok(existing) => existing == text,
            Err(_) => false,
        };

        if unchanged {
            tracing::debug!("Conversation {} unchanged on disk", conversation_id);
        } else {
            self.store.write_file(&path, &text).await.map_err(|e| {
                SessyncError::Backend(format!("Failed to write {}: {:#}", path, e))
            })?;
            tracing::info!("Saved conversation {} to {}", conversation_id, path);
        }

        Ok(UpsertResult {
            ok: true,
            unchanged,
            conversation_id,
            conversation_name: payload.conversation_name,
            preview,
            size: text.len() as u64,
            lastmod: Some(Utc::now()),
        })
    }
}
