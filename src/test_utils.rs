//! Test utilities for sessync
//!
//! Temporary directory helpers, assertion helpers and in-memory fakes for the
//! storage traits.

use crate::error::{Result, SessyncError};
use crate::storage::{
    ConversationBackend, FileEntry, LocalStore, RemoteConnector, RemoteCredentials, RemoteEntry,
    RemoteEntryKind, RemoteStore, UpsertPayload, UpsertResult,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: std::result::Result<T, SessyncError>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Fixed timestamp `seconds` after 2026-01-01T00:00:00Z
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

/// Upsert backend that records payloads and hands out `conv-<n>` ids
#[derive(Default)]
pub struct RecordingBackend {
    payloads: Mutex<Vec<UpsertPayload>>,
    next_id: AtomicUsize,
    failures: AtomicUsize,
    delay: Duration,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail the next `count` calls
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<UpsertPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationBackend for RecordingBackend {
    async fn upsert_conversation(&self, payload: UpsertPayload) -> Result<UpsertResult> {
        self.payloads.lock().unwrap().push(payload.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SessyncError::Backend("simulated failure".into()).into());
        }

        let conversation_id = if payload.conversation_id.is_empty() {
            format!("conv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        } else {
            payload.conversation_id
        };
        Ok(UpsertResult {
            ok: true,
            conversation_id,
            conversation_name: payload.conversation_name,
            ..Default::default()
        })
    }
}

/// In-memory remote store
#[derive(Default)]
pub struct MemoryRemoteStore {
    files: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    reads: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file at the full remote `path`
    pub fn insert(&self, path: &str, contents: &str, lastmod: DateTime<Utc>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (contents.to_string(), lastmod));
    }

    /// Number of `read_file` calls served
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .any(|k| k.starts_with(&prefix)))
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter_map(|(key, (contents, lastmod))| {
                key.strip_prefix(&prefix).map(|basename| RemoteEntry {
                    kind: RemoteEntryKind::File,
                    basename: basename.to_string(),
                    lastmod: *lastmod,
                    size: contents.len() as u64,
                })
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|(contents, _)| contents.clone())
            .ok_or_else(|| SessyncError::Remote {
                status: 404,
                message: path.to_string(),
            })
            .map_err(Into::into)
    }
}

/// In-memory local store whose listing waits for a configurable delay
#[derive(Default)]
pub struct MemoryLocalStore {
    files: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    list_delay: Mutex<Duration>,
    lists: AtomicUsize,
}

impl MemoryLocalStore {
    pub fn with_list_delay(delay: Duration) -> Self {
        let store = Self::default();
        store.set_list_delay(delay);
        store
    }

    /// Delay applied to listings started from now on
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Add a file at the full `path`
    pub fn insert(&self, path: &str, contents: &str, lastmod: DateTime<Utc>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (contents.to_string(), lastmod));
    }

    /// Number of `list_files` calls started
    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, (contents, lastmod))| {
                file_entry(path, *lastmod, contents.len() as u64)
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|(contents, _)| contents.clone())
            .ok_or_else(|| SessyncError::Storage(format!("{} not found", path)))
            .map_err(Into::into)
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        self.insert(path, contents, Utc::now());
        Ok(())
    }
}

/// Remote store whose every call fails
pub struct FailingRemoteStore;

#[async_trait]
impl RemoteStore for FailingRemoteStore {
    async fn exists(&self, _path: &str) -> Result<bool> {
        Err(SessyncError::BackendUnavailable("remote offline".into()).into())
    }

    async fn list_directory(&self, _path: &str) -> Result<Vec<RemoteEntry>> {
        Err(SessyncError::BackendUnavailable("remote offline".into()).into())
    }

    async fn read_file(&self, _path: &str) -> Result<String> {
        Err(SessyncError::BackendUnavailable("remote offline".into()).into())
    }
}

/// Connector that always returns the same store and counts connections
pub struct StaticConnector {
    store: Arc<dyn RemoteStore>,
    connects: AtomicUsize,
}

impl StaticConnector {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl RemoteConnector for StaticConnector {
    fn connect(&self, _credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.store))
    }
}

/// Local file entry helper for fakes
pub fn file_entry(path: &str, lastmod: DateTime<Utc>, size: u64) -> FileEntry {
    let basename = path.rsplit('/').next().unwrap_or(path).to_string();
    FileEntry {
        path: path.to_string(),
        basename,
        lastmod,
        size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "test.json", "{}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: std::result::Result<(), SessyncError> =
            Err(SessyncError::Config("test error message".to_string()));
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        let result: std::result::Result<(), SessyncError> = Ok(());
        assert_error_contains(result, "error");
    }

    #[tokio::test]
    async fn test_recording_backend_assigns_ids_and_fails_on_demand() {
        let backend = RecordingBackend::new();
        backend.fail_next(1);
        let payload = UpsertPayload {
            conversation_id: String::new(),
            conversation_name: "n".into(),
            assistant_code: "AI".into(),
            session_data: serde_json::json!({}),
            idempotency_key: String::new(),
            idempotency_at: 0,
        };
        assert!(backend.upsert_conversation(payload.clone()).await.is_err());
        let ok = backend.upsert_conversation(payload).await.unwrap();
        assert_eq!(ok.conversation_id, "conv-1");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_remote_store_lists_direct_children() {
        let store = MemoryRemoteStore::new();
        store.insert("/base/a.json", "{}", at(0));
        assert!(store.exists("/base").await.unwrap());
        assert!(!store.exists("/other").await.unwrap());
        let entries = store.list_directory("/base/").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].basename, "a.json");
    }
}
