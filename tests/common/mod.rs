use async_trait::async_trait;
use serde_json::{json, Value};
use sessync::storage::{ConversationBackend, UpsertPayload, UpsertResult};
use sessync::SessionHandle;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Write a session document into `dir` and return its path
#[allow(dead_code)]
pub fn write_session(dir: &TempDir, file_name: &str, document: &Value) -> PathBuf {
    let path = dir.path().join(file_name);
    fs::write(&path, serde_json::to_string_pretty(document).unwrap())
        .expect("failed to write session file");
    path
}

/// Minimal valid session document
#[allow(dead_code)]
pub fn session_document(code: &str, name: &str, last_message: &str) -> Value {
    json!({
        "CODE": code,
        "conversationName": name,
        "anywhere_history": true,
        "history": [{"role": "user", "content": last_message}],
        "chat_show": [{"role": "user", "content": last_message}]
    })
}

/// Initialized session with one user message
#[allow(dead_code)]
pub fn live_session(code: &str, text: &str) -> SessionHandle {
    let session = SessionHandle::new(code);
    session.mark_initialized();
    session.push_message(json!({"id": "m1", "role": "user", "content": text}));
    session
}

/// Backend that records payloads, waits `delay` per call and assigns
/// `id-<n>` to first saves
#[allow(dead_code)]
pub struct SlowBackend {
    delay: Duration,
    payloads: Mutex<Vec<UpsertPayload>>,
    created: AtomicUsize,
}

#[allow(dead_code)]
impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            payloads: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn payloads(&self) -> Vec<UpsertPayload> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationBackend for SlowBackend {
    async fn upsert_conversation(&self, payload: UpsertPayload) -> anyhow::Result<UpsertResult> {
        self.payloads.lock().unwrap().push(payload.clone());
        tokio::time::sleep(self.delay).await;

        let conversation_id = if payload.conversation_id.is_empty() {
            format!("id-{}", self.created.fetch_add(1, Ordering::SeqCst) + 1)
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
