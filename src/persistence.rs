//! Idempotent, single-flight persistence of the active session
//!
//! [`PersistenceCoordinator`] serializes every write of one session document
//! to the upsert backend:
//!
//! - at most one backend write is in flight at a time;
//! - requests arriving while a write is in flight are merged field by field
//!   into a single pending slot and the caller awaits the same shared
//!   outcome as the caller that started the flight;
//! - a write whose snapshot signature equals the last persisted one is
//!   skipped once the session has an id;
//! - a first save (no id yet) that repeats the previous first save's
//!   idempotency key inside the idempotency window reuses the id that save
//!   returned instead of creating a second record.
//!
//! Only the outcome of the last drained write is surfaced; an intermediate
//! coalesced write that fails is logged but not reported separately.

use crate::error::{Result, SessyncError};
use crate::naming::DEFAULT_CONVERSATION_NAME;
use crate::session::{SessionHandle, ASSISTANT_CODE_KEY};
use crate::signature::{build_idempotency_key, build_session_snapshot_signature};
use crate::storage::{ConversationBackend, UpsertPayload};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Window in which a repeated first save reuses the previous id
pub const DEFAULT_IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(10);

const FALLBACK_ASSISTANT_CODE: &str = "AI";

type SharedOutcome = std::result::Result<PersistOutcome, Arc<anyhow::Error>>;
type InFlight = Shared<BoxFuture<'static, SharedOutcome>>;

/// One request to persist the session
///
/// Unset fields fall back to the live session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistRequest {
    /// Explicit id to write to
    pub conversation_id: Option<String>,
    /// Explicit name
    pub conversation_name: Option<String>,
    /// Explicit owning assistant
    pub assistant_code: Option<String>,
    /// Explicit document; the live session snapshot is used when unset
    pub session_data: Option<Value>,
    /// `Some(false)` forces a write even when nothing changed
    pub skip_when_unchanged: Option<bool>,
}

impl PersistRequest {
    /// Request that persists the live session as-is
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the conversation name
    pub fn with_conversation_name(mut self, name: impl Into<String>) -> Self {
        self.conversation_name = Some(name.into());
        self
    }

    /// Set the conversation id
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Set the owning assistant
    pub fn with_assistant_code(mut self, code: impl Into<String>) -> Self {
        self.assistant_code = Some(code.into());
        self
    }

    /// Set the document to write
    pub fn with_session_data(mut self, data: Value) -> Self {
        self.session_data = Some(data);
        self
    }

    /// Write even if the snapshot signature did not change
    pub fn forced(mut self) -> Self {
        self.skip_when_unchanged = Some(false);
        self
    }

    /// Overlay `newer` onto `self`; fields set in `newer` win
    pub fn merge(self, newer: PersistRequest) -> PersistRequest {
        PersistRequest {
            conversation_id: newer.conversation_id.or(self.conversation_id),
            conversation_name: newer.conversation_name.or(self.conversation_name),
            assistant_code: newer.assistant_code.or(self.assistant_code),
            session_data: newer.session_data.or(self.session_data),
            skip_when_unchanged: newer
                .skip_when_unchanged
                .or(self.skip_when_unchanged)
                .or(Some(true)),
        }
    }
}

/// Result of a persist call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    /// The write succeeded (or was skipped as unchanged)
    pub ok: bool,
    /// Nothing changed since the last write
    pub unchanged: bool,
    /// Collapsed onto an earlier identical write
    pub deduped: bool,
    /// No backend call was made
    pub skipped: bool,
    /// Id of the stored conversation
    pub conversation_id: String,
    /// Name of the stored conversation
    pub conversation_name: String,
    /// Owning assistant
    pub assistant_code: String,
    /// Preview reported by the backend
    pub preview: String,
    /// Stored size reported by the backend
    pub size: u64,
    /// Stored modification time reported by the backend
    pub lastmod: Option<DateTime<Utc>>,
}

/// Notification sent after a successful write with a usable id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedConversation {
    /// Id of the stored conversation
    pub conversation_id: String,
    /// Name of the stored conversation
    pub conversation_name: String,
    /// Owning assistant
    pub assistant_code: String,
}

/// Callback invoked with every [`PersistedConversation`]
pub type PersistListener = Arc<dyn Fn(&PersistedConversation) + Send + Sync>;

/// Tunables of the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// How long a first-save idempotency key stays reusable
    pub idempotency_window: Duration,
    /// Name used when neither the request nor the session has one
    pub default_conversation_name: String,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            idempotency_window: DEFAULT_IDEMPOTENCY_WINDOW,
            default_conversation_name: DEFAULT_CONVERSATION_NAME.to_string(),
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    in_flight: Option<InFlight>,
    queued: Option<PersistRequest>,
    last_persisted_signature: String,
    last_idempotency_key: String,
    last_idempotency_at: Option<Instant>,
    last_idempotency_conversation_id: String,
}

struct CoordinatorInner {
    session: SessionHandle,
    backend: Arc<dyn ConversationBackend>,
    listener: Option<PersistListener>,
    options: CoordinatorOptions,
    state: Mutex<CoordinatorState>,
}

/// Single-flight writer for one session
#[derive(Clone)]
pub struct PersistenceCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PersistenceCoordinator {
    /// Create a coordinator writing `session` through `backend`
    pub fn new(session: SessionHandle, backend: Arc<dyn ConversationBackend>) -> Self {
        Self::with_options(session, backend, CoordinatorOptions::default())
    }

    /// Create a coordinator with explicit options
    pub fn with_options(
        session: SessionHandle,
        backend: Arc<dyn ConversationBackend>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                session,
                backend,
                listener: None,
                options,
                state: Mutex::new(CoordinatorState::default()),
            }),
        }
    }

    /// Register the persisted-conversation callback
    ///
    /// Must be called before the coordinator is cloned or used.
    pub fn with_listener(mut self, listener: PersistListener) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.listener = Some(listener),
            None => tracing::warn!("Listener ignored: coordinator already shared"),
        }
        self
    }

    /// The session this coordinator writes
    pub fn session(&self) -> &SessionHandle {
        &self.inner.session
    }

    /// Persist the session, coalescing with any write already in flight
    ///
    /// # Errors
    ///
    /// Returns the error of the final drained write. Typed errors such as
    /// `SessyncError::InvalidSessionPayload` keep their variant; any other
    /// failure is reported as `SessyncError::Backend`.
    pub async fn persist(&self, request: PersistRequest) -> Result<PersistOutcome> {
        let in_flight = {
            let mut state = self.inner.lock_state();
            match &state.in_flight {
                Some(current) => {
                    let current = current.clone();
                    let merged = match state.queued.take() {
                        Some(queued) => queued.merge(request),
                        None => PersistRequest::default().merge(request),
                    };
                    state.queued = Some(merged);
                    tracing::debug!("Persist already in flight, request coalesced");
                    current
                }
                None => {
                    let flight = Arc::clone(&self.inner).start_flight(request);
                    state.in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        in_flight
            .await
            .map_err(|e| SessyncError::from_shared(&e).into())
    }

    /// Record `session_data` (or the live snapshot) as already persisted
    ///
    /// Used right after loading a stored session so the first autosave does
    /// not rewrite an unchanged document.
    pub fn mark_snapshot_persisted(&self, session_data: Option<&Value>) {
        let signature = match session_data {
            Some(data) => build_session_snapshot_signature(data),
            None => build_session_snapshot_signature(&self.inner.session.snapshot()),
        };
        self.inner.lock_state().last_persisted_signature = signature;
    }

    /// Adopt a non-empty id and name without writing
    pub fn sync_conversation_meta(&self, conversation_id: &str, conversation_name: &str) {
        let id = conversation_id.trim();
        let name = conversation_name.trim();
        if !id.is_empty() {
            self.inner.session.set_conversation_id(id);
        }
        if !name.is_empty() {
            self.inner.session.set_conversation_name(name);
        }
    }

    /// Signature of the last successful write
    pub fn last_persisted_signature(&self) -> String {
        self.inner.lock_state().last_persisted_signature.clone()
    }

    /// Whether a write is currently in flight
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }
}

fn first_non_empty<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

impl CoordinatorInner {
    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the write so it completes even if every waiter goes away.
    fn start_flight(self: Arc<Self>, request: PersistRequest) -> InFlight {
        let worker = Arc::clone(&self);
        let task = tokio::spawn(async move { worker.run_flight(request).await });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let mut state = self.lock_state();
                    state.in_flight = None;
                    state.queued = None;
                    Err(Arc::new(anyhow::Error::new(join_error)))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_flight(&self, request: PersistRequest) -> SharedOutcome {
        let mut outcome = self.do_persist(request).await.map_err(Arc::new);

        loop {
            let next = {
                let mut state = self.lock_state();
                match state.queued.take() {
                    Some(next) => next,
                    None => {
                        state.in_flight = None;
                        break;
                    }
                }
            };
            if let Err(e) = &outcome {
                tracing::warn!("Coalesced persist attempt failed: {:#}", e);
            }
            tracing::debug!("Draining coalesced persist request");
            outcome = self.do_persist(next).await.map_err(Arc::new);
        }

        outcome
    }

    async fn do_persist(&self, request: PersistRequest) -> Result<PersistOutcome> {
        let session = &self.session;
        let mut data = match request.session_data {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(SessyncError::InvalidSessionPayload(
                    "session data must be a JSON object".into(),
                )
                .into())
            }
            None => match session.snapshot() {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        };

        let live_code = session.assistant_code();
        let live_name = session.conversation_name();
        let live_id = session.conversation_id();

        let assistant_code = first_non_empty([
            request.assistant_code.as_deref(),
            Some(live_code.as_str()),
            data.get(ASSISTANT_CODE_KEY).and_then(Value::as_str),
        ])
        .unwrap_or_else(|| FALLBACK_ASSISTANT_CODE.to_string());

        let conversation_name = first_non_empty([
            request.conversation_name.as_deref(),
            Some(live_name.as_str()),
            data.get("conversationName").and_then(Value::as_str),
        ])
        .unwrap_or_else(|| self.options.default_conversation_name.clone());

        data.insert(
            "conversationName".into(),
            Value::String(conversation_name.clone()),
        );
        data.insert(
            ASSISTANT_CODE_KEY.into(),
            Value::String(assistant_code.clone()),
        );
        if !live_id.is_empty() {
            data.insert("conversationId".into(), Value::String(live_id.clone()));
        }

        let session_data = Value::Object(data);
        let snapshot_signature = build_session_snapshot_signature(&session_data);
        let mut conversation_id = first_non_empty([
            request.conversation_id.as_deref(),
            Some(live_id.as_str()),
            session_data.get("conversationId").and_then(Value::as_str),
        ])
        .unwrap_or_default();

        let skip_when_unchanged = request.skip_when_unchanged != Some(false);
        let now = Instant::now();
        let idempotency_key =
            build_idempotency_key(&assistant_code, &conversation_name, &snapshot_signature);

        {
            let state = self.lock_state();
            if skip_when_unchanged
                && !conversation_id.is_empty()
                && snapshot_signature == state.last_persisted_signature
            {
                tracing::debug!("Session {} unchanged, skipping write", conversation_id);
                return Ok(PersistOutcome {
                    ok: true,
                    unchanged: true,
                    deduped: true,
                    skipped: true,
                    conversation_id,
                    conversation_name,
                    assistant_code,
                    ..Default::default()
                });
            }

            let within_window = state
                .last_idempotency_at
                .map(|at| now.duration_since(at) <= self.options.idempotency_window)
                .unwrap_or(false);
            if conversation_id.is_empty()
                && within_window
                && idempotency_key == state.last_idempotency_key
                && !state.last_idempotency_conversation_id.is_empty()
            {
                tracing::debug!(
                    "Reusing conversation {} for repeated first save",
                    state.last_idempotency_conversation_id
                );
                conversation_id = state.last_idempotency_conversation_id.clone();
            }
        }

        let payload = UpsertPayload {
            conversation_id: conversation_id.clone(),
            conversation_name: conversation_name.clone(),
            assistant_code: assistant_code.clone(),
            session_data,
            idempotency_key: idempotency_key.clone(),
            idempotency_at: Utc::now().timestamp_millis(),
        };

        let result = self.backend.upsert_conversation(payload).await?;

        let live_id = session.conversation_id();
        let live_name = session.conversation_name();
        let applied_id = first_non_empty([
            Some(result.conversation_id.as_str()),
            Some(conversation_id.as_str()),
            Some(live_id.as_str()),
        ])
        .unwrap_or_default();
        let applied_name = first_non_empty([
            Some(result.conversation_name.as_str()),
            Some(conversation_name.as_str()),
            Some(live_name.as_str()),
        ])
        .unwrap_or_default();

        if !applied_id.is_empty() {
            session.set_conversation_id(applied_id.as_str());
        }
        if !applied_name.is_empty() {
            session.set_conversation_name(applied_name.as_str());
        }

        if result.ok {
            {
                let mut state = self.lock_state();
                state.last_persisted_signature = snapshot_signature;
                state.last_idempotency_key = idempotency_key;
                state.last_idempotency_at = Some(now);
                state.last_idempotency_conversation_id = applied_id.clone();
            }
            session.set_dirty(false);
            tracing::info!(
                "Persisted conversation {} ({}) for {}",
                applied_id,
                applied_name,
                assistant_code
            );

            if let Some(listener) = &self.listener {
                if !applied_id.is_empty() {
                    listener(&PersistedConversation {
                        conversation_id: applied_id.clone(),
                        conversation_name: applied_name.clone(),
                        assistant_code: assistant_code.clone(),
                    });
                }
            }
        } else {
            tracing::warn!("Backend did not accept conversation {}", applied_id);
        }

        Ok(PersistOutcome {
            ok: result.ok,
            unchanged: result.unchanged,
            deduped: false,
            skipped: false,
            conversation_id: applied_id,
            conversation_name: applied_name,
            assistant_code,
            preview: result.preview,
            size: result.size,
            lastmod: result.lastmod,
        })
    }
}
