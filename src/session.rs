//! The live session document
//!
//! [`SessionHandle`] is the single owner of the mutable state that the
//! persistence coordinator and the autosave scheduler both read: the owning
//! assistant, the backend-assigned conversation id, the conversation name,
//! the dirty/initialized/loading flags and the session JSON itself. Clones of
//! a handle share the same state.

use crate::storage::LoadedSession;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Key of the raw model history in a session document
pub const HISTORY_KEY: &str = "history";

/// Key of the display-oriented message list in a session document
pub const DISPLAY_HISTORY_KEY: &str = "chat_show";

/// Key of the legacy session marker flag
pub const LEGACY_MARKER_KEY: &str = "anywhere_history";

/// Key of the owning assistant code
pub const ASSISTANT_CODE_KEY: &str = "CODE";

#[derive(Debug, Default)]
struct SessionState {
    assistant_code: String,
    conversation_id: String,
    conversation_name: String,
    dirty: bool,
    initialized: bool,
    loading: bool,
    data: Map<String, Value>,
}

/// Shared handle to the active session
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    /// Create an empty, uninitialized session for `assistant_code`
    pub fn new(assistant_code: impl Into<String>) -> Self {
        let handle = Self::default();
        {
            let mut state = handle.lock();
            state.assistant_code = assistant_code.into();
            state.data.insert(LEGACY_MARKER_KEY.into(), Value::Bool(true));
            state.data.insert(HISTORY_KEY.into(), Value::Array(Vec::new()));
            state
                .data
                .insert(DISPLAY_HISTORY_KEY.into(), Value::Array(Vec::new()));
        }
        handle
    }

    /// Create an initialized session from a loaded document
    pub fn from_loaded(loaded: LoadedSession) -> Self {
        let handle = Self::default();
        {
            let mut state = handle.lock();
            state.assistant_code = loaded.assistant_code;
            state.conversation_name = loaded.conversation_name;
            state.conversation_id = loaded.conversation_id.unwrap_or_default();
            state.data = match loaded.session_data {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            state.initialized = true;
        }
        handle
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Owning assistant code
    pub fn assistant_code(&self) -> String {
        self.lock().assistant_code.clone()
    }

    /// Backend-assigned id, empty before the first successful write
    pub fn conversation_id(&self) -> String {
        self.lock().conversation_id.clone()
    }

    /// Current conversation name, empty if none assigned yet
    pub fn conversation_name(&self) -> String {
        self.lock().conversation_name.clone()
    }

    /// Replace the conversation id
    pub fn set_conversation_id(&self, id: impl Into<String>) {
        self.lock().conversation_id = id.into();
    }

    /// Replace the conversation name
    pub fn set_conversation_name(&self, name: impl Into<String>) {
        self.lock().conversation_name = name.into();
    }

    /// Whether unsaved changes exist
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Set or clear the dirty flag
    pub fn set_dirty(&self, dirty: bool) {
        self.lock().dirty = dirty;
    }

    /// Whether the session finished initialization
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Mark initialization complete; dirtiness is tracked from now on
    pub fn mark_initialized(&self) {
        self.lock().initialized = true;
    }

    /// Whether a reply is currently being produced
    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Set the loading flag
    pub fn set_loading(&self, loading: bool) {
        self.lock().loading = loading;
    }

    /// Set a top-level field of the session document
    pub fn set_field(&self, key: impl Into<String>, value: Value) {
        self.lock().data.insert(key.into(), value);
    }

    /// Append a message to both the raw and the display history
    pub fn push_message(&self, message: Value) {
        let mut state = self.lock();
        for key in [HISTORY_KEY, DISPLAY_HISTORY_KEY] {
            let entry = state
                .data
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(list) => list.push(message.clone()),
                other => *other = Value::Array(vec![message.clone()]),
            }
        }
    }

    /// Serializable copy of the document with id, name and code filled in
    pub fn snapshot(&self) -> Value {
        let state = self.lock();
        let mut data = state.data.clone();
        data.insert(
            "conversationId".into(),
            Value::String(state.conversation_id.clone()),
        );
        data.insert(
            "conversationName".into(),
            Value::String(state.conversation_name.clone()),
        );
        data.insert(
            ASSISTANT_CODE_KEY.into(),
            Value::String(state.assistant_code.clone()),
        );
        Value::Object(data)
    }

    fn visible_messages(&self) -> Vec<Value> {
        let state = self.lock();
        [DISPLAY_HISTORY_KEY, HISTORY_KEY]
            .iter()
            .find_map(|key| state.data.get(*key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default()
    }

    /// First user message with content, if any
    pub fn first_user_message(&self) -> Option<Value> {
        self.visible_messages()
            .into_iter()
            .find(|m| message_role(m) == "user" && has_message_content(m))
    }

    /// Whether at least one user message with content exists
    pub fn has_user_message(&self) -> bool {
        self.first_user_message().is_some()
    }

    /// Whether a user message is followed by an assistant reply
    pub fn has_complete_round(&self) -> bool {
        let mut seen_user = false;
        for message in self.visible_messages() {
            if !has_message_content(&message) {
                continue;
            }
            match message_role(&message).as_str() {
                "user" => seen_user = true,
                "assistant" if seen_user => return true,
                _ => {}
            }
        }
        false
    }
}

/// Lowercased role of a message
pub fn message_role(message: &Value) -> String {
    message
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase()
}

/// Whether a message has non-blank text or at least one content part
pub fn has_message_content(message: &Value) -> bool {
    match message.get("content") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(parts)) => !parts.is_empty(),
        _ => false,
    }
}
