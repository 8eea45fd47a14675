//! Merged index of stored sessions
//!
//! [`SessionIndexer`] scans the local sessions directory and, when
//! configured, the remote store, and groups every valid session document by
//! the assistant that owns it. The two scans run concurrently and fail
//! independently: a failing source is logged and left out of that refresh.
//! The merged [`SessionIndex`] is published in one step once both scans are
//! done, so readers never see a partially merged index.

pub mod cache;
pub mod preview;

use crate::error::{Result, SessyncError};
use crate::storage::{
    is_session_file_name, join_remote_path, LoadedSession, LocalStore, RemoteConnector,
    RemoteCredentials, RemoteEntryKind, RemoteStore, SessionListItem, SessionSource,
};
use cache::{file_stem, parse_session_metadata, session_code, MetadataCache, SessionMetadata};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Delay of a forced scheduled refresh
pub const FORCED_REFRESH_DELAY: Duration = Duration::from_millis(80);

/// Delay of a regular scheduled refresh
pub const REFRESH_DELAY: Duration = Duration::from_millis(180);

/// Remote location scanned by the indexer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndexConfig {
    pub credentials: RemoteCredentials,
    /// Directory on the remote that holds session documents
    pub base_path: String,
}

/// What the indexer scans and for which assistants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerConfig {
    /// Local sessions directory
    pub local_dir: Option<String>,
    /// Remote sessions directory
    pub remote: Option<RemoteIndexConfig>,
    /// Codes of the enabled assistants
    pub assistants: Vec<String>,
    /// Preferred display order of assistant codes
    pub assistant_order: Vec<String>,
}

impl IndexerConfig {
    /// Enabled assistants in display order
    pub fn enabled_assistants(&self) -> Vec<String> {
        order_assistants(&self.assistants, &self.assistant_order)
    }
}

/// Order `enabled` codes: first as listed in `order`, then the rest sorted
///
/// Duplicates and codes in `order` that are not enabled are dropped.
pub fn order_assistants(enabled: &[String], order: &[String]) -> Vec<String> {
    let enabled: BTreeSet<&str> = enabled
        .iter()
        .map(|code| code.trim())
        .filter(|code| !code.is_empty())
        .collect();

    let mut ordered: Vec<String> = Vec::with_capacity(enabled.len());
    for code in order.iter().map(|code| code.trim()) {
        if enabled.contains(code) && !ordered.iter().any(|c| c == code) {
            ordered.push(code.to_string());
        }
    }
    for code in enabled {
        if !ordered.iter().any(|c| c == code) {
            ordered.push(code.to_string());
        }
    }
    ordered
}

/// Sort sessions newest first, local before cloud, then by name
///
/// The path is the last tie-break so the order is total.
pub fn sort_session_items(items: &mut [SessionListItem]) {
    items.sort_by(|a, b| {
        b.lastmod
            .cmp(&a.lastmod)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| {
                a.conversation_name
                    .to_lowercase()
                    .cmp(&b.conversation_name.to_lowercase())
            })
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// Sessions grouped by assistant
#[derive(Debug, Clone, Default)]
pub struct SessionIndex {
    assistants: Vec<String>,
    sessions: HashMap<String, Vec<SessionListItem>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl SessionIndex {
    /// Assistants covered by this index, in display order
    pub fn assistants(&self) -> &[String] {
        &self.assistants
    }

    /// Sorted sessions of one assistant
    pub fn sessions_for(&self, assistant_code: &str) -> &[SessionListItem] {
        self.sessions
            .get(assistant_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of sessions per assistant, in display order
    pub fn count_by_assistant(&self) -> Vec<(String, usize)> {
        self.assistants
            .iter()
            .map(|code| (code.clone(), self.sessions_for(code).len()))
            .collect()
    }

    /// Total number of indexed sessions
    pub fn len(&self) -> usize {
        self.sessions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the index was built, `None` before the first refresh
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Find a session by item id, conversation id (file stem) or name
    pub fn find(&self, needle: &str) -> Option<&SessionListItem> {
        let all = || self.assistants.iter().flat_map(|c| self.sessions_for(c));
        all()
            .find(|item| item.id == needle)
            .or_else(|| all().find(|item| file_stem(&item.basename) == needle))
            .or_else(|| all().find(|item| item.conversation_name == needle))
    }
}

struct IndexerState {
    config: IndexerConfig,
    refreshing: bool,
    index: Arc<SessionIndex>,
    cache: MetadataCache,
    client: Option<(RemoteCredentials, Arc<dyn RemoteStore>)>,
    last_error: Option<String>,
    refresh_generation: u64,
    scan_generation: u64,
}

struct IndexerInner {
    local: Arc<dyn LocalStore>,
    connector: Arc<dyn RemoteConnector>,
    state: Mutex<IndexerState>,
}

/// Lists and merges sessions from the local and remote stores
#[derive(Clone)]
pub struct SessionIndexer {
    inner: Arc<IndexerInner>,
}

impl SessionIndexer {
    /// Create an indexer; nothing is scanned until the first refresh
    pub fn new(
        local: Arc<dyn LocalStore>,
        connector: Arc<dyn RemoteConnector>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(IndexerInner {
                local,
                connector,
                state: Mutex::new(IndexerState {
                    config,
                    refreshing: false,
                    index: Arc::new(SessionIndex::default()),
                    cache: MetadataCache::new(),
                    client: None,
                    last_error: None,
                    refresh_generation: 0,
                    scan_generation: 0,
                }),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace what is scanned; takes effect on the next refresh
    pub fn update_config(&self, config: IndexerConfig) {
        self.lock_state().config = config;
    }

    /// Enabled assistants in display order
    pub fn enabled_assistants(&self) -> Vec<String> {
        self.lock_state().config.enabled_assistants()
    }

    /// Last published index
    pub fn current_index(&self) -> Arc<SessionIndex> {
        Arc::clone(&self.lock_state().index)
    }

    /// Session counts of the last published index
    pub fn count_by_assistant(&self) -> Vec<(String, usize)> {
        self.current_index().count_by_assistant()
    }

    /// Errors of the sources that failed during the last refresh
    pub fn last_error(&self) -> Option<String> {
        self.lock_state().last_error.clone()
    }

    /// Whether a refresh is running
    pub fn is_refreshing(&self) -> bool {
        self.lock_state().refreshing
    }

    /// Number of cached parse results
    pub fn cached_entries(&self) -> usize {
        self.lock_state().cache.len()
    }

    /// Rebuild the index from both sources
    ///
    /// Returns the current index unchanged if a refresh is already running
    /// and `force` is false. Only the most recently started refresh is
    /// published; an older one that finishes later is discarded. Source
    /// failures are logged and recorded in [`last_error`](Self::last_error),
    /// never returned.
    pub async fn refresh_index(&self, force: bool) -> Arc<SessionIndex> {
        let (config, generation) = {
            let mut state = self.lock_state();
            if state.refreshing && !force {
                tracing::debug!("Index refresh already running");
                return Arc::clone(&state.index);
            }
            state.refreshing = true;
            state.scan_generation += 1;
            (state.config.clone(), state.scan_generation)
        };
        let _guard = RefreshGuard {
            indexer: self,
            generation,
        };

        let assistants = config.enabled_assistants();
        let (local, cloud) = tokio::join!(self.scan_local(&config), self.scan_cloud(&config));

        let mut sessions: HashMap<String, Vec<SessionListItem>> = assistants
            .iter()
            .map(|code| (code.clone(), Vec::new()))
            .collect();
        let mut errors = Vec::new();

        for (source, result) in [(SessionSource::Local, local), (SessionSource::Cloud, cloud)] {
            match result {
                Ok(items) => {
                    for item in items {
                        if let Some(list) = sessions.get_mut(&item.assistant_code) {
                            list.push(item);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to index {} sessions: {:#}", source, e);
                    errors.push(format!("{}: {:#}", source, e));
                }
            }
        }

        for list in sessions.values_mut() {
            sort_session_items(list);
        }

        let index = Arc::new(SessionIndex {
            assistants,
            sessions,
            refreshed_at: Some(Utc::now()),
        });

        {
            let mut state = self.lock_state();
            if state.scan_generation != generation {
                tracing::debug!("Discarding superseded index refresh");
                return index;
            }
            state.index = Arc::clone(&index);
            state.last_error = if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            };
        }

        tracing::info!(
            "Indexed {} sessions for {} assistants",
            index.len(),
            index.assistants().len()
        );
        index
    }

    /// Refresh after a short delay; a newer call replaces a pending one
    pub fn schedule_refresh(&self, force: bool) {
        let delay = if force {
            FORCED_REFRESH_DELAY
        } else {
            REFRESH_DELAY
        };
        let generation = {
            let mut state = self.lock_state();
            state.refresh_generation += 1;
            state.refresh_generation
        };

        let indexer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if indexer.lock_state().refresh_generation != generation {
                return;
            }
            indexer.refresh_index(force).await;
        });
    }

    /// Read and validate the full document behind an index entry
    ///
    /// # Errors
    ///
    /// - `SessyncError::InvalidSessionPayload` if the text is not a JSON
    ///   object
    /// - `SessyncError::BackendUnavailable` if a cloud entry is requested
    ///   and no remote client can be built
    pub async fn load_session_payload(&self, item: &SessionListItem) -> Result<LoadedSession> {
        let text = match item.source {
            SessionSource::Local => self.inner.local.read_file(&item.path).await?,
            SessionSource::Cloud => {
                let remote = self.lock_state().config.remote.clone().ok_or_else(|| {
                    SessyncError::BackendUnavailable("remote storage is not configured".into())
                })?;
                let client = self
                    .remote_client(&remote.credentials)
                    .map_err(into_unavailable)?;
                client.read_file(&item.path).await?
            }
        };

        let value: Value = serde_json::from_str(&text).map_err(|e| {
            SessyncError::InvalidSessionPayload(format!("{}: {}", item.basename, e))
        })?;
        if !value.is_object() {
            return Err(SessyncError::InvalidSessionPayload(format!(
                "{} is not a JSON object",
                item.basename
            ))
            .into());
        }

        let conversation_name = value
            .get("conversationName")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&item.conversation_name)
            .to_string();
        let assistant_code = match session_code(&value) {
            code if code.is_empty() => item.assistant_code.clone(),
            code => code,
        };
        let conversation_id = value
            .get("conversationId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| match item.source {
                SessionSource::Local => Some(file_stem(&item.basename).to_string()),
                SessionSource::Cloud => None,
            });

        // The document carries the resolved identity so its signature matches
        // the session rebuilt from it.
        let mut session_data = value;
        if let Some(document) = session_data.as_object_mut() {
            document.insert(
                "conversationName".into(),
                Value::String(conversation_name.clone()),
            );
            document.insert("CODE".into(), Value::String(assistant_code.clone()));
            if let Some(id) = &conversation_id {
                document.insert("conversationId".into(), Value::String(id.clone()));
            }
        }

        tracing::debug!("Loaded session {} from {}", item.basename, item.source);
        Ok(LoadedSession {
            conversation_id,
            session_data,
            conversation_name,
            assistant_code,
        })
    }

    fn remote_client(&self, credentials: &RemoteCredentials) -> Result<Arc<dyn RemoteStore>> {
        let mut state = self.lock_state();
        if let Some((cached, client)) = &state.client {
            if cached == credentials {
                return Ok(Arc::clone(client));
            }
        }
        state.client = None;
        let client = self.inner.connector.connect(credentials)?;
        state.client = Some((credentials.clone(), Arc::clone(&client)));
        Ok(client)
    }

    fn cached(&self, key: &str) -> Option<Option<SessionMetadata>> {
        self.lock_state().cache.get(key).cloned()
    }

    fn remember(&self, key: String, metadata: Option<SessionMetadata>) {
        self.lock_state().cache.insert(key, metadata);
    }

    async fn scan_local(&self, config: &IndexerConfig) -> Result<Vec<SessionListItem>> {
        let Some(dir) = config.local_dir.as_deref().filter(|d| !d.trim().is_empty()) else {
            return Ok(Vec::new());
        };

        let files = self.inner.local.list_files(dir).await?;
        let mut items = Vec::new();
        for file in files {
            let key = MetadataCache::key(SessionSource::Local, &file.path, &file.lastmod, file.size);
            let metadata = match self.cached(&key) {
                Some(metadata) => metadata,
                None => match self.inner.local.read_file(&file.path).await {
                    Ok(text) => {
                        let parsed = parse_session_metadata(&text, &file.basename);
                        self.remember(key, parsed.clone());
                        parsed
                    }
                    Err(e) => {
                        tracing::debug!("Skipping unreadable {}: {:#}", file.path, e);
                        None
                    }
                },
            };
            if let Some(metadata) = metadata {
                items.push(list_item(
                    SessionSource::Local,
                    &file.path,
                    &file.basename,
                    file.lastmod,
                    file.size,
                    metadata,
                ));
            }
        }
        Ok(items)
    }

    async fn scan_cloud(&self, config: &IndexerConfig) -> Result<Vec<SessionListItem>> {
        let Some(remote) = config.remote.as_ref() else {
            return Ok(Vec::new());
        };
        if remote.credentials.url.trim().is_empty() || remote.base_path.trim().is_empty() {
            return Ok(Vec::new());
        }

        let client = match self.remote_client(&remote.credentials) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Cloud index disabled: {:#}", e);
                return Ok(Vec::new());
            }
        };

        let dir = remote.base_path.trim();
        if !client.exists(dir).await? {
            tracing::debug!("Remote directory {} does not exist", dir);
            return Ok(Vec::new());
        }

        let entries = client.list_directory(dir).await?;
        let mut items = Vec::new();
        for entry in entries
            .into_iter()
            .filter(|e| e.kind == RemoteEntryKind::File && is_session_file_name(&e.basename))
        {
            let path = join_remote_path(dir, &entry.basename);
            let key = MetadataCache::key(SessionSource::Cloud, &path, &entry.lastmod, entry.size);
            let metadata = match self.cached(&key) {
                Some(metadata) => metadata,
                None => match client.read_file(&path).await {
                    Ok(text) => {
                        let parsed = parse_session_metadata(&text, &entry.basename);
                        self.remember(key, parsed.clone());
                        parsed
                    }
                    Err(e) => {
                        tracing::debug!("Skipping unreadable remote {}: {:#}", path, e);
                        None
                    }
                },
            };
            if let Some(metadata) = metadata {
                items.push(list_item(
                    SessionSource::Cloud,
                    &path,
                    &entry.basename,
                    entry.lastmod,
                    entry.size,
                    metadata,
                ));
            }
        }
        Ok(items)
    }
}

/// Clears the refreshing flag when the newest refresh ends or is dropped
struct RefreshGuard<'a> {
    indexer: &'a SessionIndexer,
    generation: u64,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.indexer.lock_state();
        if state.scan_generation == self.generation {
            state.refreshing = false;
        }
    }
}

fn list_item(
    source: SessionSource,
    path: &str,
    basename: &str,
    lastmod: DateTime<Utc>,
    size: u64,
    metadata: SessionMetadata,
) -> SessionListItem {
    SessionListItem {
        id: format!("{}:{}", source, path),
        source,
        assistant_code: metadata.code,
        conversation_name: metadata.conversation_name,
        preview: metadata.preview,
        basename: basename.to_string(),
        path: path.to_string(),
        lastmod,
        size,
    }
}

fn into_unavailable(e: anyhow::Error) -> anyhow::Error {
    match e.downcast_ref::<SessyncError>() {
        Some(SessyncError::BackendUnavailable(_)) => e,
        _ => SessyncError::BackendUnavailable(format!("{:#}", e)).into(),
    }
}
