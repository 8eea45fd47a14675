//! Configuration management for sessync
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::autosave::AutoSaveOptions;
use crate::error::{Result, SessyncError};
use crate::index::{IndexerConfig, RemoteIndexConfig};
use crate::naming::DEFAULT_CONVERSATION_NAME;
use crate::persistence::CoordinatorOptions;
use crate::storage::RemoteCredentials;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for sessync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local storage settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// WebDAV remote settings
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Autosave timing
    #[serde(default)]
    pub autosave: AutoSaveConfig,
    /// Persistence coordinator settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Known assistants by code
    #[serde(default = "default_assistants")]
    pub assistants: BTreeMap<String, AssistantConfig>,
    /// Preferred display order of assistant codes
    #[serde(default)]
    pub assistant_order: Vec<String>,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON document per session
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
}

fn default_sessions_dir() -> String {
    ProjectDirs::from("com", "sessync", "sessync")
        .map(|dirs| dirs.data_dir().join("sessions"))
        .unwrap_or_else(|| Path::new("sessions").to_path_buf())
        .to_string_lossy()
        .to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
        }
    }
}

/// WebDAV remote configuration
///
/// The remote is disabled while `url` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the WebDAV server
    #[serde(default)]
    pub url: String,
    /// Basic auth user
    #[serde(default)]
    pub username: String,
    /// Basic auth password
    #[serde(default)]
    pub password: String,
    /// Directory on the server holding session documents
    #[serde(default)]
    pub base_path: String,
}

impl RemoteConfig {
    /// Whether a remote URL is set
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Credentials for building a client
    pub fn credentials(&self) -> RemoteCredentials {
        RemoteCredentials {
            url: self.url.trim().to_string(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Autosave timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    /// Quiet period after the last edit
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Period of the fallback flush
    #[serde(default = "default_fallback_interval_secs")]
    pub fallback_interval_secs: u64,
}

fn default_debounce_ms() -> u64 {
    1800
}

fn default_fallback_interval_secs() -> u64 {
    60
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            fallback_interval_secs: default_fallback_interval_secs(),
        }
    }
}

/// Persistence coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// How long a repeated first save reuses the previous id
    #[serde(default = "default_idempotency_window_secs")]
    pub idempotency_window_secs: u64,
    /// Name of a session nobody named
    #[serde(default = "default_conversation_name")]
    pub default_conversation_name: String,
}

fn default_idempotency_window_secs() -> u64 {
    10
}

fn default_conversation_name() -> String {
    DEFAULT_CONVERSATION_NAME.to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            idempotency_window_secs: default_idempotency_window_secs(),
            default_conversation_name: default_conversation_name(),
        }
    }
}

/// Per-assistant settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Whether sessions of this assistant are indexed
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether edits are saved automatically
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// Optional icon shown next to the assistant
    #[serde(default)]
    pub icon: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_save: true,
            icon: None,
        }
    }
}

fn default_assistants() -> BTreeMap<String, AssistantConfig> {
    BTreeMap::from([("AI".to_string(), AssistantConfig::default())])
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            remote: RemoteConfig::default(),
            autosave: AutoSaveConfig::default(),
            persistence: PersistenceConfig::default(),
            assistants: default_assistants(),
            assistant_order: Vec::new(),
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SessyncError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SessyncError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(dir) = std::env::var("SESSYNC_SESSIONS_DIR") {
            self.storage.sessions_dir = dir;
        }

        // Remote overrides
        if let Ok(url) = std::env::var("SESSYNC_REMOTE_URL") {
            self.remote.url = url;
        }

        if let Ok(username) = std::env::var("SESSYNC_REMOTE_USERNAME") {
            self.remote.username = username;
        }

        if let Ok(password) = std::env::var("SESSYNC_REMOTE_PASSWORD") {
            self.remote.password = password;
        }

        if let Ok(base_path) = std::env::var("SESSYNC_REMOTE_BASE_PATH") {
            self.remote.base_path = base_path;
        }

        if let Ok(debounce) = std::env::var("SESSYNC_DEBOUNCE_MS") {
            if let Ok(value) = debounce.parse() {
                self.autosave.debounce_ms = value;
            } else {
                tracing::warn!("Invalid SESSYNC_DEBOUNCE_MS: {}", debounce);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(dir) = &cli.sessions_dir {
            tracing::debug!("Using sessions directory override: {}", dir);
            self.storage.sessions_dir = dir.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.storage.sessions_dir.trim().is_empty() {
            return Err(
                SessyncError::Config("storage.sessions_dir cannot be empty".to_string()).into(),
            );
        }

        if self.autosave.debounce_ms == 0 {
            return Err(SessyncError::Config(
                "autosave.debounce_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.autosave.fallback_interval_secs == 0 {
            return Err(SessyncError::Config(
                "autosave.fallback_interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.persistence.idempotency_window_secs == 0 {
            return Err(SessyncError::Config(
                "persistence.idempotency_window_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.persistence.default_conversation_name.trim().is_empty() {
            return Err(SessyncError::Config(
                "persistence.default_conversation_name cannot be empty".to_string(),
            )
            .into());
        }

        if self.remote.is_configured() {
            url::Url::parse(self.remote.url.trim()).map_err(|e| {
                SessyncError::Config(format!("Invalid remote.url {}: {}", self.remote.url, e))
            })?;

            if self.remote.base_path.trim().is_empty() {
                return Err(SessyncError::Config(
                    "remote.base_path is required when remote.url is set".to_string(),
                )
                .into());
            }
        }

        Ok(())
    }

    /// Codes of the enabled assistants
    pub fn enabled_assistants(&self) -> Vec<String> {
        self.assistants
            .iter()
            .filter(|(_, assistant)| assistant.enabled)
            .map(|(code, _)| code.clone())
            .collect()
    }

    /// What the session indexer scans
    pub fn indexer_config(&self) -> IndexerConfig {
        let remote = self.remote.is_configured().then(|| RemoteIndexConfig {
            credentials: self.remote.credentials(),
            base_path: self.remote.base_path.trim().to_string(),
        });
        IndexerConfig {
            local_dir: Some(self.storage.sessions_dir.clone()),
            remote,
            assistants: self.enabled_assistants(),
            assistant_order: self.assistant_order.clone(),
        }
    }

    /// Coordinator options
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            idempotency_window: Duration::from_secs(self.persistence.idempotency_window_secs),
            default_conversation_name: self.persistence.default_conversation_name.clone(),
        }
    }

    /// Autosave options for one assistant; unknown assistants save
    pub fn autosave_options(&self, assistant_code: &str) -> AutoSaveOptions {
        AutoSaveOptions {
            debounce: Duration::from_millis(self.autosave.debounce_ms),
            fallback_interval: Duration::from_secs(self.autosave.fallback_interval_secs),
            auto_save_enabled: self
                .assistants
                .get(assistant_code)
                .map(|assistant| assistant.auto_save)
                .unwrap_or(true),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 6] = [
        "SESSYNC_SESSIONS_DIR",
        "SESSYNC_REMOTE_URL",
        "SESSYNC_REMOTE_USERNAME",
        "SESSYNC_REMOTE_PASSWORD",
        "SESSYNC_REMOTE_BASE_PATH",
        "SESSYNC_DEBOUNCE_MS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.autosave.debounce_ms, 1800);
        assert_eq!(config.autosave.fallback_interval_secs, 60);
        assert_eq!(config.persistence.idempotency_window_secs, 10);
        assert_eq!(config.persistence.default_conversation_name, "新对话");
        assert!(config.storage.sessions_dir.ends_with("sessions"));
        assert!(!config.remote.is_configured());
        assert_eq!(config.enabled_assistants(), vec!["AI".to_string()]);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_debounce() {
        let mut config = Config::default();
        config.autosave.debounce_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_windows() {
        let mut config = Config::default();
        config.autosave.fallback_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.persistence.idempotency_window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_default_name() {
        let mut config = Config::default();
        config.persistence.default_conversation_name = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_conversation_name"));
    }

    #[test]
    fn test_config_validation_remote() {
        let mut config = Config::default();
        config.remote.url = "not a url".to_string();
        config.remote.base_path = "/sessions".to_string();
        assert!(config.validate().is_err());

        config.remote.url = "https://dav.example.com".to_string();
        assert!(config.validate().is_ok());

        config.remote.base_path = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_path"));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
storage:
  sessions_dir: /data/sessions
remote:
  url: https://dav.example.com/dav
  username: me
  password: secret
  base_path: /anywhere/sessions
autosave:
  debounce_ms: 500
persistence:
  default_conversation_name: Untitled
assistants:
  AI: {}
  Writer:
    auto_save: false
    icon: pen
  Hidden:
    enabled: false
assistant_order: [Writer, AI]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage.sessions_dir, "/data/sessions");
        assert_eq!(config.autosave.debounce_ms, 500);
        assert_eq!(config.autosave.fallback_interval_secs, 60);
        assert_eq!(config.persistence.default_conversation_name, "Untitled");
        assert_eq!(config.assistants["Writer"].icon.as_deref(), Some("pen"));
        assert!(config.validate().is_ok());

        let indexer = config.indexer_config();
        assert_eq!(indexer.enabled_assistants(), vec!["Writer", "AI"]);
        let remote = indexer.remote.unwrap();
        assert_eq!(remote.base_path, "/anywhere/sessions");
        assert_eq!(remote.credentials.username, "me");

        assert!(!config.autosave_options("Writer").auto_save_enabled);
        assert!(config.autosave_options("AI").auto_save_enabled);
        assert!(config.autosave_options("Unknown").auto_save_enabled);
        assert_eq!(
            config.coordinator_options().default_conversation_name,
            "Untitled"
        );
    }

    #[test]
    fn test_indexer_config_without_remote() {
        let config = Config::default();
        assert!(config.indexer_config().remote.is_none());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        clear_env();
        let cli = crate::cli::Cli::default();
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        assert_eq!(config.autosave.debounce_ms, 1800);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("SESSYNC_REMOTE_URL", "https://env.example.com");
        std::env::set_var("SESSYNC_REMOTE_BASE_PATH", "/env");
        std::env::set_var("SESSYNC_DEBOUNCE_MS", "250");
        std::env::set_var("SESSYNC_SESSIONS_DIR", "/env/sessions");

        let config = Config::load("nonexistent.yaml", &crate::cli::Cli::default()).unwrap();
        clear_env();

        assert_eq!(config.remote.url, "https://env.example.com");
        assert_eq!(config.remote.base_path, "/env");
        assert_eq!(config.autosave.debounce_ms, 250);
        assert_eq!(config.storage.sessions_dir, "/env/sessions");
    }

    #[test]
    #[serial]
    fn test_invalid_env_debounce_is_ignored() {
        clear_env();
        std::env::set_var("SESSYNC_DEBOUNCE_MS", "soon");
        let config = Config::load("nonexistent.yaml", &crate::cli::Cli::default()).unwrap();
        clear_env();
        assert_eq!(config.autosave.debounce_ms, 1800);
    }

    #[test]
    #[serial]
    fn test_cli_sessions_dir_wins_over_env() {
        clear_env();
        std::env::set_var("SESSYNC_SESSIONS_DIR", "/env/sessions");
        let cli = crate::cli::Cli {
            sessions_dir: Some("/cli/sessions".to_string()),
            ..crate::cli::Cli::default()
        };
        let config = Config::load("nonexistent.yaml", &cli).unwrap();
        clear_env();
        assert_eq!(config.storage.sessions_dir, "/cli/sessions");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let dir = crate::test_utils::temp_dir();
        let path = crate::test_utils::create_test_file(
            &dir,
            "config.yaml",
            "storage:\n  sessions_dir: /from/file\n",
        );
        let config =
            Config::load(&path.to_string_lossy(), &crate::cli::Cli::default()).unwrap();
        assert_eq!(config.storage.sessions_dir, "/from/file");
        assert_eq!(config.assistants.len(), 1);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let dir = crate::test_utils::temp_dir();
        let path = crate::test_utils::create_test_file(&dir, "bad.yaml", "storage: [");
        let err = Config::from_file(&path.to_string_lossy()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
