use super::read_json_file;
use crate::autosave::AutoSaveScheduler;
use crate::config::Config;
use crate::error::{Result, SessyncError};
use crate::index::cache::session_code;
use crate::persistence::PersistenceCoordinator;
use crate::session::SessionHandle;
use crate::storage::{DirectoryBackend, FsLocalStore, LoadedSession};
use colored::Colorize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const FALLBACK_ASSISTANT_CODE: &str = "AI";

/// Persist the document in `file` into the configured sessions directory
///
/// The document goes through the same path as an autosave: a missing name
/// is derived from the first user message and an unnamed document without
/// user messages is not written.
///
/// # Returns
///
/// The id the session was stored under, `None` if nothing was written
pub async fn save_session(
    config: &Config,
    file: &Path,
    name: Option<String>,
    assistant: Option<String>,
) -> Result<Option<String>> {
    let value = read_json_file(file).await?;
    if !value.is_object() {
        return Err(SessyncError::InvalidSessionPayload(format!(
            "{} is not a JSON object",
            file.display()
        ))
        .into());
    }

    let assistant_code = assistant
        .filter(|code| !code.trim().is_empty())
        .unwrap_or_else(|| match session_code(&value) {
            code if code.is_empty() => FALLBACK_ASSISTANT_CODE.to_string(),
            code => code,
        });
    let text_field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let conversation_id = text_field("conversationId");
    let conversation_name = name
        .or_else(|| text_field("conversationName"))
        .unwrap_or_default();

    let session = SessionHandle::from_loaded(LoadedSession {
        conversation_id,
        session_data: value,
        conversation_name,
        assistant_code: assistant_code.clone(),
    });

    let backend = DirectoryBackend::new(
        Arc::new(FsLocalStore::new()),
        config.storage.sessions_dir.clone(),
    );
    let coordinator = PersistenceCoordinator::with_options(
        session.clone(),
        Arc::new(backend),
        config.coordinator_options(),
    );
    let scheduler = AutoSaveScheduler::new(coordinator, config.autosave_options(&assistant_code));

    session.set_dirty(true);
    scheduler.flush_auto_save(true).await?;

    let id = session.conversation_id();
    if id.is_empty() {
        println!("{}", "Nothing to save: the session has no name and no user message.".yellow());
        return Ok(None);
    }

    println!(
        "Saved {} as {} in {}",
        session.conversation_name().bold(),
        id.cyan(),
        config.storage.sessions_dir
    );
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_file, temp_dir};

    fn config_for(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.storage.sessions_dir = dir.path().join("sessions").to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn test_save_named_session() {
        let dir = temp_dir();
        let input = create_test_file(
            &dir,
            "input.json",
            r#"{"CODE":"AI","history":[],"chat_show":[]}"#,
        );
        let config = config_for(&dir);

        let id = save_session(&config, &input, Some("Trip".into()), None)
            .await
            .unwrap();

        assert_eq!(id.as_deref(), Some("Trip"));
        assert!(dir.path().join("sessions").join("Trip.json").exists());
    }

    #[tokio::test]
    async fn test_save_derives_name_from_first_user_message() {
        let dir = temp_dir();
        let input = create_test_file(
            &dir,
            "input.json",
            r#"{"CODE":"Writer","chat_show":[{"role":"user","content":"draft a poem"}]}"#,
        );

        let id = save_session(&config_for(&dir), &input, None, None)
            .await
            .unwrap()
            .unwrap();

        assert!(id.starts_with("draft a poem-Writer-"), "got {}", id);
    }

    #[tokio::test]
    async fn test_save_empty_unnamed_session_writes_nothing() {
        let dir = temp_dir();
        let input = create_test_file(&dir, "input.json", r#"{"CODE":"AI","history":[]}"#);
        let id = save_session(&config_for(&dir), &input, None, None)
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_non_object() {
        let dir = temp_dir();
        let input = create_test_file(&dir, "input.json", "[]");
        let err = save_session(&config_for(&dir), &input, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }
}
