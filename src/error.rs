//! Error types for Sessync
//!
//! This module defines all error types used throughout the engine,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Sessync operations
///
/// This enum encompasses the failures that can surface from configuration
/// loading, the local and remote session stores, the upsert backend, and
/// session payload loading.
#[derive(Error, Debug)]
pub enum SessyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local or remote storage errors (listing, reading, writing)
    #[error("Storage error: {0}")]
    Storage(String),

    /// The upsert backend rejected or failed a write
    #[error("Backend error: {0}")]
    Backend(String),

    /// A loaded session document is not valid JSON or not a JSON object
    #[error("Invalid session payload: {0}")]
    InvalidSessionPayload(String),

    /// A backend required for the operation cannot be constructed
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Remote store answered with an unexpected HTTP status
    #[error("Remote error: status={status}, {message}")]
    Remote {
        /// HTTP status code returned by the remote store
        status: u16,
        /// Request that failed
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SessyncError {
    /// Rebuild a typed error from one shared between several waiters
    ///
    /// Message-carrying variants keep their kind. Wrapped library errors and
    /// untyped errors become `Backend` with the full error chain as text.
    pub fn from_shared(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<SessyncError>() {
            Some(SessyncError::Config(m)) => SessyncError::Config(m.clone()),
            Some(SessyncError::Storage(m)) => SessyncError::Storage(m.clone()),
            Some(SessyncError::Backend(m)) => SessyncError::Backend(m.clone()),
            Some(SessyncError::InvalidSessionPayload(m)) => {
                SessyncError::InvalidSessionPayload(m.clone())
            }
            Some(SessyncError::BackendUnavailable(m)) => {
                SessyncError::BackendUnavailable(m.clone())
            }
            Some(SessyncError::Remote { status, message }) => SessyncError::Remote {
                status: *status,
                message: message.clone(),
            },
            _ => SessyncError::Backend(format!("{:#}", error)),
        }
    }
}

/// Result type alias for Sessync operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation. Typed errors
/// can be recovered with `downcast_ref::<SessyncError>()`.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shared_keeps_typed_variants() {
        let shared = anyhow::Error::new(SessyncError::InvalidSessionPayload("not an object".into()));
        assert!(matches!(
            SessyncError::from_shared(&shared),
            SessyncError::InvalidSessionPayload(m) if m == "not an object"
        ));

        let remote = anyhow::Error::new(SessyncError::Remote {
            status: 503,
            message: "GET /a.json".into(),
        });
        assert!(matches!(
            SessyncError::from_shared(&remote),
            SessyncError::Remote { status: 503, .. }
        ));
    }

    #[test]
    fn test_from_shared_wraps_untyped_errors_as_backend() {
        let shared = anyhow::anyhow!("disk full").context("write failed");
        match SessyncError::from_shared(&shared) {
            SessyncError::Backend(message) => assert_eq!(message, "write failed: disk full"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_config_error_display() {
        let error = SessyncError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_backend_error_display() {
        let error = SessyncError::Backend("disk full".to_string());
        assert_eq!(error.to_string(), "Backend error: disk full");
    }

    #[test]
    fn test_invalid_session_payload_display() {
        let error = SessyncError::InvalidSessionPayload("not an object".to_string());
        assert_eq!(error.to_string(), "Invalid session payload: not an object");
    }

    #[test]
    fn test_backend_unavailable_display() {
        let error = SessyncError::BackendUnavailable("remote not configured".to_string());
        assert_eq!(
            error.to_string(),
            "Backend unavailable: remote not configured"
        );
    }

    #[test]
    fn test_remote_error_display() {
        let error = SessyncError::Remote {
            status: 401,
            message: "PROPFIND /sessions".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("status=401"));
        assert!(s.contains("PROPFIND /sessions"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: SessyncError = io_error.into();
        assert!(matches!(error, SessyncError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: SessyncError = json_error.into();
        assert!(matches!(error, SessyncError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: SessyncError = yaml_error.into();
        assert!(matches!(error, SessyncError::Yaml(_)));
    }

    #[test]
    fn test_typed_error_survives_anyhow() {
        let err: anyhow::Error = SessyncError::InvalidSessionPayload("x".into()).into();
        assert!(matches!(
            err.downcast_ref::<SessyncError>(),
            Some(SessyncError::InvalidSessionPayload(_))
        ));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessyncError>();
    }
}
