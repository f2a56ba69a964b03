//! Client error types.

use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Catalog error code for unique-constraint violations.
pub const OBJECT_ALREADY_EXISTS: &str = "OBJECT_ALREADY_EXISTS";

/// Catalog error code for missing or expired sessions.
pub const SESSION: &str = "SESSION";

/// Catalog client errors.
///
/// Cloneable so a single failed request can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("authentication failed ({code}): {message}")]
    Authentication { code: String, message: String },

    #[error("not logged in to facility {0}")]
    NotLoggedIn(String),

    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("no overload matches argument shape ({signature})")]
    NoMatchingOverload { signature: String },

    #[error("server error {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("invalid response: {0}")]
    Decode(#[source] Arc<serde_json::Error>),

    #[error("invalid URL: {0}")]
    Url(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("external sign-out failed: {0}")]
    SignOut(String),

    #[error("session store error: {0}")]
    SessionStore(String),

    #[error("core error: {0}")]
    Core(#[from] topcat_core::Error),
}

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(Arc::new(err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(Arc::new(err))
    }
}

/// Error body returned by the catalog.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ClientError {
    /// Classify a non-success response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        let (code, message) = match parsed {
            Some(ErrorBody { code, message }) => (
                code.unwrap_or_default(),
                message.unwrap_or_else(|| body.to_string()),
            ),
            None => (String::new(), body.to_string()),
        };

        match code.as_str() {
            OBJECT_ALREADY_EXISTS => Self::Conflict { message },
            SESSION => Self::Authentication { code, message },
            _ if status == 401 => Self::Authentication { code, message },
            _ => Self::Server {
                status,
                code,
                message,
            },
        }
    }

    /// The catalog's error code, when the failure came from the catalog.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Authentication { code, .. } | Self::Server { code, .. } => Some(code),
            Self::Conflict { .. } => Some(OBJECT_ALREADY_EXISTS),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Failures caused by credentials or session state.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NotLoggedIn(_))
    }

    /// User-facing text for a failed request.
    pub fn user_message(&self) -> String {
        match self {
            Self::Conflict { .. } => {
                "An entity with this name already exists - please choose another".to_string()
            }
            Self::Authentication { message, .. } | Self::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_already_exists_is_conflict() {
        let err = ClientError::from_response(
            400,
            r#"{"code":"OBJECT_ALREADY_EXISTS","message":"Dataset exists"}"#,
        );
        assert!(err.is_conflict());
        assert_eq!(err.code(), Some(OBJECT_ALREADY_EXISTS));
        assert!(err.user_message().contains("already exists"));
    }

    #[test]
    fn test_session_code_is_authentication() {
        let err = ClientError::from_response(403, r#"{"code":"SESSION","message":"expired"}"#);
        assert!(err.is_authentication());
        assert_eq!(err.user_message(), "expired");
    }

    #[test]
    fn test_unparseable_body_is_kept_as_message() {
        let err = ClientError::from_response(502, "Bad Gateway");
        match err {
            ClientError::Server {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 502);
                assert!(code.is_empty());
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
