//! Error types for the labfleet client

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when talking to the labfleet daemon
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The daemon answered with an error status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Machine-readable code, when the daemon sent one
        code: Option<String>,
        /// Error message from the daemon
        message: String,
    },

    /// A job submission was refused
    #[error("job refused ({status}): {message}")]
    JobRefused { status: u16, message: String },
}

impl ClientError {
    /// HTTP status behind the error, if the daemon answered at all
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::JobRefused { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Json(_) | Self::Url(_) => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Build an API error from a response body
    ///
    /// The daemon sends `{"code": ..., "message": ...}`; anything else is kept
    /// verbatim as the message.
    pub(crate) fn from_body(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Body {
            code: String,
            message: String,
        }

        match serde_json::from_str::<Body>(body) {
            Ok(b) => Self::Api {
                status,
                code: Some(b.code),
                message: b.message,
            },
            Err(_) => Self::Api {
                status,
                code: None,
                message: body.to_string(),
            },
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_body() {
        let err = ClientError::from_body(409, r#"{"code":"CONFLICT","message":"port is reserved"}"#);
        match &err {
            ClientError::Api { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("CONFLICT"));
                assert_eq!(message, "port is reserved");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.status(), Some(409));
    }

    #[test]
    fn test_plain_body() {
        let err = ClientError::from_body(404, "nothing here");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "API error (404): nothing here");
    }
}
