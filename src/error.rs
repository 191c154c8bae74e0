// Error handling module
// Defines the remote-call taxonomy, setup errors and per-item failure kinds

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a single call to the remote query service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Service is rejecting work due to rate limits
    #[error("Throttled ({}), retry-after: {}", .status, .retry_after.as_deref().unwrap_or("none"))]
    Throttled {
        status: u16,
        /// Raw server wait hint, parsed later by the backoff calculator
        retry_after: Option<String>,
    },

    /// Request never produced an HTTP response
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: String, message: String },

    /// Service answered with a non-throttling error
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
}

impl RemoteError {
    /// Only throttling is retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Throttled { .. })
    }

    /// HTTP-equivalent status for attempt records
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Throttled { status, .. } | RemoteError::Server { status, .. } => {
                Some(*status)
            }
            RemoteError::Transport { .. } => None,
        }
    }

    /// Terminal failure kind when this error ends a work item
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RemoteError::Throttled { .. } => FailureKind::RetriesExhausted,
            RemoteError::Transport { .. } => FailureKind::Transport,
            RemoteError::Server { .. } => FailureKind::Server,
        }
    }
}

/// Fatal errors raised before any work item is dispatched
#[derive(Error, Debug)]
pub enum SetupError {
    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// No query payloads to draw from
    #[error("No questions configured (use --question or --questions-file)")]
    NoQuestions,

    /// Remote service could not be reached
    #[error("Remote service unreachable: {0}")]
    Unreachable(String),

    /// Remote service rejected our credentials
    #[error("Remote service rejected credentials: {0}")]
    Unauthorized(String),

    /// HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Why a work item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Server,
    Timeout,
    RetriesExhausted,
    Cancelled,
    /// Worker task panicked before producing an outcome
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Server => write!(f, "server"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RetriesExhausted => write!(f, "retries_exhausted"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// Result type alias for setup operations
pub type Result<T> = std::result::Result<T, SetupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RemoteError::Server {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Server error: 500 - boom");

        let err = RemoteError::Throttled {
            status: 429,
            retry_after: Some("5".to_string()),
        };
        assert_eq!(err.to_string(), "Throttled (429), retry-after: 5");

        let err = RemoteError::Throttled {
            status: 429,
            retry_after: None,
        };
        assert_eq!(err.to_string(), "Throttled (429), retry-after: none");

        let err = RemoteError::Transport {
            kind: "connect".to_string(),
            message: "refused".to_string(),
        };
        assert_eq!(err.to_string(), "Transport error (connect): refused");
    }

    #[test]
    fn test_setup_error_messages() {
        let err = SetupError::InvalidConfig("max_workers must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: max_workers must be at least 1"
        );

        let err = SetupError::Unreachable("connection refused".to_string());
        assert_eq!(err.to_string(), "Remote service unreachable: connection refused");
    }

    #[test]
    fn test_only_throttling_is_retryable() {
        assert!(RemoteError::Throttled {
            status: 429,
            retry_after: None
        }
        .is_retryable());
        assert!(!RemoteError::Server {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::Transport {
            kind: "timeout".to_string(),
            message: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn test_failure_kind_mapping() {
        let err = RemoteError::Server {
            status: 400,
            message: "bad".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Server);
        assert_eq!(err.status(), Some(400));

        let err = RemoteError::Transport {
            kind: "connect".to_string(),
            message: "refused".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Transport);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_failure_kind_display_matches_serde() {
        for kind in [
            FailureKind::Transport,
            FailureKind::Server,
            FailureKind::Timeout,
            FailureKind::RetriesExhausted,
            FailureKind::Cancelled,
            FailureKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }
}
