//! Error types for execbox

use thiserror::Error;

/// Result type alias using execbox's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for execbox
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Submitted code failed size or security screening
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The container runtime refused to provide a sandbox
    #[error("Failed to create sandbox container: {0}")]
    SandboxCreation(String),

    /// The sandbox is unknown or no longer running
    #[error("Container not found or not running: {0}")]
    SandboxUnavailable(String),

    /// Submitted code ran past the execution ceiling
    #[error("Execution timeout exceeded after {0}s")]
    ExecutionTimeout(u64),

    /// Execution was aborted because its sandbox is being torn down
    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// Failure to stop or remove a sandbox
    #[error("Cleanup failed for container {container_id}: {message}")]
    Cleanup {
        container_id: String,
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Container(_) | Error::Cleanup { .. })
    }

    /// Check if error is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::Unauthorized(_)
        )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(format!("Invalid rule pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Container("daemon hiccup".into()).is_retryable());
        assert!(Error::Cleanup {
            container_id: "abc".into(),
            message: "busy".into()
        }
        .is_retryable());
        assert!(!Error::ExecutionTimeout(30).is_retryable());

        assert!(Error::Validation("too big".into()).is_client_error());
        assert!(!Error::SandboxCreation("no image".into()).is_client_error());
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let msg = Error::ExecutionTimeout(30).to_string();
        assert!(msg.to_lowercase().contains("timeout"));
    }
}
