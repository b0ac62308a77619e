//! Error types for tessera.

use thiserror::Error;

/// Result type alias using tessera's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tessera operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ingestion job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Source object not found
    #[error("Object not found: {0}")]
    ObjectNotFound(uuid::Uuid),

    /// Vector index operation failed
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or contract violation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether re-attempting the failed operation with the same inputs can
    /// plausibly succeed.
    ///
    /// Network, database, index, and model failures are transient. Shape
    /// errors (`InvalidInput`), missing resources, bad configuration, and
    /// malformed data are not: retrying the same inputs reproduces them.
    /// The saga executor consults this before consuming a step's retry
    /// budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::VectorIndex(_)
                | Error::Embedding(_)
                | Error::Request(_)
                | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("job row after insert".to_string());
        assert_eq!(err.to_string(), "Not found: job row after insert");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_object_not_found() {
        let id = Uuid::new_v4();
        let err = Error::ObjectNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_vector_index() {
        let err = Error::VectorIndex("connection refused".to_string());
        assert_eq!(err.to_string(), "Vector index error: connection refused");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("vector ID count mismatch".to_string());
        assert_eq!(err.to_string(), "Invalid input: vector ID count mismatch");
    }

    #[test]
    fn test_error_display_job() {
        let err = Error::Job("queue full".to_string());
        assert_eq!(err.to_string(), "Job error: queue full");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing vector index URL".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing vector index URL"
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::VectorIndex("timeout".into()).is_retryable());
        assert!(Error::Embedding("rate limited".into()).is_retryable());
        assert!(Error::Request("connection reset".into()).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(Error::Io(io).is_retryable());
    }

    #[test]
    fn test_shape_and_fatal_errors_are_not_retryable() {
        assert!(!Error::InvalidInput("vector ID count mismatch".into()).is_retryable());
        assert!(!Error::Config("missing credentials".into()).is_retryable());
        assert!(!Error::NotFound("row".into()).is_retryable());
        assert!(!Error::Serialization("bad json".into()).is_retryable());
        assert!(!Error::Internal("broken invariant".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
