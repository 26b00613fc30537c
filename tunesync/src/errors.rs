//! Error types for the tunesync engine.
//!
//! Every failure that can abort a pipeline run is a variant of
//! [`SyncError`]. A declined confirmation is *not* an error: it is the
//! normal [`TaskOutcome::Canceled`](crate::task::TaskOutcome) outcome of
//! the check/confirm gate and is handled by the pipeline itself.

use thiserror::Error;

/// The main error type for tunesync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A remote service call failed or returned an out-of-range status.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// An expected pipeline-state key was absent or malformed.
    #[error("{0}")]
    StateShape(#[from] StateShapeError),

    /// Index construction found a repeated key where uniqueness was required.
    #[error("{0}")]
    DuplicateKey(#[from] DuplicateKeyError),

    /// A task read a key no earlier task writes.
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// IO error from the local file store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a remote service operation fails.
///
/// Carries the operation name so the operator can diagnose the run
/// without engine-level retries (there are none).
#[derive(Debug, Clone, Error)]
#[error("service operation `{operation}` failed: {detail}")]
pub struct ServiceError {
    /// The logical operation name (e.g. `cloud.list`).
    pub operation: String,
    /// Human-readable failure detail.
    pub detail: String,
    /// Transport-level status code, when one was received.
    pub status: Option<u16>,
    /// Body-level result code, when one was received.
    pub code: Option<i64>,
}

impl ServiceError {
    /// Creates a new service error.
    #[must_use]
    pub fn new(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            detail: detail.into(),
            status: None,
            code: None,
        }
    }

    /// Creates an error for an out-of-range transport status.
    #[must_use]
    pub fn transport(operation: impl Into<String>, status: u16) -> Self {
        Self {
            operation: operation.into(),
            detail: format!("transport status {status}"),
            status: Some(status),
            code: None,
        }
    }

    /// Creates an error for an out-of-range body-level code.
    #[must_use]
    pub fn rejected(operation: impl Into<String>, code: i64) -> Self {
        Self {
            operation: operation.into(),
            detail: format!("service rejected the request with code {code}"),
            status: None,
            code: Some(code),
        }
    }

    /// Creates an error for a response body missing an expected field.
    #[must_use]
    pub fn malformed(operation: impl Into<String>, field: &str) -> Self {
        Self {
            operation: operation.into(),
            detail: format!("response body is missing `{field}`"),
            status: None,
            code: None,
        }
    }
}

/// Error raised when a pipeline-state key is absent or malformed.
#[derive(Debug, Clone, Error)]
#[error("state key `{key}`: {detail}")]
pub struct StateShapeError {
    /// The offending key.
    pub key: String,
    /// What was expected of it.
    pub detail: String,
}

impl StateShapeError {
    /// Creates a new state-shape error.
    #[must_use]
    pub fn new(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            detail: detail.into(),
        }
    }

    /// The key was expected but absent.
    #[must_use]
    pub fn missing(key: impl Into<String>) -> Self {
        Self::new(key, "expected but absent")
    }

    /// The key was present but did not have the expected shape.
    #[must_use]
    pub fn malformed(key: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(key, format!("malformed: {detail}"))
    }
}

/// Error raised when unique indexing encounters a repeated key.
#[derive(Debug, Clone, Error)]
#[error("duplicate key `{key}` in a collection indexed as unique")]
pub struct DuplicateKeyError {
    /// The repeated key, rendered for diagnostics.
    pub key: String,
}

impl DuplicateKeyError {
    /// Creates a new duplicate-key error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Error raised at assembly time when a task's declared reads are not
/// covered by any earlier task's writes or by the initial document.
#[derive(Debug, Clone, Error)]
#[error("pipeline assembly: task `{task}` reads `{key}`, which no earlier task writes")]
pub struct AssemblyError {
    /// The task with the unsatisfied read.
    pub task: String,
    /// The unsatisfied key.
    pub key: String,
}

impl AssemblyError {
    /// Creates a new assembly error.
    #[must_use]
    pub fn new(task: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            key: key.into(),
        }
    }
}
