//! Error types for the orchestration core.
//!
//! Each subsystem gets its own error enum. Failures are contained at
//! their own level: a single save or a single file upload failing is
//! never allowed to abort a broader step transition.

use std::time::Duration;

use thiserror::Error;

/// Errors from the navigation subsystem.
#[derive(Error, Debug)]
pub enum NavigationError {
    #[error("a flow needs at least one step")]
    NoSteps,

    #[error("step {requested} is out of range (flow has {total} steps)")]
    OutOfRange { requested: usize, total: usize },

    #[error("navigation lock held by request {0} timed out")]
    LockTimedOut(uuid::Uuid),
}

impl NavigationError {
    pub fn out_of_range(requested: usize, total: usize) -> Self {
        NavigationError::OutOfRange { requested, total }
    }
}

/// Errors from tracked asynchronous operations.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("operation '{name}' timed out after {timeout:?}")]
    TimedOut { name: String, timeout: Duration },

    #[error("operation '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TrackError {
    /// Whether this failure is a timeout (as opposed to the operation
    /// itself erroring).
    pub fn is_timeout(&self) -> bool {
        matches!(self, TrackError::TimedOut { .. })
    }

    /// The operation name this error belongs to.
    pub fn operation_name(&self) -> &str {
        match self {
            TrackError::TimedOut { name, .. } | TrackError::Failed { name, .. } => name,
        }
    }
}

/// Errors from the upload lifecycle.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload of '{file}' failed after {attempts} attempts: {last_error}")]
    AttemptsExhausted {
        file: String,
        attempts: u32,
        last_error: String,
    },

    #[error("cannot finalize uploads without a parent record identifier")]
    MissingParentId,

    #[error("no file selected for slot '{0}'")]
    EmptySlot(String),
}

impl UploadError {
    pub fn attempts_exhausted(
        file: impl Into<String>,
        attempts: u32,
        last_error: impl Into<String>,
    ) -> Self {
        UploadError::AttemptsExhausted {
            file: file.into(),
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Whether the failure is terminal for the file (no automatic
    /// retry remains; only explicit user action can restart it).
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadError::AttemptsExhausted { .. })
    }
}
