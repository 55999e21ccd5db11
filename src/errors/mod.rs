pub mod handlers;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use handlers::RetryPolicy;

use crate::core::{ObjectKind, Operation};

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),

    #[error("{kind} '{name}' not found")]
    Lookup {
        kind: ObjectKind,
        name: String,
    },

    #[error("{operation} task failed: {detail}")]
    Task {
        operation: Operation,
        detail: String,
    },

    #[error("{operation} task did not finish within {waited:?}")]
    Timeout {
        operation: Operation,
        waited: Duration,
    },

    #[error("{operation} wait cancelled")]
    Cancelled {
        operation: Operation,
    },

    #[error("Platform error: {0}")]
    Platform(String),
}

impl ProvisionError {
    /// Transport-level hiccups are worth another try, everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Platform(_))
    }
}

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("cannot read {path}: {message}")]
    Unreadable {
        path: PathBuf,
        message: String,
    },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("document contains no machines")]
    Empty,

    #[error("machine '{machine}': missing field `{field}`")]
    MissingField {
        machine: String,
        field: &'static str,
    },

    #[error("machine '{machine}': invalid `{field}`: {reason}")]
    InvalidValue {
        machine: String,
        field: &'static str,
        reason: String,
    },
}

// Result type alias for convenience
pub type ProvisionResult<T> = Result<T, ProvisionError>;

impl From<reqwest::Error> for ProvisionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            ProvisionError::Connection(err.to_string())
        } else {
            ProvisionError::Platform(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for SpecError {
    fn from(err: serde_yaml::Error) -> Self {
        SpecError::Malformed(err.to_string())
    }
}
