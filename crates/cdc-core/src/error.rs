use crate::ValidationReport;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {}", .0.failed_step_names().join(", "))]
    Validation(ValidationReport),

    #[error("Registration error ({kind}): {message}")]
    Registration {
        kind: RegistrationFailure,
        message: String,
    },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    pub fn registration(kind: RegistrationFailure, message: impl Into<String>) -> Self {
        Self::Registration {
            kind,
            message: message.into(),
        }
    }
}

/// Why the capture service refused a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationFailure {
    /// The capture service could not reach the source database (or we could not reach it)
    Connectivity,
    /// The source database rejected the credentials
    Credentials,
    /// Any other rejection
    Rejected,
}

impl fmt::Display for RegistrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connectivity => "connectivity",
            Self::Credentials => "credentials",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}
