use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service-level failures. Faults raised by the executed program are never
/// reported through this type; they are captured in a `StageResult`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed to decode '{file}' as {encoding}: {reason}")]
    Decode {
        file: String,
        encoding: &'static str,
        reason: String,
    },

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Timeout after {0} ms before the run stage started")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    HostInternal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, serializable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigurationError,
    NotFound,
    AlreadyExists,
    DecodeError,
    UnsupportedLanguage,
    InvalidInput,
    LimitExceeded,
    Timeout,
    HostInternal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::ConfigurationError,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Decode { .. } => ErrorKind::DecodeError,
            Error::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::LimitExceeded(_) => ErrorKind::LimitExceeded,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::HostInternal(_) | Error::Io(_) => ErrorKind::HostInternal,
        }
    }

    pub(crate) fn session_not_found(id: &str) -> Self {
        Error::NotFound(format!("session '{}'", id))
    }

    pub(crate) fn file_not_found(name: &str) -> Self {
        Error::NotFound(format!("file '{}'", name))
    }
}

/// Wire shape of an error: `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<Error> for ErrorResponse {
    fn from(error: Error) -> Self {
        Self::from(&error)
    }
}
