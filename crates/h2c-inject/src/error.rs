//! Error types for the injection planner

use crate::pki::PkiError;

/// Planner Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Planner errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("certificate error: {0}")]
    Pki(#[from] PkiError),

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
