//! Error types for lura operations.

use std::sync::Arc;

use thiserror::Error;

use crate::pacing::EngineState;

/// Errors that can occur during ingestion, addressing, pacing or library access.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("entry not found in archive: {0}")]
    EntryNotFound(String),

    #[error("missing manifest: {0}")]
    MissingManifest(String),

    #[error("invalid spine: {0}")]
    InvalidSpine(String),

    #[error("book has no readable content")]
    EmptyBook,

    #[error("malformed markup in {entry}: {reason}")]
    MalformedMarkup { entry: String, reason: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid highlight: {0}")]
    InvalidHighlight(String),

    #[error("cannot {action} while the engine is {state:?}")]
    EngineState {
        action: &'static str,
        state: EngineState,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("the default folder cannot be deleted")]
    DefaultFolder,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A failure shared between several waiters of the same parse.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    /// Unwrap [`Error::Shared`] layers down to the original failure.
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Whether this error means the archive can never produce a book.
    pub fn is_ingestion_failure(&self) -> bool {
        matches!(
            self.root(),
            Error::CorruptArchive(_)
                | Error::EntryNotFound(_)
                | Error::MissingManifest(_)
                | Error::InvalidSpine(_)
                | Error::EmptyBook
                | Error::MalformedMarkup { .. }
        )
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::CorruptArchive(e.to_string()),
            zip::result::ZipError::FileNotFound => Error::EntryNotFound(err.to_string()),
            other => Error::CorruptArchive(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
