//! The engine's error taxonomy.
//!
//! Every fallible entry point returns [`Result<T>`]. Kinds mirror exactly
//! the taxonomy named in the engine's design: a reader or writer never
//! needs to downcast an opaque `anyhow::Error` to decide how to react to a
//! failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid database file: {0}")]
    InvalidFile(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: u32, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto verification failed: {0}")]
    CryptoVerifyFailed(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("constraint failure: {0}")]
    ConstraintFailure(String),

    #[error("not found")]
    NotFound,

    #[error("row deserialization error: {0}")]
    Row(#[from] serde::de::value::Error),
}

impl Error {
    pub(crate) fn corrupt(page: u32, reason: impl Into<String>) -> Self {
        Error::CorruptPage {
            page,
            reason: reason.into(),
        }
    }
}
