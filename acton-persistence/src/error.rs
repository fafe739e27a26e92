//! Crate-level error type
//!
//! Repository calls return [`RepositoryError`](crate::repository::RepositoryError)
//! directly; this type covers the surrounding plumbing (configuration,
//! database bootstrap, I/O) and wraps repository errors when both meet.

use thiserror::Error;

use crate::repository::RepositoryError;

/// Result type alias using the crate's error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Repository operation error
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Database bootstrap error (pool creation)
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the failed call may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Repository(err) => err.is_retriable(),
            _ => false,
        }
    }
}

// Manual From implementation for the boxed variant
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}
