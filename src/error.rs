//! Error types shared by the store, the connection factory and the relay.

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fieldless classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Configuration,
    Authentication,
    Connection,
    Io,
    Integrity,
    Storage,
}

/// Errors reported by sshelf operations.
///
/// None of these are retried automatically anywhere in the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid profile fields, or an empty update.
    #[error("Invalid profile: {0}")]
    Validation(String),

    /// No profile with the given id.
    #[error("No SSH server with ID {0} exists")]
    NotFound(i64),

    /// The profile has no usable credential.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The server rejected the credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Unreachable host, timeout, handshake or transport failure.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Terminal or channel I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Storage constraint violation.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Any other storage failure.
    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),
}

impl Error {
    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Io(_) => ErrorKind::Io,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Integrity(msg.clone().unwrap_or_else(|| code.to_string()))
            }
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Error::NotFound(3).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::Validation("x".to_string()).kind(),
            ErrorKind::Validation
        );
        let io_err: Error = io::Error::other("boom").into();
        assert_eq!(io_err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound(42);
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_constraint_violation_maps_to_integrity() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL),
            Some("NOT NULL constraint failed: ssh_servers.hostname".to_string()),
        );
        let err = Error::from(raw);
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.to_string().contains("NOT NULL"));
    }
}
