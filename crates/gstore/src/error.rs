//! Error types for the storage layer.
//!
//! This module defines the central [`Error`] enum shared by every backend. Each
//! variant maps onto a stable [`ErrorCode`], which is the only detail the remote
//! binding ever exposes to a peer.
//!
//! ## Error Cases
//! - `NotFound`: missing identifier, category, row or relation field.
//! - `InvalidSchema`: a record failed schema validation.
//! - `InvalidCategoryType`: creation was attempted in an ignored category.
//! - `InvalidCreationOperation` / `InvalidDeletionOperation`: the category is
//!   only reachable as another category's `Include` target.
//! - `InvalidIdentifier`: a name does not satisfy the SQL identifier grammar.
//! - `InvalidArgument`: a caller supplied a malformed argument (e.g. no `Id`).
//! - `NotImplemented`: the operation has no meaning for this cursor's backend.
//! - `Backend`: the relational engine failed; the original error is kept.

use core::fmt;

use serde::Serialize;

/// Boxed error from an underlying engine or driver.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for cursors, providers and the identifier pool.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid schema provided: {0}")]
    InvalidSchema(String),

    #[error("Invalid category type: {0}")]
    InvalidCategoryType(String),

    #[error("Invalid creation operation: {0}")]
    InvalidCreationOperation(String),

    #[error("Invalid deletion operation: {0}")]
    InvalidDeletionOperation(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),
}

impl Error {
    /// Wraps any engine error as [`Error::Backend`].
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Backend(err.into())
    }

    /// Returns the stable code for this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidSchema(_) => ErrorCode::InvalidSchema,
            Self::InvalidCategoryType(_) => ErrorCode::InvalidCategoryType,
            Self::InvalidCreationOperation(_) => ErrorCode::InvalidCreationOperation,
            Self::InvalidDeletionOperation(_) => ErrorCode::InvalidDeletionOperation,
            Self::InvalidIdentifier(_) => ErrorCode::InvalidIdentifier,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotImplemented(_) => ErrorCode::NotImplemented,
            Self::Backend(_) => ErrorCode::BackendError,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Stable, wire-safe error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidSchema,
    InvalidCategoryType,
    InvalidCreationOperation,
    InvalidDeletionOperation,
    InvalidIdentifier,
    InvalidArgument,
    InvalidSignature,
    NotImplemented,
    BackendError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidSchema => "INVALID_SCHEMA",
            Self::InvalidCategoryType => "INVALID_CATEGORY_TYPE",
            Self::InvalidCreationOperation => "INVALID_CREATION_OPERATION",
            Self::InvalidDeletionOperation => "INVALID_DELETION_OPERATION",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::BackendError => "BACKEND_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(Error::NotFound("x".into()).code().as_str(), "NOT_FOUND");
        assert_eq!(
            Error::InvalidDeletionOperation("x".into()).code().to_string(),
            "INVALID_DELETION_OPERATION"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::InvalidCategoryType).unwrap(),
            serde_json::json!("INVALID_CATEGORY_TYPE")
        );
    }

    #[test]
    fn backend_keeps_source() {
        let err = Error::backend("connection reset");
        assert_eq!(err.code(), ErrorCode::BackendError);
        assert!(core::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Backend error: connection reset");
    }
}
