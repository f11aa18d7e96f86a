//! Error taxonomy for the engine.

use crate::{CollectionName, RecordId, Version};
use thiserror::Error;

/// All errors the engine can return.
///
/// Every failure is a distinct enumerated kind; the host boundary exposes
/// [`Error::kind`] alongside the human-readable message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown collection: {0}")]
    UnknownCollection(CollectionName),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("record not found: {collection}/{id}")]
    NotFound {
        collection: CollectionName,
        id: RecordId,
    },

    #[error("record already exists: {collection}/{id}")]
    AlreadyExists {
        collection: CollectionName,
        id: RecordId,
    },

    #[error("version mismatch: expected {expected}, actual {actual}")]
    VersionMismatch { expected: Version, actual: Version },

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("unsupported snapshot format: {0}")]
    UnsupportedFormat(u32),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind, as exposed over the host boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownCollection(_) => "unknownCollection",
            Error::MissingRequiredField(_) => "missingRequiredField",
            Error::TypeMismatch { .. } => "typeMismatch",
            Error::NotFound { .. } => "notFound",
            Error::AlreadyExists { .. } => "alreadyExists",
            Error::VersionMismatch { .. } => "versionMismatch",
            Error::Malformed(_) => "malformed",
            Error::UnsupportedFormat(_) => "unsupportedFormat",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
