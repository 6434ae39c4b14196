use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indexer::IndexError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("template is missing required placeholder {{{0}}}")]
    MissingPlaceholder(String),

    #[error("conflicting inputs: {0}")]
    ConflictingInputs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unknown tag '{tag}' (available: {})", format_candidates(.candidates))]
    UnknownTag { tag: String, candidates: Vec<String> },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("malformed module: {0}")]
    MalformedModule(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".to_string()
    } else {
        candidates.join(", ")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable error classification shared by the HTTP layer and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidName,
    Validation,
    MalformedTemplate,
    MissingPlaceholder,
    ConflictingInputs,
    NotFound,
    AlreadyExists,
    Conflict,
    UnknownTag,
    UpstreamUnavailable,
    MalformedModule,
    StorageError,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidName => "invalid_name",
            Self::Validation => "validation",
            Self::MalformedTemplate => "malformed_template",
            Self::MissingPlaceholder => "missing_placeholder",
            Self::ConflictingInputs => "conflicting_inputs",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Conflict => "conflict",
            Self::UnknownTag => "unknown_tag",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::MalformedModule => "malformed_module",
            Self::StorageError => "storage_error",
            Self::Internal => "internal",
        }
    }

    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidName
            | Self::Validation
            | Self::MalformedTemplate
            | Self::MissingPlaceholder
            | Self::ConflictingInputs => 400,
            Self::NotFound | Self::UnknownTag => 404,
            Self::AlreadyExists | Self::Conflict => 409,
            Self::MalformedModule => 422,
            Self::UpstreamUnavailable => 502,
            Self::StorageError | Self::Internal => 500,
        }
    }

    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::InvalidName
            | Self::Validation
            | Self::MalformedTemplate
            | Self::MissingPlaceholder
            | Self::ConflictingInputs => 2,
            Self::NotFound | Self::UnknownTag => 3,
            Self::AlreadyExists | Self::Conflict => 4,
            Self::UpstreamUnavailable => 5,
            Self::StorageError => 6,
            Self::MalformedModule => 7,
            Self::Internal => 1,
        }
    }

    /// Only upstream failures are worth retrying by the caller.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::UpstreamUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::Validation(_) => ErrorKind::Validation,
            Self::MalformedTemplate(_) => ErrorKind::MalformedTemplate,
            Self::MissingPlaceholder(_) => ErrorKind::MissingPlaceholder,
            Self::ConflictingInputs(_) => ErrorKind::ConflictingInputs,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::UnknownTag { .. } => ErrorKind::UnknownTag,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::MalformedModule(_) => ErrorKind::MalformedModule,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::Database(_) | Self::Io(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
            Self::Index(e) => e.kind,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Translates constraint violations into `AlreadyExists`, everything else stays a
    /// database error.
    pub(crate) fn from_insert(err: rusqlite::Error, what: impl Into<String>) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::AlreadyExists(what.into())
            }
            other => Self::Database(other),
        }
    }
}
