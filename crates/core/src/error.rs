//! Boundary validation errors.

use thiserror::Error;

/// Result type for boundary parsing/validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Input rejected before it reaches any evaluation path.
///
/// These never describe an authorization outcome; a well-formed request that is
/// not permitted yields a denied decision instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed resource code '{0}'")]
    MalformedResourceCode(String),

    #[error("malformed resource pattern '{0}'")]
    MalformedResourcePattern(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("unknown data scope '{0}'")]
    UnknownScope(String),

    #[error("unknown security level '{0}'")]
    UnknownSecurityLevel(String),

    #[error("malformed permission code '{0}'")]
    MalformedPermissionCode(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("no conditions to evaluate")]
    EmptyConditions,

    #[error("batch of {requested} requests exceeds limit of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },
}

impl ValidationError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
