use thiserror::Error;

/// A chat session parameter that failed its declared bound.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("model identifier must not be empty")]
    EmptyModel,

    #[error("max_tokens {value} outside allowed range {min}..={max}")]
    MaxTokensOutOfRange { value: u32, min: u32, max: u32 },

    #[error("{field} {value} outside allowed range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("at most {max} stop sequences are allowed, got {count}")]
    TooManyStopSequences { count: usize, max: usize },
}

/// Coarse classification of a [`StoreError`], for callers that map failures
/// to exit codes or messages without inspecting payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    NotFound,
    Conflict,
    ValidationFailed,
    ReferentialViolation,
    Storage,
    Cancelled,
}

/// Errors returned by every store, handle and repository operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid chat session parameters: {0}")]
    ValidationFailed(#[from] ParameterError),

    #[error("invalid chat exchange: {0}")]
    InvalidExchange(String),

    #[error("referential violation: {0}")]
    ReferentialViolation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound(_) => StoreErrorKind::NotFound,
            StoreError::Conflict(_) => StoreErrorKind::Conflict,
            StoreError::ValidationFailed(_) | StoreError::InvalidExchange(_) => {
                StoreErrorKind::ValidationFailed
            }
            StoreError::ReferentialViolation(_) => StoreErrorKind::ReferentialViolation,
            StoreError::Storage(_) => StoreErrorKind::Storage,
            StoreError::Cancelled | StoreError::DeadlineExceeded => StoreErrorKind::Cancelled,
        }
    }

    /// True for errors that mean "the row is not there (for this caller)".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
