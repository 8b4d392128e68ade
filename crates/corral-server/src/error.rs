use corral_core::engine::EngineError;
use corral_core::policy::PolicyError;
use corral_core::token::TokenError;
use corral_storage::{CacheError, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unauthorized access")]
    Authorization,

    #[error("requested actions exceed the caller's own policy")]
    HigherPolicyRank,

    #[error("entity not found")]
    NotFound,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("status already assigned")]
    StatusAlreadyAssigned,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            StorageError::Conflict(what) => ApiError::Conflict(what),
            StorageError::Internal(msg) => ApiError::Storage(msg),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::Authentication(err.to_string())
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::InvalidEntityType(kind) => ApiError::InvalidEntityType(kind),
            other => ApiError::Malformed(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            e @ EngineError::InvalidAction { .. } => ApiError::Malformed(e.to_string()),
            EngineError::StorageError(msg) => ApiError::Storage(msg),
        }
    }
}
