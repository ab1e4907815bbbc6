use serde::Serialize;
use thiserror::Error;

/// Stable error categories shared by every game mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Unauthorized,
    Conflict,
    ExhaustedResource,
    StateViolation,
    NotAvailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not allowed: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("exhausted: {0}")]
    ExhaustedResource(String),
    #[error("invalid state: {0}")]
    StateViolation(String),
    #[error("not available: {0}")]
    NotAvailable(String),
    #[error("internal error: {0}")]
    Internal(String),
    /// Transport failure talking to the backing store. The only retryable error.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DomainError::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        DomainError::InvalidInput(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        DomainError::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DomainError::Conflict(message.into())
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        DomainError::ExhaustedResource(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        DomainError::StateViolation(message.into())
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        DomainError::NotAvailable(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DomainError::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::InvalidInput(_) => ErrorKind::InvalidInput,
            DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::ExhaustedResource(_) => ErrorKind::ExhaustedResource,
            DomainError::StateViolation(_) => ErrorKind::StateViolation,
            DomainError::NotAvailable(_) => ErrorKind::NotAvailable,
            DomainError::Internal(_) | DomainError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// The detail text without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            DomainError::NotFound(m)
            | DomainError::InvalidInput(m)
            | DomainError::Unauthorized(m)
            | DomainError::Conflict(m)
            | DomainError::ExhaustedResource(m)
            | DomainError::StateViolation(m)
            | DomainError::NotAvailable(m)
            | DomainError::Internal(m)
            | DomainError::Storage(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Storage(_))
    }
}

impl From<mongodb::error::Error> for DomainError {
    fn from(err: mongodb::error::Error) -> Self {
        DomainError::Storage(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for DomainError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        DomainError::Internal(format!("failed to encode document: {}", err))
    }
}

impl From<mongodb::bson::de::Error> for DomainError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        DomainError::Internal(format!("failed to decode document: {}", err))
    }
}

impl From<redis::RedisError> for DomainError {
    fn from(err: redis::RedisError) -> Self {
        DomainError::Storage(err.to_string())
    }
}
