use thiserror::Error;

/// Error taxonomy for the booking/payment core.
///
/// Validation and conflict errors are raised before or inside a ledger
/// transaction and carry no side effects; external-service and consistency
/// errors abort the enclosing transaction and, when raised from a job handler,
/// trigger the scheduler's retry policy.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("external service error: {0}")]
    ExternalService(String),
    #[error("consistency error: {0}")]
    Consistency(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Only external-service failures are transient; everything else is a
    /// deterministic rejection and retrying would just repeat it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
