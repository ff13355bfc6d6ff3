use thiserror::Error;

use strongroom_core::ElasticKeyId;
use strongroom_encryption::EncryptionError;

/// Every failure the barrier surfaces. Messages carry ids and reasons only,
/// never key material or envelope bytes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("barrier is sealed")]
    ServiceSealed,
    #[error("invalid unseal share: {0}")]
    InvalidShare(String),
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("tenant mismatch")]
    TenantMismatch,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("elastic key {0} is disabled")]
    KeyDisabled(ElasticKeyId),
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("barrier has not been initialized")]
    NotInitialized,
    #[error("barrier is already initialized")]
    AlreadyInitialized,
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl BarrierError {
    /// Transient errors a caller may retry with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BarrierError::ServiceSealed
                | BarrierError::ConcurrentModification(_)
                | BarrierError::StoreUnavailable(_)
        )
    }
}

impl From<EncryptionError> for BarrierError {
    fn from(err: EncryptionError) -> BarrierError {
        match err {
            EncryptionError::AuthenticationFailure => BarrierError::AuthenticationFailure,
            EncryptionError::InvalidShare(reason) => BarrierError::InvalidShare(reason.to_string()),
            EncryptionError::UnsupportedOperation { .. } => {
                BarrierError::UnsupportedOperation(err.to_string())
            }
            other => BarrierError::Crypto(other.to_string()),
        }
    }
}
