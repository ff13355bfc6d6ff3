use thiserror::Error;

use crate::KeyAlgorithm;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    /// Tag verification failed. Treated as tamper or corruption.
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("unsupported wrap algorithm id {0}")]
    UnsupportedAlgorithm(u16),
    #[error("invalid key length, expected {expected} bytes got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("{operation} is not supported by {algorithm} keys")]
    UnsupportedOperation {
        operation: &'static str,
        algorithm: KeyAlgorithm,
    },
    #[error("invalid unseal share: {0}")]
    InvalidShare(&'static str),
}
