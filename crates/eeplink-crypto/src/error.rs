//! Error types for signature operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unknown signature type code: {0}")]
    UnknownSigType(u16),

    #[error("Invalid {role} key length for {algorithm}: expected {expected}, got {got}")]
    InvalidKeyLength {
        algorithm: &'static str,
        role: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid key material for {0}")]
    InvalidKey(&'static str),

    #[error("Invalid signature length: expected {expected}, got {got}")]
    InvalidSignatureLength { expected: usize, got: usize },
}
