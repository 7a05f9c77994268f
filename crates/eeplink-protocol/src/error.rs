//! Error types for codec operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Truncated input: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("Invalid character in encoded string: {0:?}")]
    InvalidEncoding(char),

    #[error("Unknown certificate type: {0}")]
    UnknownCertificate(u8),

    #[error("Inconsistent destination lengths: {0}")]
    InconsistentDestination(String),

    #[error("Offline signatures are not supported")]
    OfflineSignature,

    #[error("Packet requires a signature but none is present")]
    MissingSignature,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Not a gzip frame")]
    NotGzip,

    #[error(transparent)]
    Crypto(#[from] eeplink_crypto::CryptoError),
}
