//! Error types for client sessions

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Session rejected by the router: {0}")]
    SessionRejected(String),

    #[error("Subsession rejected by the router: {0}")]
    SubsessionRejected(String),

    #[error("Stream rejected by the router: {0}")]
    StreamRejected(String),

    #[error("Session is not ready")]
    NotReady,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Message delivery failed with status {status}")]
    MessageFailed { status: u8 },

    #[error("Name lookup failed: {0}")]
    LookupFailed(String),

    #[error("Name lookup timed out")]
    LookupTimeout,

    #[error(transparent)]
    Protocol(#[from] eeplink_protocol::ProtocolError),

    #[error(transparent)]
    Crypto(#[from] eeplink_crypto::CryptoError),

    #[error(transparent)]
    Stream(#[from] eeplink_streaming::StreamError),
}
