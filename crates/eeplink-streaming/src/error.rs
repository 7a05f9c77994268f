//! Error types for stream operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream is not connected")]
    NotConnected,

    #[error("Stream is closed")]
    Closed,

    #[error("Packet resend failed")]
    ResendFailed,

    #[error("Stream was reset by the remote")]
    Reset,

    #[error(transparent)]
    Protocol(#[from] eeplink_protocol::ProtocolError),
}
