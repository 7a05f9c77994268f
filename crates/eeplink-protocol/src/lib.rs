//! Wire formats for I2P client applications
//!
//! This crate holds the codecs shared by both router-facing clients:
//! destination parsing and construction, the signed/raw datagram
//! envelopes with their gzip framing, and the stream-layer packet format.

pub mod datagram;
pub mod destination;
pub mod encoding;
mod error;
pub mod packet;
pub mod wire;

pub use destination::{Destination, LocalDestination};
pub use error::{ProtocolError, Result};
pub use packet::{Packet, PacketFlags};
