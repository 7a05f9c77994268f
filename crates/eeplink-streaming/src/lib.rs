//! Reliable ordered streams over unreliable I2P datagrams
//!
//! A packet-based stream layer: signed SYNC handshake with an anti-replay
//! proof, sequence numbers, cumulative-plus-selective acknowledgments,
//! bounded retransmission and ordered delivery. The engine is sans-IO;
//! the router-control client drives it and owns the timers.

mod error;
mod map;
mod stream;

pub use error::{Result, StreamError};
pub use map::{Routed, StreamMap};
pub use stream::{
    Stream, StreamActions, StreamEvent, StreamState, MAX_STREAM_ID, RESEND_CEILING,
    RESEND_INTERVAL,
};
