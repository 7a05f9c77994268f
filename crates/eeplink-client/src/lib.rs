//! I2P client sessions over the SAM bridge and the I2CP router protocol
//!
//! Applications address peers by destination instead of IP. A session
//! binds one local destination to a router control channel and carries
//! three communication styles through named subsessions: reliable
//! ordered streams, signed repliable datagrams and raw datagrams.
//!
//! Two mutually exclusive clients are provided. [`sam::SamSession`]
//! speaks the text-line bridge protocol and lets the router run the
//! stream layer; [`i2cp::I2cpSession`] speaks the binary router protocol
//! and runs the in-crate streaming engine and leaseset construction.

pub mod config;
mod error;
pub mod events;
pub mod i2cp;
mod lookup;
pub mod sam;
mod session;
mod shutdown;

pub use config::SessionConfig;
pub use error::{ClientError, Result};
pub use events::{ReceivedDatagram, SubsessionStyle};
pub use session::{generate_destination, open_session, Session, SessionMode};
pub use shutdown::ShutdownCoordinator;

pub use eeplink_crypto::SigType;
pub use eeplink_protocol::{Destination, LocalDestination};
