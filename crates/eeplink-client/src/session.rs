//! Top-level session surface
//!
//! The two router-facing clients are mutually exclusive per session; this
//! wrapper picks one from the configuration so applications can stay
//! agnostic about which control channel carries their traffic.

use serde::{Deserialize, Serialize};

use eeplink_crypto::SigType;
use eeplink_protocol::LocalDestination;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::i2cp::I2cpSession;
use crate::sam::SamSession;

/// Which router protocol a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionMode {
    /// The text-line SAM bridge (port 7656/7655).
    #[default]
    SamBridge,
    /// The binary I2CP interface (port 7654).
    RouterControl,
}

/// A connected session of either flavor.
pub enum Session {
    Sam(SamSession),
    I2cp(I2cpSession),
}

impl Session {
    pub fn local_destination(&self) -> &LocalDestination {
        match self {
            Session::Sam(session) => session.local_destination(),
            Session::I2cp(session) => session.local_destination(),
        }
    }

    pub fn as_sam(&self) -> Option<&SamSession> {
        match self {
            Session::Sam(session) => Some(session),
            Session::I2cp(_) => None,
        }
    }

    pub fn as_i2cp(&self) -> Option<&I2cpSession> {
        match self {
            Session::Sam(_) => None,
            Session::I2cp(session) => Some(session),
        }
    }

    pub async fn close(&self) {
        match self {
            Session::Sam(session) => session.close().await,
            Session::I2cp(session) => session.close().await,
        }
    }
}

/// Connect a session in the given mode. SAM sessions are ready on
/// return; I2CP sessions become ready once
/// [`I2cpSession::wait_ready`] resolves.
pub async fn open_session(
    mode: SessionMode,
    config: SessionConfig,
    local: LocalDestination,
) -> Result<Session> {
    match mode {
        SessionMode::SamBridge => Ok(Session::Sam(SamSession::connect(config, local).await?)),
        SessionMode::RouterControl => Ok(Session::I2cp(I2cpSession::connect(config, local).await?)),
    }
}

/// Generate a fresh identity. Ed25519 unless the caller asks otherwise.
pub fn generate_destination(sig_type: Option<SigType>) -> LocalDestination {
    LocalDestination::generate(sig_type.unwrap_or(SigType::Ed25519))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_destination_is_ed25519() {
        let local = generate_destination(None);
        assert_eq!(local.sig_type(), SigType::Ed25519);
        assert_eq!(local.destination().byte_len(), 391);
        assert!(local.destination().short_name().ends_with(".b32.i2p"));
    }

    #[test]
    fn default_mode_is_sam() {
        assert_eq!(SessionMode::default(), SessionMode::SamBridge);
    }
}
