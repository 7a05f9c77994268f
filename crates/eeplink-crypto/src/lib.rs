//! Signature algorithms for I2P destinations
//!
//! A destination commits to one of six signature algorithms; this crate
//! provides a uniform sign/verify/keygen surface over all of them plus the
//! in-tree Red25519 implementation. Callers hold key material as plain
//! byte strings and select the algorithm with [`SigType`].

pub mod dsa;
pub mod ecdsa;
pub mod eddsa;
mod error;
pub mod red25519;
mod sigtype;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use error::{CryptoError, Result};
pub use sigtype::SigType;

/// Private key bytes that are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        SecretBytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}

/// A freshly generated signing key pair.
#[derive(Debug, Clone)]
pub struct Keypair {
    pub sig_type: SigType,
    pub public: Vec<u8>,
    pub private: SecretBytes,
}

/// Generate a key pair for the given algorithm.
pub fn generate(sig_type: SigType) -> Keypair {
    let (public, private) = match sig_type {
        SigType::DsaSha1 => dsa::generate(),
        SigType::EcdsaSha256P256 => ecdsa::p256_ops::generate(),
        SigType::EcdsaSha384P384 => ecdsa::p384_ops::generate(),
        SigType::EcdsaSha512P521 => ecdsa::p521_ops::generate(),
        SigType::Ed25519 => eddsa::generate(),
        SigType::RedDsaEd25519 => red25519::generate(),
    };
    Keypair {
        sig_type,
        public,
        private: SecretBytes::new(private),
    }
}

/// Sign `data` with the packet variant (no pre-hash beyond the
/// algorithm's own).
pub fn sign(sig_type: SigType, private: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match sig_type {
        SigType::DsaSha1 => dsa::sign(private, data),
        SigType::EcdsaSha256P256 => ecdsa::p256_ops::sign(private, data),
        SigType::EcdsaSha384P384 => ecdsa::p384_ops::sign(private, data),
        SigType::EcdsaSha512P521 => ecdsa::p521_ops::sign(private, data),
        SigType::Ed25519 => eddsa::sign(private, data),
        SigType::RedDsaEd25519 => red25519::sign(private, data),
    }
}

/// Verify a packet-variant signature.
pub fn verify(sig_type: SigType, public: &[u8], data: &[u8], sig: &[u8]) -> bool {
    match sig_type {
        SigType::DsaSha1 => dsa::verify(public, data, sig),
        SigType::EcdsaSha256P256 => ecdsa::p256_ops::verify(public, data, sig),
        SigType::EcdsaSha384P384 => ecdsa::p384_ops::verify(public, data, sig),
        SigType::EcdsaSha512P521 => ecdsa::p521_ops::verify(public, data, sig),
        SigType::Ed25519 => eddsa::verify(public, data, sig),
        SigType::RedDsaEd25519 => red25519::verify(public, data, sig),
    }
}

/// Sign `data` with the payload variant: DSA-SHA1 destinations pre-hash
/// the payload with SHA-256, every other algorithm signs it directly.
pub fn sign_payload(sig_type: SigType, private: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match sig_type {
        SigType::DsaSha1 => dsa::sign(private, &Sha256::digest(data)),
        _ => sign(sig_type, private, data),
    }
}

/// Verify a payload-variant signature.
pub fn verify_payload(sig_type: SigType, public: &[u8], data: &[u8], sig: &[u8]) -> bool {
    match sig_type {
        SigType::DsaSha1 => dsa::verify(public, &Sha256::digest(data), sig),
        _ => verify(sig_type, public, data, sig),
    }
}
