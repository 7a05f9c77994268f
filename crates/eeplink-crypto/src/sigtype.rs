//! Signature algorithm registry
//!
//! Each I2P destination commits to one signature algorithm for its whole
//! lifetime. The type code travels in the destination's key certificate;
//! the key and signature lengths are fixed per algorithm and drive the
//! destination byte layout.

use crate::error::{CryptoError, Result};

/// A signature algorithm supported for destination keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigType {
    /// Legacy DSA over SHA-1 (the original "ElGamal+DSA" destinations)
    DsaSha1,
    /// ECDSA over NIST P-256 with SHA-256
    EcdsaSha256P256,
    /// ECDSA over NIST P-384 with SHA-384
    EcdsaSha384P384,
    /// ECDSA over NIST P-521 with SHA-512
    EcdsaSha512P521,
    /// Ed25519 (the modern default)
    Ed25519,
    /// RedDSA over the Ed25519 curve (Red25519)
    RedDsaEd25519,
}

impl SigType {
    /// All supported types, in code order.
    pub const ALL: [SigType; 6] = [
        SigType::DsaSha1,
        SigType::EcdsaSha256P256,
        SigType::EcdsaSha384P384,
        SigType::EcdsaSha512P521,
        SigType::Ed25519,
        SigType::RedDsaEd25519,
    ];

    /// The wire code used in key certificates.
    pub fn code(&self) -> u16 {
        match self {
            SigType::DsaSha1 => 0,
            SigType::EcdsaSha256P256 => 1,
            SigType::EcdsaSha384P384 => 2,
            SigType::EcdsaSha512P521 => 3,
            SigType::Ed25519 => 7,
            SigType::RedDsaEd25519 => 11,
        }
    }

    /// Look up a type by its wire code.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(SigType::DsaSha1),
            1 => Ok(SigType::EcdsaSha256P256),
            2 => Ok(SigType::EcdsaSha384P384),
            3 => Ok(SigType::EcdsaSha512P521),
            7 => Ok(SigType::Ed25519),
            11 => Ok(SigType::RedDsaEd25519),
            other => Err(CryptoError::UnknownSigType(other)),
        }
    }

    /// Public key length in bytes.
    ///
    /// ECDSA public keys are stored without the SEC1 uncompressed-point
    /// prefix, so they are exactly two field elements.
    pub fn pubkey_len(&self) -> usize {
        match self {
            SigType::DsaSha1 => 128,
            SigType::EcdsaSha256P256 => 64,
            SigType::EcdsaSha384P384 => 96,
            SigType::EcdsaSha512P521 => 132,
            SigType::Ed25519 => 32,
            SigType::RedDsaEd25519 => 32,
        }
    }

    /// Private key length in bytes.
    pub fn privkey_len(&self) -> usize {
        match self {
            SigType::DsaSha1 => 20,
            SigType::EcdsaSha256P256 => 32,
            SigType::EcdsaSha384P384 => 48,
            SigType::EcdsaSha512P521 => 66,
            SigType::Ed25519 => 32,
            SigType::RedDsaEd25519 => 32,
        }
    }

    /// Signature length in bytes.
    pub fn sig_len(&self) -> usize {
        match self {
            SigType::DsaSha1 => 40,
            SigType::EcdsaSha256P256 => 64,
            SigType::EcdsaSha384P384 => 96,
            SigType::EcdsaSha512P521 => 132,
            SigType::Ed25519 => 64,
            SigType::RedDsaEd25519 => 64,
        }
    }

    /// Human-readable algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            SigType::DsaSha1 => "DSA_SHA1",
            SigType::EcdsaSha256P256 => "ECDSA_SHA256_P256",
            SigType::EcdsaSha384P384 => "ECDSA_SHA384_P384",
            SigType::EcdsaSha512P521 => "ECDSA_SHA512_P521",
            SigType::Ed25519 => "EdDSA_SHA512_Ed25519",
            SigType::RedDsaEd25519 => "RedDSA_SHA512_Ed25519",
        }
    }
}

impl std::fmt::Display for SigType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_roundtrip() {
        for ty in SigType::ALL {
            assert_eq!(SigType::from_code(ty.code()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_code_rejected() {
        assert_eq!(SigType::from_code(4), Err(CryptoError::UnknownSigType(4)));
        assert_eq!(
            SigType::from_code(65535),
            Err(CryptoError::UnknownSigType(65535))
        );
    }

    #[test]
    fn key_length_table() {
        assert_eq!(SigType::DsaSha1.pubkey_len(), 128);
        assert_eq!(SigType::DsaSha1.privkey_len(), 20);
        assert_eq!(SigType::DsaSha1.sig_len(), 40);
        assert_eq!(SigType::EcdsaSha512P521.pubkey_len(), 132);
        assert_eq!(SigType::EcdsaSha512P521.privkey_len(), 66);
        assert_eq!(SigType::Ed25519.sig_len(), 64);
        assert_eq!(SigType::RedDsaEd25519.pubkey_len(), 32);
    }
}
