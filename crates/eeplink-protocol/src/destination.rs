//! Destination codec
//!
//! A destination is the long-lived identity peers are addressed by. On the
//! wire it is a packed blob with fixed offsets:
//!
//! - Bytes 0..384: a 256-byte crypto public key region (random padding in
//!   the modern form), then padding, then up to 128 bytes of signing
//!   public key, packed so the three parts total exactly 384 bytes.
//! - Byte 384: certificate type (NULL=0 or KEY=5)
//! - Bytes 385..387: certificate length (big-endian)
//! - KEY certificates only: signing key type (u16), crypto key type (u16),
//!   then whatever part of the signing key did not fit below offset 384.
//!
//! The NULL certificate is used exactly for DSA-SHA1 (the legacy
//! ElGamal+DSA pair); every other algorithm carries a KEY certificate.

use rand::RngCore;
use sha2::{Digest, Sha256};

use eeplink_crypto::{SecretBytes, SigType};

use crate::encoding::{b32_encode, b64_decode, b64_encode};
use crate::error::{ProtocolError, Result};
use crate::wire::{get_u16, need};

/// Size of the crypto public key region.
pub const CRYPTO_KEY_LEN: usize = 256;

/// Size of the packed key block preceding the certificate.
pub const KEYS_LEN: usize = 384;

/// Smallest possible destination (NULL certificate).
pub const MIN_LEN: usize = KEYS_LEN + 3;

const CERT_NULL: u8 = 0;
const CERT_KEY: u8 = 5;

/// Crypto key type advertised in KEY certificates (ElGamal-2048).
const CRYPTO_TYPE_ELGAMAL: u16 = 0;

/// A parsed destination, retaining its canonical byte form.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    bytes: Vec<u8>,
    sig_type: SigType,
    signing_public: Vec<u8>,
}

impl Destination {
    /// Assemble a destination from a signing public key, filling the
    /// crypto key region and padding with random bytes.
    pub fn new(sig_type: SigType, signing_public: &[u8]) -> Result<Self> {
        if signing_public.len() != sig_type.pubkey_len() {
            return Err(ProtocolError::InconsistentDestination(format!(
                "signing key for {} must be {} bytes, got {}",
                sig_type,
                sig_type.pubkey_len(),
                signing_public.len()
            )));
        }
        let signing_len = signing_public.len();
        let head = signing_len.min(KEYS_LEN - CRYPTO_KEY_LEN);
        let pad = KEYS_LEN - CRYPTO_KEY_LEN - head;

        let mut bytes = Vec::with_capacity(MIN_LEN + 4 + (signing_len - head));
        let mut region = vec![0u8; CRYPTO_KEY_LEN + pad];
        rand::rngs::OsRng.fill_bytes(&mut region);
        bytes.extend_from_slice(&region);
        bytes.extend_from_slice(&signing_public[..head]);

        if sig_type == SigType::DsaSha1 {
            bytes.push(CERT_NULL);
            bytes.extend_from_slice(&0u16.to_be_bytes());
        } else {
            let extra = signing_len - head;
            bytes.push(CERT_KEY);
            bytes.extend_from_slice(&((4 + extra) as u16).to_be_bytes());
            bytes.extend_from_slice(&sig_type.code().to_be_bytes());
            bytes.extend_from_slice(&CRYPTO_TYPE_ELGAMAL.to_be_bytes());
            bytes.extend_from_slice(&signing_public[head..]);
        }

        Ok(Destination {
            bytes,
            sig_type,
            signing_public: signing_public.to_vec(),
        })
    }

    /// Parse a destination from the front of `bytes`, returning it along
    /// with the number of bytes consumed.
    pub fn parse_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        need(bytes, MIN_LEN)?;
        let cert_type = bytes[KEYS_LEN];
        let cert_len = get_u16(bytes, KEYS_LEN + 1)? as usize;

        match cert_type {
            CERT_NULL => {
                if cert_len != 0 {
                    return Err(ProtocolError::InconsistentDestination(format!(
                        "NULL certificate with length {cert_len}"
                    )));
                }
                let sig_type = SigType::DsaSha1;
                let signing_public =
                    bytes[KEYS_LEN - sig_type.pubkey_len()..KEYS_LEN].to_vec();
                Ok((
                    Destination {
                        bytes: bytes[..MIN_LEN].to_vec(),
                        sig_type,
                        signing_public,
                    },
                    MIN_LEN,
                ))
            }
            CERT_KEY => {
                need(bytes, MIN_LEN + 4)?;
                let sig_type = SigType::from_code(get_u16(bytes, MIN_LEN)?)?;
                let signing_len = sig_type.pubkey_len();
                let extra = signing_len.saturating_sub(KEYS_LEN - CRYPTO_KEY_LEN);
                if cert_len != 4 + extra {
                    return Err(ProtocolError::InconsistentDestination(format!(
                        "KEY certificate for {sig_type} must have length {}, got {cert_len}",
                        4 + extra
                    )));
                }
                let total = MIN_LEN + cert_len;
                need(bytes, total)?;

                let head = signing_len - extra;
                let mut signing_public = Vec::with_capacity(signing_len);
                signing_public.extend_from_slice(&bytes[KEYS_LEN - head..KEYS_LEN]);
                signing_public.extend_from_slice(&bytes[MIN_LEN + 4..MIN_LEN + 4 + extra]);

                Ok((
                    Destination {
                        bytes: bytes[..total].to_vec(),
                        sig_type,
                        signing_public,
                    },
                    total,
                ))
            }
            other => Err(ProtocolError::UnknownCertificate(other)),
        }
    }

    /// Parse a destination occupying the whole of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (dest, used) = Self::parse_prefix(bytes)?;
        if used != bytes.len() {
            return Err(ProtocolError::InconsistentDestination(format!(
                "{} trailing bytes after destination",
                bytes.len() - used
            )));
        }
        Ok(dest)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        Self::parse(&b64_decode(s)?)
    }

    /// Canonical byte form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn sig_type(&self) -> SigType {
        self.sig_type
    }

    pub fn signing_public(&self) -> &[u8] {
        &self.signing_public
    }

    /// URL-safe Base64 string form (I2P alphabet, padded).
    pub fn to_base64(&self) -> String {
        b64_encode(&self.bytes)
    }

    /// SHA-256 of the canonical bytes.
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(&self.bytes).into()
    }

    /// The `<base32(sha256)>.b32.i2p` short name.
    pub fn short_name(&self) -> String {
        format!("{}.b32.i2p", b32_encode(&self.hash()))
    }

    /// Verify a packet-variant signature made by this destination.
    pub fn verify(&self, data: &[u8], sig: &[u8]) -> bool {
        eeplink_crypto::verify(self.sig_type, &self.signing_public, data, sig)
    }

    /// Verify a payload-variant signature (DSA-SHA1 pre-hashes with
    /// SHA-256) made by this destination.
    pub fn verify_payload(&self, data: &[u8], sig: &[u8]) -> bool {
        eeplink_crypto::verify_payload(self.sig_type, &self.signing_public, data, sig)
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("short_name", &self.short_name())
            .field("sig_type", &self.sig_type)
            .field("byte_len", &self.bytes.len())
            .finish()
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// A destination together with its signing private key.
#[derive(Clone)]
pub struct LocalDestination {
    destination: Destination,
    signing_private: SecretBytes,
}

impl LocalDestination {
    /// Generate a fresh identity with the given signature algorithm.
    pub fn generate(sig_type: SigType) -> Self {
        let pair = eeplink_crypto::generate(sig_type);
        let destination = Destination::new(sig_type, &pair.public)
            .expect("generated key length matches the registry");
        LocalDestination {
            destination,
            signing_private: pair.private,
        }
    }

    pub fn new(destination: Destination, signing_private: SecretBytes) -> Result<Self> {
        if signing_private.len() != destination.sig_type().privkey_len() {
            return Err(ProtocolError::InconsistentDestination(format!(
                "private key for {} must be {} bytes, got {}",
                destination.sig_type(),
                destination.sig_type().privkey_len(),
                signing_private.len()
            )));
        }
        Ok(LocalDestination {
            destination,
            signing_private,
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn sig_type(&self) -> SigType {
        self.destination.sig_type()
    }

    pub fn signing_private(&self) -> &SecretBytes {
        &self.signing_private
    }

    /// Packet-variant signature.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(eeplink_crypto::sign(
            self.sig_type(),
            self.signing_private.as_bytes(),
            data,
        )?)
    }

    /// Payload-variant signature (DSA-SHA1 pre-hashes with SHA-256).
    pub fn sign_payload(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(eeplink_crypto::sign_payload(
            self.sig_type(),
            self.signing_private.as_bytes(),
            data,
        )?)
    }

    /// The private-key blob handed to the router:
    /// `destination || zeroed crypto private key || signing private key`.
    pub fn private_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(
            self.destination.byte_len() + CRYPTO_KEY_LEN + self.signing_private.len(),
        );
        blob.extend_from_slice(self.destination.as_bytes());
        blob.extend_from_slice(&[0u8; CRYPTO_KEY_LEN]);
        blob.extend_from_slice(self.signing_private.as_bytes());
        blob
    }

    pub fn private_blob_base64(&self) -> String {
        b64_encode(&self.private_blob())
    }

    pub fn from_private_blob(bytes: &[u8]) -> Result<Self> {
        let (destination, used) = Destination::parse_prefix(bytes)?;
        let key_len = destination.sig_type().privkey_len();
        need(bytes, used + CRYPTO_KEY_LEN + key_len)?;
        let start = used + CRYPTO_KEY_LEN;
        let signing_private = SecretBytes::new(bytes[start..start + key_len].to_vec());
        Ok(LocalDestination {
            destination,
            signing_private,
        })
    }

    pub fn from_private_base64(s: &str) -> Result<Self> {
        Self::from_private_blob(&b64_decode(s)?)
    }
}

impl std::fmt::Debug for LocalDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDestination")
            .field("short_name", &self.destination.short_name())
            .field("sig_type", &self.destination.sig_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_length_table() {
        let expect = [
            (SigType::DsaSha1, 387),
            (SigType::EcdsaSha256P256, 391),
            (SigType::EcdsaSha384P384, 391),
            (SigType::EcdsaSha512P521, 395),
            (SigType::Ed25519, 391),
            (SigType::RedDsaEd25519, 391),
        ];
        for (ty, len) in expect {
            let local = LocalDestination::generate(ty);
            assert_eq!(local.destination().byte_len(), len, "{ty}");
        }
    }

    #[test]
    fn parse_roundtrip_all_types() {
        for ty in SigType::ALL {
            let local = LocalDestination::generate(ty);
            let dest = local.destination();
            let parsed = Destination::parse(dest.as_bytes()).unwrap();
            assert_eq!(parsed.as_bytes(), dest.as_bytes(), "{ty}");
            assert_eq!(parsed.sig_type(), ty);
            assert_eq!(parsed.signing_public(), dest.signing_public());
        }
    }

    #[test]
    fn base64_roundtrip() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let dest = local.destination();
        let encoded = dest.to_base64();
        let parsed = Destination::from_base64(&encoded).unwrap();
        assert_eq!(parsed.as_bytes(), dest.as_bytes());
    }

    #[test]
    fn short_name_is_base32_of_hash() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let dest = local.destination();
        let name = dest.short_name();
        assert!(name.ends_with(".b32.i2p"));
        assert_eq!(name, format!("{}.b32.i2p", b32_encode(&dest.hash())));
        assert_eq!(name, name.to_lowercase());
        // 32 bytes of hash -> 52 base32 characters
        assert_eq!(name.len(), 52 + ".b32.i2p".len());
    }

    #[test]
    fn truncated_input_rejected() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let bytes = local.destination().as_bytes();
        assert!(Destination::parse(&bytes[..386]).is_err());
        assert!(Destination::parse(&bytes[..389]).is_err());
    }

    #[test]
    fn inconsistent_cert_length_rejected() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let mut bytes = local.destination().as_bytes().to_vec();
        // claim a 7-byte certificate on an Ed25519 destination
        bytes[386] = 7;
        assert!(Destination::parse(&bytes).is_err());
    }

    #[test]
    fn unknown_certificate_rejected() {
        let local = LocalDestination::generate(SigType::DsaSha1);
        let mut bytes = local.destination().as_bytes().to_vec();
        bytes[KEYS_LEN] = 3;
        assert!(matches!(
            Destination::parse(&bytes),
            Err(ProtocolError::UnknownCertificate(3))
        ));
    }

    #[test]
    fn sign_verify_through_destination() {
        for ty in SigType::ALL {
            let local = LocalDestination::generate(ty);
            let sig = local.sign(b"helper surface").unwrap();
            assert!(local.destination().verify(b"helper surface", &sig), "{ty}");

            let sig = local.sign_payload(b"payload surface").unwrap();
            assert!(
                local.destination().verify_payload(b"payload surface", &sig),
                "{ty}"
            );
        }
    }

    #[test]
    fn private_blob_roundtrip() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let blob = local.private_blob();
        assert_eq!(blob.len(), 391 + 256 + 32);
        let restored = LocalDestination::from_private_blob(&blob).unwrap();
        assert_eq!(
            restored.destination().as_bytes(),
            local.destination().as_bytes()
        );
        assert_eq!(
            restored.signing_private().as_bytes(),
            local.signing_private().as_bytes()
        );

        let restored = LocalDestination::from_private_base64(&local.private_blob_base64()).unwrap();
        assert_eq!(
            restored.destination().as_bytes(),
            local.destination().as_bytes()
        );
    }
}
