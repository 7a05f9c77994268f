//! Ed25519 adapter
//!
//! The private key is the 32-byte seed; the public key is the compressed
//! curve point.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{CryptoError, Result};

pub const PUBKEY_LEN: usize = 32;
pub const PRIVKEY_LEN: usize = 32;
pub const SIG_LEN: usize = 64;

pub fn generate() -> (Vec<u8>, Vec<u8>) {
    let key = SigningKey::generate(&mut OsRng);
    (
        key.verifying_key().to_bytes().to_vec(),
        key.to_bytes().to_vec(),
    )
}

pub fn sign(private: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let seed: [u8; PRIVKEY_LEN] =
        private
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                algorithm: "EdDSA_SHA512_Ed25519",
                role: "private",
                expected: PRIVKEY_LEN,
                got: private.len(),
            })?;
    let key = SigningKey::from_bytes(&seed);
    Ok(key.sign(data).to_bytes().to_vec())
}

pub fn verify(public: &[u8], data: &[u8], sig: &[u8]) -> bool {
    let public: [u8; PUBKEY_LEN] = match public.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let key = match VerifyingKey::from_bytes(&public) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig = match Signature::from_slice(sig) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    key.verify(data, &sig).is_ok()
}
