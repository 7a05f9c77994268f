//! RedDSA over Ed25519 (Red25519)
//!
//! A randomized Schnorr-style signature on the Ed25519 curve, used by
//! destinations with signature type 11. Unlike Ed25519 the nonce is not
//! derived deterministically: each signature mixes 80 fresh random bytes,
//! so two signatures over the same message differ.
//!
//! Keys are interchangeable with Ed25519 key material: the private scalar
//! is derived from a 32-byte seed exactly like Ed25519 (SHA-512, first
//! half, clamp) and the public key is the same compressed point.
//!
//! The `S` component is serialized little-endian.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::error::{CryptoError, Result};

pub const PUBKEY_LEN: usize = 32;
pub const PRIVKEY_LEN: usize = 32;
pub const SIG_LEN: usize = 64;

/// Domain separator for the hash-to-scalar function.
const HASH_PERSONALIZATION: &[u8] = b"I2P_Red25519H(x)";

/// Random prefix length mixed into each signature.
const RANDOMIZER_LEN: usize = 80;

/// `H*(p1, p2, msg)`: SHA-512 of the personalization string, both
/// prefixes, the two low bytes of the message length, and the message,
/// reduced mod the group order.
fn hash_to_scalar(prefix1: &[u8], prefix2: &[u8], msg: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(HASH_PERSONALIZATION);
    hasher.update(prefix1);
    hasher.update(prefix2);
    hasher.update([(msg.len() & 0xff) as u8, ((msg.len() >> 8) & 0xff) as u8]);
    hasher.update(msg);
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Derive the private scalar bytes from a 32-byte seed, Ed25519 style:
/// first half of SHA-512(seed), clamped.
pub fn derive_private(seed: &[u8; 32]) -> [u8; 32] {
    let digest: [u8; 64] = Sha512::digest(seed).into();
    let mut scalar: [u8; 32] = digest[..32].try_into().expect("fixed split");
    scalar[0] &= 248;
    scalar[31] &= 63;
    scalar[31] |= 64;
    scalar
}

/// Compute the public key for a (clamped) private scalar.
pub fn public_from_private(private: &[u8; 32]) -> [u8; 32] {
    let sk = Scalar::from_bytes_mod_order(*private);
    EdwardsPoint::mul_base(&sk).compress().to_bytes()
}

pub fn generate() -> (Vec<u8>, Vec<u8>) {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let private = derive_private(&seed);
    let public = public_from_private(&private);
    (public.to_vec(), private.to_vec())
}

pub fn sign(private: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
    let private: [u8; PRIVKEY_LEN] =
        private
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                algorithm: "RedDSA_SHA512_Ed25519",
                role: "private",
                expected: PRIVKEY_LEN,
                got: private.len(),
            })?;
    let sk = Scalar::from_bytes_mod_order(private);
    let vk_bytes = EdwardsPoint::mul_base(&sk).compress().to_bytes();

    let mut randomizer = [0u8; RANDOMIZER_LEN];
    OsRng.fill_bytes(&mut randomizer);

    let r = hash_to_scalar(&randomizer, &vk_bytes, msg);
    let big_r = EdwardsPoint::mul_base(&r).compress().to_bytes();
    let c = hash_to_scalar(&big_r, &vk_bytes, msg);
    let s = r + c * sk;

    let mut sig = Vec::with_capacity(SIG_LEN);
    sig.extend_from_slice(&big_r);
    sig.extend_from_slice(&s.to_bytes());
    Ok(sig)
}

pub fn verify(public: &[u8], msg: &[u8], sig: &[u8]) -> bool {
    let public: [u8; PUBKEY_LEN] = match public.try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if sig.len() != SIG_LEN {
        return false;
    }
    let r_bytes: [u8; 32] = sig[..32].try_into().expect("fixed split");
    let s_bytes: [u8; 32] = sig[32..].try_into().expect("fixed split");

    let big_r = match CompressedEdwardsY(r_bytes).decompress() {
        Some(point) => point,
        None => return false,
    };
    // non-canonical S (>= group order) is rejected outright
    let s = match Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) {
        Some(s) => s,
        None => return false,
    };
    let vk = match CompressedEdwardsY(public).decompress() {
        Some(point) => point,
        None => return false,
    };

    let c = hash_to_scalar(&r_bytes, &public, msg);
    // accept iff 8 * (-S*B + R + c*vk) is the identity
    let check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &vk, &-s) + big_r;
    check.mul_by_cofactor().is_identity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_private_is_clamped() {
        let private = derive_private(&[7u8; 32]);
        assert_eq!(private[0] & 7, 0);
        assert_eq!(private[31] & 0x80, 0);
        assert_eq!(private[31] & 0x40, 0x40);
    }

    #[test]
    fn derivation_is_deterministic() {
        let seed = [42u8; 32];
        assert_eq!(derive_private(&seed), derive_private(&seed));
        let private = derive_private(&seed);
        assert_eq!(public_from_private(&private), public_from_private(&private));
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (public, private) = generate();
        let sig = sign(&private, b"red25519").unwrap();
        assert_eq!(sig.len(), SIG_LEN);
        assert!(verify(&public, b"red25519", &sig));
        assert!(!verify(&public, b"red25518", &sig));
    }

    #[test]
    fn signatures_are_randomized_but_both_verify() {
        let (public, private) = generate();
        let sig1 = sign(&private, b"randomized").unwrap();
        let sig2 = sign(&private, b"randomized").unwrap();
        assert_ne!(sig1, sig2);
        assert!(verify(&public, b"randomized", &sig1));
        assert!(verify(&public, b"randomized", &sig2));
    }

    #[test]
    fn mutated_first_byte_rejected() {
        let (public, private) = generate();
        let mut sig = sign(&private, b"mutate").unwrap();
        sig[0] ^= 0x01;
        assert!(!verify(&public, b"mutate", &sig));
    }

    #[test]
    fn non_canonical_s_rejected() {
        let (public, private) = generate();
        let mut sig = sign(&private, b"canonical").unwrap();
        // force S >= L by setting the top bits of the little-endian scalar
        sig[63] |= 0xf0;
        assert!(!verify(&public, b"canonical", &sig));
    }

    #[test]
    fn wrong_key_rejected() {
        let (_, private) = generate();
        let (other_public, _) = generate();
        let sig = sign(&private, b"wrong key").unwrap();
        assert!(!verify(&other_public, b"wrong key", &sig));
    }
}
