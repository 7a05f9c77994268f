//! ECDSA adapters over the NIST curves
//!
//! Public keys travel as the bare two-field-element SEC1 body; the `0x04`
//! uncompressed-point tag is prepended before handing them to the curve
//! backend. Signatures are fixed-width `r || s`. The hash is the curve's
//! standard pairing (SHA-256/384/512).

use crate::error::{CryptoError, Result};

macro_rules! nist_curve_ops {
    ($name:ident, $curve:ident, $algorithm:literal, $pub_len:expr, $priv_len:expr, $sig_len:expr) => {
        pub mod $name {
            use rand::rngs::OsRng;
            use $curve::ecdsa::signature::{Signer, Verifier};
            use $curve::ecdsa::{Signature, SigningKey, VerifyingKey};

            use super::{CryptoError, Result};

            pub const PUBKEY_LEN: usize = $pub_len;
            pub const PRIVKEY_LEN: usize = $priv_len;
            pub const SIG_LEN: usize = $sig_len;

            pub fn generate() -> (Vec<u8>, Vec<u8>) {
                let key = SigningKey::random(&mut OsRng);
                let verifying_key = VerifyingKey::from(&key);
                let point = verifying_key.to_encoded_point(false);
                // strip the 0x04 uncompressed-point tag
                let public = point.as_bytes()[1..].to_vec();
                (public, key.to_bytes().to_vec())
            }

            pub fn sign(private: &[u8], data: &[u8]) -> Result<Vec<u8>> {
                if private.len() != PRIVKEY_LEN {
                    return Err(CryptoError::InvalidKeyLength {
                        algorithm: $algorithm,
                        role: "private",
                        expected: PRIVKEY_LEN,
                        got: private.len(),
                    });
                }
                let key = SigningKey::from_slice(private)
                    .map_err(|_| CryptoError::InvalidKey($algorithm))?;
                let sig: Signature = key.sign(data);
                Ok(sig.to_vec())
            }

            pub fn verify(public: &[u8], data: &[u8], sig: &[u8]) -> bool {
                if public.len() != PUBKEY_LEN {
                    return false;
                }
                let mut sec1 = Vec::with_capacity(1 + PUBKEY_LEN);
                sec1.push(0x04);
                sec1.extend_from_slice(public);
                let key = match VerifyingKey::from_sec1_bytes(&sec1) {
                    Ok(key) => key,
                    Err(_) => return false,
                };
                let sig = match Signature::from_slice(sig) {
                    Ok(sig) => sig,
                    Err(_) => return false,
                };
                key.verify(data, &sig).is_ok()
            }
        }
    };
}

nist_curve_ops!(p256_ops, p256, "ECDSA_SHA256_P256", 64, 32, 64);
nist_curve_ops!(p384_ops, p384, "ECDSA_SHA384_P384", 96, 48, 96);
nist_curve_ops!(p521_ops, p521, "ECDSA_SHA512_P521", 132, 66, 132);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p256_roundtrip() {
        let (public, private) = p256_ops::generate();
        assert_eq!(public.len(), p256_ops::PUBKEY_LEN);
        assert_eq!(private.len(), p256_ops::PRIVKEY_LEN);
        let sig = p256_ops::sign(&private, b"p256").unwrap();
        assert_eq!(sig.len(), p256_ops::SIG_LEN);
        assert!(p256_ops::verify(&public, b"p256", &sig));
        assert!(!p256_ops::verify(&public, b"other", &sig));
    }

    #[test]
    fn p384_roundtrip() {
        let (public, private) = p384_ops::generate();
        assert_eq!(public.len(), p384_ops::PUBKEY_LEN);
        let sig = p384_ops::sign(&private, b"p384").unwrap();
        assert_eq!(sig.len(), p384_ops::SIG_LEN);
        assert!(p384_ops::verify(&public, b"p384", &sig));
    }

    #[test]
    fn p521_roundtrip() {
        let (public, private) = p521_ops::generate();
        assert_eq!(public.len(), p521_ops::PUBKEY_LEN);
        assert_eq!(private.len(), p521_ops::PRIVKEY_LEN);
        let sig = p521_ops::sign(&private, b"p521").unwrap();
        assert_eq!(sig.len(), p521_ops::SIG_LEN);
        assert!(p521_ops::verify(&public, b"p521", &sig));
    }

    #[test]
    fn mutated_signature_rejected() {
        let (public, private) = p256_ops::generate();
        let mut sig = p256_ops::sign(&private, b"mutate").unwrap();
        sig[10] ^= 0x80;
        assert!(!p256_ops::verify(&public, b"mutate", &sig));
    }

    #[test]
    fn prefixed_public_key_rejected() {
        // a key that still carries the 0x04 tag has the wrong length
        let (public, private) = p256_ops::generate();
        let sig = p256_ops::sign(&private, b"tag").unwrap();
        let mut tagged = vec![0x04];
        tagged.extend_from_slice(&public);
        assert!(!p256_ops::verify(&tagged, b"tag", &sig));
    }
}
