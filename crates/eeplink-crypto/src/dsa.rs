//! DSA-SHA1 over the fixed I2P group parameters
//!
//! The group (1024-bit `p`, 160-bit `q`, generator `g`) is shared by every
//! DSA destination on the network; only the key pair varies. Signatures are
//! the raw `r || s` concatenation, each component left-padded to 20 bytes.

use std::sync::OnceLock;

use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};

use crate::error::{CryptoError, Result};

pub const PUBKEY_LEN: usize = 128;
pub const PRIVKEY_LEN: usize = 20;
pub const SIG_LEN: usize = 40;

const P_HEX: &[u8] = b"9c05b2aa960d9b97b8931963c9cc9e8c3026e9b8ed92fad0a69cc886d5bf8015\
fcadae31a0ad18fab3f01b00a358de237655c4964afaa2b337e96ad316b9fb1c\
c564b5aec5b69a9ff6c3e4548707fef8503d91dd8602e867e6d35d2235c1869c\
e2479c3b9d5401de04e0727fb33d6511285d4cf29538d9e3b6051f5b22cc1c93";

const Q_HEX: &[u8] = b"a5dfc28fef4ca1e286744cd8eed9d29d684046b7";

const G_HEX: &[u8] = b"c1f4d27d40093b429e962d7223824e0bbc47e7c832a39236fc683af84889581\
075ff9082ed32353d4374d7301cda1d23c431f4698599dda02451824ff36975\
2593647cc3ddc197de985e43d136cdcfc6bd5409cd2f450821142a5e6f8eb1c\
3ab5d0484b8129fcf17bce4f7f33321c3cb3dbb14a905e7b2b3e93be4708cbcc82";

struct DsaGroup {
    p: BigUint,
    q: BigUint,
    g: BigUint,
}

fn group() -> &'static DsaGroup {
    static GROUP: OnceLock<DsaGroup> = OnceLock::new();
    GROUP.get_or_init(|| DsaGroup {
        p: BigUint::parse_bytes(P_HEX, 16).expect("fixed modulus"),
        q: BigUint::parse_bytes(Q_HEX, 16).expect("fixed subgroup order"),
        g: BigUint::parse_bytes(G_HEX, 16).expect("fixed generator"),
    })
}

/// Left-pad a big-endian magnitude into a fixed-width buffer.
fn write_padded(out: &mut [u8], value: &BigUint) {
    let bytes = value.to_bytes_be();
    let pad = out.len() - bytes.len();
    out[..pad].fill(0);
    out[pad..].copy_from_slice(&bytes);
}

/// Generate a DSA key pair, returning `(public, private)`.
///
/// Random draws whose private key is shorter than 20 bytes or whose public
/// key is shorter than 128 bytes are rejected and resampled, so the packed
/// destination layout never sees a short key.
pub fn generate() -> (Vec<u8>, Vec<u8>) {
    let gr = group();
    let mut rng = OsRng;
    loop {
        let x = rng.gen_biguint_below(&gr.q);
        if x.is_zero() {
            continue;
        }
        let private = x.to_bytes_be();
        if private.len() != PRIVKEY_LEN {
            continue;
        }
        let public = gr.g.modpow(&x, &gr.p).to_bytes_be();
        if public.len() != PUBKEY_LEN {
            continue;
        }
        return (public, private);
    }
}

/// Sign `data` (hashed with SHA-1 internally) with a 20-byte private key.
pub fn sign(private: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if private.len() != PRIVKEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            algorithm: "DSA_SHA1",
            role: "private",
            expected: PRIVKEY_LEN,
            got: private.len(),
        });
    }
    let gr = group();
    let x = BigUint::from_bytes_be(private);
    let h = BigUint::from_bytes_be(&Sha1::digest(data));
    let mut rng = OsRng;
    loop {
        let k = rng.gen_biguint_below(&gr.q);
        if k.is_zero() {
            continue;
        }
        let r = gr.g.modpow(&k, &gr.p) % &gr.q;
        if r.is_zero() {
            continue;
        }
        let k_inv = match k.modinv(&gr.q) {
            Some(inv) => inv,
            None => continue,
        };
        let s = (&k_inv * (&h + &x * &r)) % &gr.q;
        if s.is_zero() {
            continue;
        }
        let mut sig = vec![0u8; SIG_LEN];
        write_padded(&mut sig[..PRIVKEY_LEN], &r);
        write_padded(&mut sig[PRIVKEY_LEN..], &s);
        return Ok(sig);
    }
}

/// Verify an `r || s` signature over `data` (hashed with SHA-1 internally).
pub fn verify(public: &[u8], data: &[u8], sig: &[u8]) -> bool {
    if public.len() != PUBKEY_LEN || sig.len() != SIG_LEN {
        return false;
    }
    let gr = group();
    let y = BigUint::from_bytes_be(public);
    let r = BigUint::from_bytes_be(&sig[..PRIVKEY_LEN]);
    let s = BigUint::from_bytes_be(&sig[PRIVKEY_LEN..]);
    if r.is_zero() || s.is_zero() || r >= gr.q || s >= gr.q {
        return false;
    }
    let h = BigUint::from_bytes_be(&Sha1::digest(data));
    let w = match s.modinv(&gr.q) {
        Some(w) => w,
        None => return false,
    };
    let u1 = (&h * &w) % &gr.q;
    let u2 = (&r * &w) % &gr.q;
    let v = ((gr.g.modpow(&u1, &gr.p) * y.modpow(&u2, &gr.p)) % &gr.p) % &gr.q;
    v == r
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn group_parameters_consistent() {
        let gr = group();
        assert_eq!(gr.p.bits(), 1024);
        assert_eq!(gr.q.bits(), 160);
        // g must generate the q-order subgroup of Z_p*
        assert!(gr.g.modpow(&gr.q, &gr.p).is_one());
    }

    #[test]
    fn generated_keys_have_exact_lengths() {
        let (public, private) = generate();
        assert_eq!(public.len(), PUBKEY_LEN);
        assert_eq!(private.len(), PRIVKEY_LEN);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (public, private) = generate();
        let sig = sign(&private, b"dsa roundtrip").unwrap();
        assert_eq!(sig.len(), SIG_LEN);
        assert!(verify(&public, b"dsa roundtrip", &sig));
        assert!(!verify(&public, b"different data", &sig));
    }

    #[test]
    fn tampered_signature_rejected() {
        let (public, private) = generate();
        let mut sig = sign(&private, b"tamper me").unwrap();
        sig[0] ^= 0x01;
        assert!(!verify(&public, b"tamper me", &sig));
    }

    #[test]
    fn wrong_key_rejected() {
        let (_, private) = generate();
        let (other_public, _) = generate();
        let sig = sign(&private, b"wrong key").unwrap();
        assert!(!verify(&other_public, b"wrong key", &sig));
    }

    #[test]
    fn malformed_inputs_rejected() {
        let (public, private) = generate();
        let sig = sign(&private, b"x").unwrap();
        assert!(!verify(&public[..127], b"x", &sig));
        assert!(!verify(&public, b"x", &sig[..39]));
        assert!(!verify(&public, b"x", &vec![0u8; SIG_LEN]));
    }
}
