//! LeaseSet 2 construction
//!
//! The router hands us its inbound tunnel heads as lease1 structures
//! (millisecond expiry); we publish them back as a signed LeaseSet2 with
//! second-granularity expiry, carrying two encryption keys: X25519 (the
//! one modern routers select) and a random ElGamal-2048 key kept for
//! legacy compatibility. The private halves ride along in the
//! CreateLeaseSet2 message so the router can decrypt inbound garlic for
//! the session.

use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use eeplink_protocol::destination::LocalDestination;
use eeplink_protocol::Result;

use super::messages::Lease;

/// Store type byte for a LeaseSet2, also the signature domain prefix.
const STORE_TYPE_LEASESET2: u8 = 3;

/// LeaseSet2 lifetime, seconds.
const LEASESET_TTL_SECS: u16 = 600;

/// Encryption key type codes.
const ENC_TYPE_ELGAMAL: u16 = 0;
const ENC_TYPE_X25519: u16 = 4;

const ELGAMAL_KEY_LEN: usize = 256;

/// A lease converted for LeaseSet2: same gateway and tunnel id, expiry in
/// seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease2 {
    pub gateway: [u8; 32],
    pub tunnel_id: u32,
    pub expires_sec: u32,
}

impl Lease2 {
    pub fn from_lease(lease: &Lease) -> Self {
        Lease2 {
            gateway: lease.gateway,
            tunnel_id: lease.tunnel_id,
            expires_sec: (lease.expires_ms / 1000) as u32,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.gateway);
        out.extend_from_slice(&self.tunnel_id.to_be_bytes());
        out.extend_from_slice(&self.expires_sec.to_be_bytes());
    }
}

/// The session's leaseset encryption keys, generated once per session.
pub struct EncryptionKeys {
    x25519_public: [u8; 32],
    x25519_private: [u8; 32],
    elgamal_public: Vec<u8>,
    elgamal_private: Vec<u8>,
}

impl EncryptionKeys {
    /// A real X25519 pair plus a random ElGamal placeholder. With
    /// `i2cp.leaseSetEncType=4,0` every modern router picks X25519, so the
    /// ElGamal key only has to be well-formed, not usable.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        let mut elgamal_public = vec![0u8; ELGAMAL_KEY_LEN];
        let mut elgamal_private = vec![0u8; ELGAMAL_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut elgamal_public);
        rand::rngs::OsRng.fill_bytes(&mut elgamal_private);
        EncryptionKeys {
            x25519_public: public.to_bytes(),
            x25519_private: secret.to_bytes(),
            elgamal_public,
            elgamal_private,
        }
    }

    fn write_public(&self, out: &mut Vec<u8>) {
        out.push(2);
        out.extend_from_slice(&ENC_TYPE_X25519.to_be_bytes());
        out.extend_from_slice(&(self.x25519_public.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.x25519_public);
        out.extend_from_slice(&ENC_TYPE_ELGAMAL.to_be_bytes());
        out.extend_from_slice(&(self.elgamal_public.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.elgamal_public);
    }

    fn write_private(&self, out: &mut Vec<u8>) {
        out.push(2);
        out.extend_from_slice(&ENC_TYPE_X25519.to_be_bytes());
        out.extend_from_slice(&(self.x25519_private.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.x25519_private);
        out.extend_from_slice(&ENC_TYPE_ELGAMAL.to_be_bytes());
        out.extend_from_slice(&(self.elgamal_private.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.elgamal_private);
    }
}

/// Build the CreateLeaseSet2 message payload: session id, store type, the
/// signed LeaseSet2, and the encryption private keys.
pub fn create_leaseset2(
    session_id: u16,
    local: &LocalDestination,
    leases: &[Lease2],
    keys: &EncryptionKeys,
    published_sec: u32,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    body.extend_from_slice(local.destination().as_bytes());
    body.extend_from_slice(&published_sec.to_be_bytes());
    body.extend_from_slice(&LEASESET_TTL_SECS.to_be_bytes());
    // flags: no offline signature, published, not encrypted
    body.extend_from_slice(&0u16.to_be_bytes());
    // empty options mapping
    body.extend_from_slice(&0u16.to_be_bytes());
    keys.write_public(&mut body);
    body.push(leases.len() as u8);
    for lease in leases {
        lease.write(&mut body);
    }

    // signature domain: the store type byte precedes the body
    let mut signable = Vec::with_capacity(1 + body.len());
    signable.push(STORE_TYPE_LEASESET2);
    signable.extend_from_slice(&body);
    let sig = local.sign(&signable)?;

    let mut payload = Vec::new();
    payload.extend_from_slice(&session_id.to_be_bytes());
    payload.push(STORE_TYPE_LEASESET2);
    payload.extend_from_slice(&body);
    payload.extend_from_slice(&sig);
    keys.write_private(&mut payload);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeplink_crypto::SigType;

    fn lease1(i: u8) -> Lease {
        Lease {
            gateway: [i; 32],
            tunnel_id: i as u32 + 100,
            expires_ms: 1_700_000_655_000,
        }
    }

    #[test]
    fn lease_conversion_truncates_to_seconds() {
        let lease2 = Lease2::from_lease(&lease1(1));
        assert_eq!(lease2.expires_sec, 1_700_000_655);
        assert_eq!(lease2.tunnel_id, 101);
        assert_eq!(lease2.gateway, [1u8; 32]);
    }

    #[test]
    fn leaseset2_signature_covers_store_type_and_body() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let keys = EncryptionKeys::generate();
        let leases: Vec<Lease2> = (0..2).map(|i| Lease2::from_lease(&lease1(i))).collect();
        let payload = create_leaseset2(9, &local, &leases, &keys, 1_700_000_000).unwrap();

        // session id then store type
        assert_eq!(&payload[..2], &9u16.to_be_bytes());
        assert_eq!(payload[2], STORE_TYPE_LEASESET2);

        let dest_len = local.destination().byte_len();
        let sig_len = local.sig_type().sig_len();
        // body: dest + published(4) + expires(2) + flags(2) + options(2)
        //       + keys(1 + 2+2+32 + 2+2+256) + lease count(1) + 2*40
        let body_len = dest_len + 4 + 2 + 2 + 2 + 1 + 36 + 260 + 1 + 80;
        let body = &payload[3..3 + body_len];
        let sig = &payload[3 + body_len..3 + body_len + sig_len];

        let mut signable = vec![STORE_TYPE_LEASESET2];
        signable.extend_from_slice(body);
        assert!(local.destination().verify(&signable, sig));

        // private keys trail the signature: count + x25519 + elgamal
        let tail = &payload[3 + body_len + sig_len..];
        assert_eq!(tail[0], 2);
        assert_eq!(tail.len(), 1 + 36 + 260);
    }

    #[test]
    fn x25519_keys_are_a_real_pair() {
        let keys = EncryptionKeys::generate();
        let secret = StaticSecret::from(keys.x25519_private);
        assert_eq!(PublicKey::from(&secret).to_bytes(), keys.x25519_public);
    }
}
