//! Stream-layer packet codec
//!
//! Packet layout: four u32 header words (send stream id, receive stream
//! id, sequence number, ack-through), a u8-counted NACK list, a resend
//! delay byte, a u16 flag word, a u16-length option block and the payload.
//!
//! Options serialize in fixed order: delay, FROM destination, max packet
//! size, offline signature (unsupported), signature. The signature always
//! comes last; it is emitted zero-filled, computed over the whole buffer
//! and back-patched.
//!
//! A SYNC packet reuses its NACK list as an anti-replay proof: the eight
//! entries are the big-endian words of `SHA-256(recipient destination)`.

use sha2::{Digest, Sha256};

use crate::destination::{Destination, LocalDestination};
use crate::error::{ProtocolError, Result};
use crate::wire::{get_u16, get_u32, need};

/// Default resend delay advertised in outgoing packets, in seconds.
pub const DEFAULT_RESEND_DELAY: u8 = 3;

/// Packet flag word (16 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u16);

impl PacketFlags {
    pub const SYNCHRONIZE: u16 = 1 << 0;
    pub const CLOSE: u16 = 1 << 1;
    pub const RESET: u16 = 1 << 2;
    pub const SIGNATURE_INCLUDED: u16 = 1 << 3;
    pub const SIGNATURE_REQUESTED: u16 = 1 << 4;
    pub const FROM_INCLUDED: u16 = 1 << 5;
    pub const DELAY_REQUESTED: u16 = 1 << 6;
    pub const MAX_PACKET_SIZE_INCLUDED: u16 = 1 << 7;
    pub const PROFILE_INTERACTIVE: u16 = 1 << 8;
    pub const ECHO: u16 = 1 << 9;
    pub const NO_ACK: u16 = 1 << 10;
    pub const OFFLINE_SIGNATURE: u16 = 1 << 11;

    pub fn new(bits: u16) -> Self {
        PacketFlags(bits)
    }

    pub fn contains(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u16) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u16) {
        self.0 &= !flag;
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

/// A decoded (or to-be-encoded) stream packet.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub send_stream_id: u32,
    pub receive_stream_id: u32,
    pub sequence: u32,
    pub ack_through: u32,
    pub nacks: Vec<u32>,
    pub resend_delay: u8,
    pub flags: PacketFlags,
    pub delay_ms: Option<u16>,
    pub from: Option<Destination>,
    pub max_packet_size: Option<u16>,
    pub signature: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn is_sync(&self) -> bool {
        self.flags.contains(PacketFlags::SYNCHRONIZE)
    }

    pub fn is_close(&self) -> bool {
        self.flags.contains(PacketFlags::CLOSE)
    }

    pub fn is_reset(&self) -> bool {
        self.flags.contains(PacketFlags::RESET)
    }

    pub fn is_no_ack(&self) -> bool {
        self.flags.contains(PacketFlags::NO_ACK)
    }

    /// A packet occupies a slot in the sequence space iff it has a nonzero
    /// sequence number or is a SYNC. Pure acks (sequence 0) do not.
    pub fn is_ackable(&self) -> bool {
        self.sequence != 0 || self.is_sync()
    }

    /// Whether this packet's flags require it to carry a signature.
    pub fn requires_signature(&self) -> bool {
        self.flags.contains(
            PacketFlags::SYNCHRONIZE | PacketFlags::CLOSE | PacketFlags::RESET | PacketFlags::ECHO,
        )
    }

    fn encode_with_sig(&self, sig: &[u8]) -> Result<Vec<u8>> {
        if self.nacks.len() > u8::MAX as usize {
            return Err(ProtocolError::InconsistentDestination(format!(
                "{} nacks do not fit the u8 count",
                self.nacks.len()
            )));
        }
        let mut out = Vec::with_capacity(24 + self.nacks.len() * 4 + sig.len() + self.payload.len());
        out.extend_from_slice(&self.send_stream_id.to_be_bytes());
        out.extend_from_slice(&self.receive_stream_id.to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.ack_through.to_be_bytes());
        out.push(self.nacks.len() as u8);
        for nack in &self.nacks {
            out.extend_from_slice(&nack.to_be_bytes());
        }
        out.push(self.resend_delay);
        out.extend_from_slice(&self.flags.as_u16().to_be_bytes());

        let mut options = Vec::new();
        if self.flags.contains(PacketFlags::DELAY_REQUESTED) {
            options.extend_from_slice(&self.delay_ms.unwrap_or(0).to_be_bytes());
        }
        if self.flags.contains(PacketFlags::FROM_INCLUDED) {
            let from = self
                .from
                .as_ref()
                .ok_or_else(|| {
                    ProtocolError::InconsistentDestination(
                        "FROM_INCLUDED set without a from destination".into(),
                    )
                })?;
            options.extend_from_slice(from.as_bytes());
        }
        if self.flags.contains(PacketFlags::MAX_PACKET_SIZE_INCLUDED) {
            options.extend_from_slice(&self.max_packet_size.unwrap_or(0).to_be_bytes());
        }
        if self.flags.contains(PacketFlags::OFFLINE_SIGNATURE) {
            return Err(ProtocolError::OfflineSignature);
        }
        if self.flags.contains(PacketFlags::SIGNATURE_INCLUDED) {
            options.extend_from_slice(sig);
        }

        out.extend_from_slice(&(options.len() as u16).to_be_bytes());
        out.extend_from_slice(&options);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Encode with the signature currently attached.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.flags.contains(PacketFlags::SIGNATURE_INCLUDED) {
            let sig = self
                .signature
                .as_ref()
                .ok_or(ProtocolError::MissingSignature)?;
            self.encode_with_sig(sig)
        } else {
            self.encode_with_sig(&[])
        }
    }

    /// Encode with the signature region zero-filled, as signed and
    /// verified on the wire.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let len = self
            .signature
            .as_ref()
            .map(|s| s.len())
            .ok_or(ProtocolError::MissingSignature)?;
        self.encode_with_sig(&vec![0u8; len])
    }

    /// Sign and encode: reserve a zero-filled signature region, sign the
    /// assembled buffer, back-patch the signature and return the bytes.
    pub fn sign_and_encode(&mut self, signer: &LocalDestination) -> Result<Vec<u8>> {
        self.flags.set(PacketFlags::SIGNATURE_INCLUDED);
        let sig_len = signer.sig_type().sig_len();
        let mut out = self.encode_with_sig(&vec![0u8; sig_len])?;
        let sig = signer.sign(&out)?;
        let sig_offset = out.len() - self.payload.len() - sig_len;
        out[sig_offset..sig_offset + sig_len].copy_from_slice(&sig);
        self.signature = Some(sig);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        let send_stream_id = get_u32(bytes, 0)?;
        let receive_stream_id = get_u32(bytes, 4)?;
        let sequence = get_u32(bytes, 8)?;
        let ack_through = get_u32(bytes, 12)?;
        need(bytes, 17)?;
        let nack_count = bytes[16] as usize;
        let mut off = 17;
        let mut nacks = Vec::with_capacity(nack_count);
        for _ in 0..nack_count {
            nacks.push(get_u32(bytes, off)?);
            off += 4;
        }
        need(bytes, off + 1)?;
        let resend_delay = bytes[off];
        off += 1;
        let flags = PacketFlags::new(get_u16(bytes, off)?);
        let options_len = get_u16(bytes, off + 2)? as usize;
        off += 4;
        let opts_end = off + options_len;
        need(bytes, opts_end)?;

        let mut delay_ms = None;
        let mut from = None;
        let mut max_packet_size = None;
        let mut signature = None;

        if flags.contains(PacketFlags::DELAY_REQUESTED) {
            delay_ms = Some(get_u16(bytes, off)?);
            off += 2;
        }
        if flags.contains(PacketFlags::FROM_INCLUDED) {
            let (dest, used) = Destination::parse_prefix(&bytes[off..opts_end])?;
            from = Some(dest);
            off += used;
        }
        if flags.contains(PacketFlags::MAX_PACKET_SIZE_INCLUDED) {
            max_packet_size = Some(get_u16(bytes, off)?);
            off += 2;
        }
        if flags.contains(PacketFlags::OFFLINE_SIGNATURE) {
            return Err(ProtocolError::OfflineSignature);
        }
        if flags.contains(PacketFlags::SIGNATURE_INCLUDED) {
            // the signature is always the last option
            signature = Some(bytes[off..opts_end].to_vec());
        }

        Ok(Packet {
            send_stream_id,
            receive_stream_id,
            sequence,
            ack_through,
            nacks,
            resend_delay,
            flags,
            delay_ms,
            from,
            max_packet_size,
            signature,
            payload: bytes[opts_end..].to_vec(),
        })
    }

    /// Verify a received packet against the remote destination that sent
    /// it and our own destination (for the SYNC anti-replay proof).
    ///
    /// Packets whose flags do not require a signature verify trivially.
    pub fn verify(&self, remote: &Destination, local: &Destination) -> bool {
        if !self.requires_signature() {
            return true;
        }
        let sig = match &self.signature {
            Some(sig) => sig,
            None => return false,
        };
        if self.is_sync() && self.nacks.len() == 8 {
            let expected: [u8; 32] = Sha256::digest(local.as_bytes()).into();
            let mut words = [0u8; 32];
            for (i, nack) in self.nacks.iter().enumerate() {
                words[i * 4..i * 4 + 4].copy_from_slice(&nack.to_be_bytes());
            }
            if words != expected {
                return false;
            }
        }
        let buf = match self.signable_bytes() {
            Ok(buf) => buf,
            Err(_) => return false,
        };
        remote.verify(&buf, sig)
    }
}

/// The eight big-endian words of `SHA-256(remote destination)`, carried in
/// a SYNC packet's NACK list as proof the initiator knows who it is
/// talking to.
pub fn replay_guard_nacks(remote: &Destination) -> Vec<u32> {
    let digest: [u8; 32] = Sha256::digest(remote.as_bytes()).into();
    digest
        .chunks(4)
        .map(|chunk| u32::from_be_bytes(chunk.try_into().expect("fixed split")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeplink_crypto::SigType;

    fn sync_packet(
        local: &LocalDestination,
        remote: &Destination,
        payload: &[u8],
    ) -> (Packet, Vec<u8>) {
        let mut packet = Packet {
            send_stream_id: 0,
            receive_stream_id: 0x2a2a2a2a,
            sequence: 0,
            ack_through: 0,
            nacks: replay_guard_nacks(remote),
            resend_delay: DEFAULT_RESEND_DELAY,
            flags: PacketFlags::new(
                PacketFlags::SYNCHRONIZE | PacketFlags::NO_ACK | PacketFlags::FROM_INCLUDED,
            ),
            from: Some(local.destination().clone()),
            payload: payload.to_vec(),
            ..Default::default()
        };
        let bytes = packet.sign_and_encode(local).unwrap();
        (packet, bytes)
    }

    #[test]
    fn sync_packet_roundtrip_and_verify() {
        let alice = LocalDestination::generate(SigType::Ed25519);
        let bob = LocalDestination::generate(SigType::Ed25519);
        let (_, bytes) = sync_packet(&alice, bob.destination(), b"hello from stream1");

        let decoded = Packet::decode(&bytes).unwrap();
        assert!(decoded.is_sync());
        assert_eq!(decoded.nacks.len(), 8);
        assert_eq!(decoded.payload, b"hello from stream1");
        let from = decoded.from.clone().unwrap();
        assert_eq!(from.as_bytes(), alice.destination().as_bytes());
        assert!(decoded.verify(&from, bob.destination()));
    }

    #[test]
    fn flipping_any_signed_byte_fails_verification() {
        let alice = LocalDestination::generate(SigType::Ed25519);
        let bob = LocalDestination::generate(SigType::Ed25519);
        let (_, bytes) = sync_packet(&alice, bob.destination(), b"bitflip");

        // flip a payload byte (end of buffer) and a header byte
        for index in [bytes.len() - 1, 8] {
            let mut mutated = bytes.clone();
            mutated[index] ^= 0x01;
            let decoded = match Packet::decode(&mutated) {
                Ok(decoded) => decoded,
                Err(_) => continue,
            };
            let from = decoded.from.clone().unwrap();
            assert!(!decoded.verify(&from, bob.destination()), "index {index}");
        }
    }

    #[test]
    fn replay_guard_mismatch_rejected() {
        let alice = LocalDestination::generate(SigType::Ed25519);
        let bob = LocalDestination::generate(SigType::Ed25519);
        let carol = LocalDestination::generate(SigType::Ed25519);
        // SYNC aimed at bob, replayed to carol
        let (packet, _) = sync_packet(&alice, bob.destination(), b"replayed");
        assert!(packet.verify(alice.destination(), bob.destination()));
        assert!(!packet.verify(alice.destination(), carol.destination()));
    }

    #[test]
    fn unsigned_data_packet_roundtrip() {
        let packet = Packet {
            send_stream_id: 7,
            receive_stream_id: 9,
            sequence: 3,
            ack_through: 1,
            nacks: vec![2],
            resend_delay: DEFAULT_RESEND_DELAY,
            payload: b"data".to_vec(),
            ..Default::default()
        };
        let bytes = packet.to_bytes().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.send_stream_id, 7);
        assert_eq!(decoded.sequence, 3);
        assert_eq!(decoded.nacks, vec![2]);
        assert_eq!(decoded.payload, b"data");
        assert!(decoded.is_ackable());
        // no signature-requiring flag: verifies against anything
        let local = LocalDestination::generate(SigType::Ed25519);
        assert!(decoded.verify(local.destination(), local.destination()));
    }

    #[test]
    fn pure_ack_is_not_ackable() {
        let ack = Packet {
            send_stream_id: 7,
            receive_stream_id: 9,
            sequence: 0,
            ack_through: 5,
            nacks: vec![3],
            ..Default::default()
        };
        assert!(!ack.is_ackable());
        let bytes = ack.to_bytes().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.ack_through, 5);
        assert_eq!(decoded.nacks, vec![3]);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn optional_fields_roundtrip() {
        let mut flags = PacketFlags::default();
        flags.set(PacketFlags::DELAY_REQUESTED);
        flags.set(PacketFlags::MAX_PACKET_SIZE_INCLUDED);
        let packet = Packet {
            sequence: 1,
            flags,
            delay_ms: Some(250),
            max_packet_size: Some(1730),
            ..Default::default()
        };
        let decoded = Packet::decode(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.delay_ms, Some(250));
        assert_eq!(decoded.max_packet_size, Some(1730));
    }

    #[test]
    fn offline_signature_rejected() {
        let mut flags = PacketFlags::default();
        flags.set(PacketFlags::OFFLINE_SIGNATURE);
        let packet = Packet {
            flags,
            ..Default::default()
        };
        assert!(matches!(
            packet.to_bytes(),
            Err(ProtocolError::OfflineSignature)
        ));
    }

    #[test]
    fn replay_guard_matches_destination_hash() {
        let local = LocalDestination::generate(SigType::Ed25519);
        let words = replay_guard_nacks(local.destination());
        assert_eq!(words.len(), 8);
        let mut packed = Vec::new();
        for word in &words {
            packed.extend_from_slice(&word.to_be_bytes());
        }
        assert_eq!(packed, local.destination().hash());
    }
}
