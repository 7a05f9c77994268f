//! Datagram envelopes and the gzip payload framing
//!
//! Repliable datagrams are `destination || signature || payload`, where the
//! signature is the payload variant (DSA-SHA1 destinations sign the
//! SHA-256 of the payload, everything else signs the payload directly).
//! Raw datagrams are the bare payload.
//!
//! The router-control transport wraps every payload in a gzip frame and
//! repurposes unused gzip header bytes for addressing: source port at
//! offsets 4-5, destination port at 6-7 and the protocol id at offset 9.
//! Those bytes sit in the mtime/OS fields, which inflaters ignore, so the
//! frame stays decompressible.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::destination::{Destination, LocalDestination};
use crate::error::{ProtocolError, Result};
use crate::wire::need;

/// Protocol ids carried in the gzip header.
pub const PROTO_STREAMING: u8 = 6;
pub const PROTO_REPLIABLE_DATAGRAM: u8 = 17;
pub const PROTO_RAW_DATAGRAM: u8 = 18;

/// Offsets of the repurposed gzip header bytes.
const SRC_PORT_OFFSET: usize = 4;
const DST_PORT_OFFSET: usize = 6;
const PROTOCOL_OFFSET: usize = 9;
const GZIP_HEADER_LEN: usize = 10;

/// Addressing carried alongside a gzip-framed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramInfo {
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

/// Gzip-compress `raw` and stamp the ports and protocol id into the
/// header.
pub fn compress(raw: &[u8], info: DatagramInfo) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    let mut frame = encoder
        .finish()
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    frame[SRC_PORT_OFFSET..SRC_PORT_OFFSET + 2].copy_from_slice(&info.src_port.to_be_bytes());
    frame[DST_PORT_OFFSET..DST_PORT_OFFSET + 2].copy_from_slice(&info.dst_port.to_be_bytes());
    frame[PROTOCOL_OFFSET] = info.protocol;
    Ok(frame)
}

/// Read the addressing bytes out of a gzip frame and inflate it.
pub fn decompress(frame: &[u8]) -> Result<(DatagramInfo, Vec<u8>)> {
    need(frame, GZIP_HEADER_LEN)?;
    if frame[0] != 0x1f || frame[1] != 0x8b {
        return Err(ProtocolError::NotGzip);
    }
    let info = DatagramInfo {
        src_port: u16::from_be_bytes([frame[SRC_PORT_OFFSET], frame[SRC_PORT_OFFSET + 1]]),
        dst_port: u16::from_be_bytes([frame[DST_PORT_OFFSET], frame[DST_PORT_OFFSET + 1]]),
        protocol: frame[PROTOCOL_OFFSET],
    };
    let mut raw = Vec::new();
    GzDecoder::new(frame)
        .read_to_end(&mut raw)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    Ok((info, raw))
}

/// Build a signed repliable datagram from `from` around `payload`.
pub fn seal_repliable(from: &LocalDestination, payload: &[u8]) -> Result<Vec<u8>> {
    let sig = from.sign_payload(payload)?;
    let dest_bytes = from.destination().as_bytes();
    let mut out = Vec::with_capacity(dest_bytes.len() + sig.len() + payload.len());
    out.extend_from_slice(dest_bytes);
    out.extend_from_slice(&sig);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse and verify a repliable datagram, returning the sender and the
/// payload. Fails with [`ProtocolError::BadSignature`] on forgeries.
pub fn open_repliable(bytes: &[u8]) -> Result<(Destination, Vec<u8>)> {
    let (source, used) = Destination::parse_prefix(bytes)?;
    let sig_len = source.sig_type().sig_len();
    need(bytes, used + sig_len)?;
    let sig = &bytes[used..used + sig_len];
    let payload = &bytes[used + sig_len..];
    if !source.verify_payload(payload, sig) {
        return Err(ProtocolError::BadSignature);
    }
    Ok((source, payload.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeplink_crypto::SigType;

    #[test]
    fn gzip_frame_roundtrip() {
        let info = DatagramInfo {
            src_port: 13,
            dst_port: 14,
            protocol: PROTO_REPLIABLE_DATAGRAM,
        };
        let frame = compress(b"hello gzip framing", info).unwrap();
        assert_eq!(frame[0], 0x1f);
        assert_eq!(frame[1], 0x8b);
        let (parsed, raw) = decompress(&frame).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(raw, b"hello gzip framing");
    }

    #[test]
    fn header_substitution_preserves_decompressibility() {
        let info = DatagramInfo {
            src_port: 0xffff,
            dst_port: 0xffff,
            protocol: 0xff,
        };
        let frame = compress(&vec![0xabu8; 4096], info).unwrap();
        let (parsed, raw) = decompress(&frame).unwrap();
        assert_eq!(parsed.src_port, 0xffff);
        assert_eq!(parsed.protocol, 0xff);
        assert_eq!(raw.len(), 4096);
    }

    #[test]
    fn non_gzip_rejected() {
        assert!(matches!(
            decompress(&[0u8; 16]),
            Err(ProtocolError::NotGzip)
        ));
        assert!(decompress(&[0x1f, 0x8b]).is_err());
    }

    #[test]
    fn repliable_roundtrip() {
        for ty in [SigType::Ed25519, SigType::DsaSha1] {
            let local = crate::destination::LocalDestination::generate(ty);
            let sealed = seal_repliable(&local, b"Reply!").unwrap();
            let (source, payload) = open_repliable(&sealed).unwrap();
            assert_eq!(source.as_bytes(), local.destination().as_bytes());
            assert_eq!(payload, b"Reply!");
        }
    }

    #[test]
    fn forged_repliable_rejected() {
        let local = crate::destination::LocalDestination::generate(SigType::Ed25519);
        let mut sealed = seal_repliable(&local, b"Reply!").unwrap();
        let tail = sealed.len() - 1;
        sealed[tail] ^= 0x01; // corrupt the payload
        assert!(matches!(
            open_repliable(&sealed),
            Err(ProtocolError::BadSignature)
        ));
    }
}
