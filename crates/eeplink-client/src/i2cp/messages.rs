//! I2CP message framing and payload codecs
//!
//! After a one-byte protocol prelude (`0x2A`), the connection carries
//! `u32 length || u8 type || payload` frames in both directions. Unknown
//! types from the router are skipped.

use eeplink_protocol::destination::{Destination, LocalDestination};
use eeplink_protocol::wire::{get_u16, get_u32, get_u64, need};
use eeplink_protocol::{ProtocolError, Result};

/// Protocol prelude byte sent once after connecting.
pub const PROTOCOL_BYTE: u8 = 0x2a;

/// Version announced in GetDate.
pub const I2CP_VERSION: &str = "0.9.65";

/// Message type codes.
pub mod msg_type {
    pub const CREATE_SESSION: u8 = 1;
    pub const SEND_MESSAGE: u8 = 5;
    pub const SESSION_STATUS: u8 = 20;
    pub const MESSAGE_STATUS: u8 = 22;
    pub const DISCONNECT: u8 = 30;
    pub const MESSAGE_PAYLOAD: u8 = 31;
    pub const GET_DATE: u8 = 32;
    pub const SET_DATE: u8 = 33;
    pub const REQUEST_VARIABLE_LEASESET: u8 = 37;
    pub const HOST_LOOKUP: u8 = 38;
    pub const HOST_REPLY: u8 = 39;
    pub const CREATE_LEASESET2: u8 = 41;
}

/// Session status codes.
pub mod session_status {
    pub const DESTROYED: u8 = 0;
    pub const CREATED: u8 = 1;
    pub const UPDATED: u8 = 2;
    pub const INVALID: u8 = 3;
    pub const REFUSED: u8 = 4;
}

/// Frame a message for the wire.
pub fn frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.push(msg_type);
    out.extend_from_slice(payload);
    out
}

/// A length-prefixed UTF-8 string (one length byte).
pub fn i2p_string(s: &str) -> Result<Vec<u8>> {
    if s.len() > u8::MAX as usize {
        return Err(ProtocolError::InconsistentDestination(format!(
            "string of {} bytes does not fit the u8 length",
            s.len()
        )));
    }
    let mut out = Vec::with_capacity(1 + s.len());
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(out)
}

/// The I2P options mapping: `u16 total length`, then for each entry the
/// length-prefixed key, `=`, the length-prefixed value and `;`. Entries
/// are sorted by key.
pub fn mapping(entries: &[(&str, &str)]) -> Result<Vec<u8>> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|(key, _)| *key);
    let mut body = Vec::new();
    for (key, value) in sorted {
        body.extend_from_slice(&i2p_string(key)?);
        body.push(b'=');
        body.extend_from_slice(&i2p_string(value)?);
        body.push(b';');
    }
    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Session options sent with CreateSession.
pub fn session_options() -> Result<Vec<u8>> {
    mapping(&[
        ("i2cp.fastReceive", "true"),
        ("i2cp.leaseSetEncType", "4,0"),
    ])
}

/// GetDate payload: just the version string.
pub fn get_date() -> Result<Vec<u8>> {
    i2p_string(I2CP_VERSION)
}

/// CreateSession payload: the session configuration, which is the
/// destination, the options mapping, the current date in milliseconds,
/// and a signature over all of the preceding bytes.
pub fn create_session(local: &LocalDestination, now_ms: u64) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    payload.extend_from_slice(local.destination().as_bytes());
    payload.extend_from_slice(&session_options()?);
    payload.extend_from_slice(&now_ms.to_be_bytes());
    let sig = local.sign(&payload)?;
    payload.extend_from_slice(&sig);
    Ok(payload)
}

/// SendMessage payload: session id, destination, the u32-length-prefixed
/// gzip frame, and the tracking nonce.
pub fn send_message(
    session_id: u16,
    destination: &Destination,
    gzip_frame: &[u8],
    nonce: u32,
) -> Vec<u8> {
    let dest = destination.as_bytes();
    let mut out = Vec::with_capacity(2 + dest.len() + 4 + gzip_frame.len() + 4);
    out.extend_from_slice(&session_id.to_be_bytes());
    out.extend_from_slice(dest);
    out.extend_from_slice(&(gzip_frame.len() as u32).to_be_bytes());
    out.extend_from_slice(gzip_frame);
    out.extend_from_slice(&nonce.to_be_bytes());
    out
}

/// HostLookup payload. Request type 1 is a host-name query.
pub fn host_lookup(session_id: u16, request_id: u32, timeout_ms: u32, name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&session_id.to_be_bytes());
    out.extend_from_slice(&request_id.to_be_bytes());
    out.extend_from_slice(&timeout_ms.to_be_bytes());
    out.push(1);
    out.extend_from_slice(&i2p_string(name)?);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: u16,
    pub status: u8,
}

pub fn parse_session_status(payload: &[u8]) -> Result<SessionStatus> {
    need(payload, 3)?;
    Ok(SessionStatus {
        session_id: get_u16(payload, 0)?,
        status: payload[2],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStatus {
    pub session_id: u16,
    pub message_id: u32,
    pub status: u8,
    pub size: u32,
    pub nonce: u32,
}

pub fn parse_message_status(payload: &[u8]) -> Result<MessageStatus> {
    need(payload, 15)?;
    Ok(MessageStatus {
        session_id: get_u16(payload, 0)?,
        message_id: get_u32(payload, 2)?,
        status: payload[6],
        size: get_u32(payload, 7)?,
        nonce: get_u32(payload, 11)?,
    })
}

/// How to react to a MessageStatus code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued by the router (ACCEPTED).
    Queued,
    /// One of the success codes: likely delivered.
    Delivered,
    /// Anything else: this message failed; the session is unaffected.
    Failed,
}

pub fn classify_message_status(status: u8) -> DeliveryOutcome {
    match status {
        1 => DeliveryOutcome::Queued,
        2..=7 => DeliveryOutcome::Delivered,
        _ => DeliveryOutcome::Failed,
    }
}

#[derive(Debug, Clone)]
pub struct MessagePayload {
    pub session_id: u16,
    pub message_id: u32,
    pub payload: Vec<u8>,
}

pub fn parse_message_payload(payload: &[u8]) -> Result<MessagePayload> {
    need(payload, 10)?;
    let len = get_u32(payload, 6)? as usize;
    need(payload, 10 + len)?;
    Ok(MessagePayload {
        session_id: get_u16(payload, 0)?,
        message_id: get_u32(payload, 2)?,
        payload: payload[10..10 + len].to_vec(),
    })
}

#[derive(Debug, Clone)]
pub struct HostReply {
    pub session_id: u16,
    pub request_id: u32,
    pub result: u8,
    pub destination: Option<Destination>,
}

pub fn parse_host_reply(payload: &[u8]) -> Result<HostReply> {
    need(payload, 7)?;
    let result = payload[6];
    let destination = if result == 0 {
        let (dest, _) = Destination::parse_prefix(&payload[7..])?;
        Some(dest)
    } else {
        None
    };
    Ok(HostReply {
        session_id: get_u16(payload, 0)?,
        request_id: get_u32(payload, 2)?,
        result,
        destination,
    })
}

/// A lease as requested by the router: tunnel gateway hash, tunnel id,
/// and an expiration in milliseconds.
#[derive(Debug, Clone)]
pub struct Lease {
    pub gateway: [u8; 32],
    pub tunnel_id: u32,
    pub expires_ms: u64,
}

pub fn parse_request_variable_leaseset(payload: &[u8]) -> Result<(u16, Vec<Lease>)> {
    need(payload, 3)?;
    let session_id = get_u16(payload, 0)?;
    let count = payload[2] as usize;
    need(payload, 3 + count * 44)?;
    let mut leases = Vec::with_capacity(count);
    for i in 0..count {
        let off = 3 + i * 44;
        let mut gateway = [0u8; 32];
        gateway.copy_from_slice(&payload[off..off + 32]);
        leases.push(Lease {
            gateway,
            tunnel_id: get_u32(payload, off + 32)?,
            expires_ms: get_u64(payload, off + 36)?,
        });
    }
    Ok((session_id, leases))
}
