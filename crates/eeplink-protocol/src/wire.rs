//! Bounds-checked big-endian field readers
//!
//! The codecs in this crate all walk byte slices with explicit offsets;
//! these helpers turn out-of-range reads into errors instead of panics.

use crate::error::{ProtocolError, Result};

pub fn get_u16(buf: &[u8], off: usize) -> Result<u16> {
    let end = off.checked_add(2).ok_or(ProtocolError::Truncated {
        needed: usize::MAX,
        got: buf.len(),
    })?;
    if buf.len() < end {
        return Err(ProtocolError::Truncated {
            needed: end,
            got: buf.len(),
        });
    }
    Ok(u16::from_be_bytes([buf[off], buf[off + 1]]))
}

pub fn get_u32(buf: &[u8], off: usize) -> Result<u32> {
    let end = off.checked_add(4).ok_or(ProtocolError::Truncated {
        needed: usize::MAX,
        got: buf.len(),
    })?;
    if buf.len() < end {
        return Err(ProtocolError::Truncated {
            needed: end,
            got: buf.len(),
        });
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[off..end]);
    Ok(u32::from_be_bytes(bytes))
}

pub fn get_u64(buf: &[u8], off: usize) -> Result<u64> {
    let end = off.checked_add(8).ok_or(ProtocolError::Truncated {
        needed: usize::MAX,
        got: buf.len(),
    })?;
    if buf.len() < end {
        return Err(ProtocolError::Truncated {
            needed: end,
            got: buf.len(),
        });
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..end]);
    Ok(u64::from_be_bytes(bytes))
}

/// Require at least `end` bytes in `buf`.
pub fn need(buf: &[u8], end: usize) -> Result<()> {
    if buf.len() < end {
        return Err(ProtocolError::Truncated {
            needed: end,
            got: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(get_u16(&buf, 0).unwrap(), 0x0102);
        assert_eq!(get_u32(&buf, 2).unwrap(), 0x03040506);
        assert_eq!(get_u64(&buf, 0).unwrap(), 0x0102030405060708);
    }

    #[test]
    fn out_of_range_is_error() {
        let buf = [0u8; 3];
        assert!(get_u16(&buf, 2).is_err());
        assert!(get_u32(&buf, 0).is_err());
        assert!(get_u64(&buf, 0).is_err());
        assert!(need(&buf, 4).is_err());
        assert!(need(&buf, 3).is_ok());
    }
}
