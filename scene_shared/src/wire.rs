//! Byte-level helpers shared by the TCP and UDP codecs.
//!
//! All wire structs are little-endian and byte-packed. Decoding goes through
//! `bytes::Buf` over a borrowed slice; every read is preceded by an explicit
//! length check so a short buffer yields `WireError::Truncated` instead of a
//! panic.

use bytes::Buf;
use thiserror::Error;

/// Wire decoding/encoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("unknown {what} tag {tag:#04x}")]
    UnknownTag { what: &'static str, tag: u8 },

    #[error("invalid {what} value {value}")]
    InvalidValue { what: &'static str, value: u64 },

    #[error("frame of {len} bytes exceeds limit of {max}")]
    Oversize { len: usize, max: usize },
}

/// Ensures `buf` has at least `need` bytes left.
pub fn ensure<B: Buf + ?Sized>(buf: &B, need: usize, what: &'static str) -> Result<(), WireError> {
    let have = buf.remaining();
    if have < need {
        return Err(WireError::Truncated { what, need, have });
    }
    Ok(())
}

pub fn get_vec3(buf: &mut impl Buf) -> [f32; 3] {
    [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()]
}
