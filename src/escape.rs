//! Human-readable rendering of raw byte bursts
//!
//! Used only for trace output of relayed traffic. Control characters and
//! non-ASCII bytes are rendered as `<0xHH>`, a few line-protocol control
//! bytes get symbolic names in printable mode.

use crate::error::{BridgeError, Result};
use std::fmt::Write;

const ACK: u8 = 0x06;
const CAN: u8 = 0x18;
const NAK: u8 = 0x21;

/// Escape `length` bytes of `bytes` starting at `offset`
///
/// With `printable` set, printable ASCII is emitted as-is and `\n`, `\r`,
/// `\t`, ACK, CAN and NAK get symbolic forms. Otherwise every byte is
/// emitted as `<0xHH>`.
///
/// # Errors
///
/// `InvalidRange` if `offset > length` or the range runs past `bytes`.
pub fn escape(bytes: &[u8], offset: usize, length: usize, printable: bool) -> Result<String> {
    let end = offset.checked_add(length).filter(|&end| end <= bytes.len());
    let end = match end {
        Some(end) if offset <= length => end,
        _ => {
            return Err(BridgeError::InvalidRange {
                offset,
                length,
                available: bytes.len(),
            })
        }
    };

    let mut out = String::with_capacity(length * 2);
    for &byte in &bytes[offset..end] {
        push_escaped(&mut out, byte, printable);
    }
    Ok(out)
}

/// Escape a whole burst (printable mode)
///
/// Convenience for log lines; never fails.
pub fn escape_burst(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        push_escaped(&mut out, byte, true);
    }
    out
}

fn push_escaped(out: &mut String, byte: u8, printable: bool) {
    if printable {
        match byte {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            ACK => out.push_str("<ACK>"),
            CAN => out.push_str("<CAN>"),
            NAK => out.push_str("<NAK>"),
            0x20..=0x7e => out.push(byte as char),
            _ => push_hex(out, byte),
        }
    } else {
        push_hex(out, byte);
    }
}

#[inline]
fn push_hex(out: &mut String, byte: u8) {
    // Writing to a String cannot fail
    let _ = write!(out, "<0x{:02x}>", byte);
}
