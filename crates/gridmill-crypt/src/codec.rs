//! Hex envelope codec
//!
//! Signatures, encrypted blocks, and key payloads all travel in the same
//! printable envelope: two lowercase hex chars per byte, a newline every 32
//! bytes, and a final line holding a single `.` as the terminator. The
//! decoder scans hex pairs greedily, tolerates interleaved whitespace, and
//! treats the first non-hex token as the end of the payload.

use crate::error::{CryptError, Result};

/// Bytes per output line when hex-encoding (64 hex chars).
const BYTES_PER_LINE: usize = 32;

/// Encode a byte block in the hex-with-dot-terminator convention.
pub fn encode_hex_block(data: &[u8]) -> String {
    // 2 hex chars per byte, one newline per line, terminator line.
    let mut out = String::with_capacity(data.len() * 2 + data.len() / BYTES_PER_LINE + 4);
    for chunk in data.chunks(BYTES_PER_LINE) {
        out.push_str(&hex::encode(chunk));
        out.push('\n');
    }
    out.push_str(".\n");
    out
}

/// Decode a hex block, stopping at the first non-hex token.
///
/// Whitespace between pairs is skipped. Fails with [`CryptError::Overflow`]
/// if the decoded payload would exceed `max_len`.
pub fn decode_hex_block(text: &str, max_len: usize) -> Result<Vec<u8>> {
    scan_hex_pairs(text, max_len, Limit::ErrorOnExcess)
}

/// Decode exactly `len` bytes of hex from `text`.
///
/// Used by the key codec, where the payload length is fixed by the key
/// structure: a terminator arriving early is a format error.
pub fn decode_hex_exact(text: &str, len: usize) -> Result<Vec<u8>> {
    let bytes = scan_hex_pairs(text, len, Limit::StopAtLimit)?;
    if bytes.len() < len {
        return Err(CryptError::Format(format!(
            "hex payload too short: expected {} bytes, got {}",
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Raw binary passthrough with a capacity check.
///
/// Interop hook for external tools that emit signatures as raw bytes rather
/// than the hex envelope.
pub fn decode_raw(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    if data.len() > max_len {
        return Err(CryptError::Overflow {
            len: data.len(),
            max: max_len,
        });
    }
    Ok(data.to_vec())
}

/// Raw binary passthrough, the encoding half of [`decode_raw`].
pub fn encode_raw(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

/// How the scanner treats the byte limit.
enum Limit {
    /// Hex beyond the limit is an [`CryptError::Overflow`].
    ErrorOnExcess,
    /// Stop reading once the limit is reached; trailing text is ignored.
    StopAtLimit,
}

/// Scan hex pairs from `text`.
///
/// Stops at the first character that is neither a hex digit nor ASCII
/// whitespace. A dangling single hex digit is a format error.
fn scan_hex_pairs(text: &str, limit: usize, mode: Limit) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pending: Option<u8> = None;

    for c in text.chars() {
        if out.len() == limit {
            if matches!(mode, Limit::StopAtLimit) {
                return Ok(out);
            }
            if !c.is_ascii_whitespace() && c.to_digit(16).is_some() {
                return Err(CryptError::Overflow {
                    len: limit + 1,
                    max: limit,
                });
            }
            continue;
        }
        if c.is_ascii_whitespace() && pending.is_none() {
            continue;
        }
        let Some(digit) = c.to_digit(16) else {
            if pending.is_some() {
                return Err(CryptError::Format(format!(
                    "dangling hex digit before {c:?}"
                )));
            }
            break;
        };
        match pending.take() {
            None => pending = Some(digit as u8),
            Some(hi) => out.push(hi << 4 | digit as u8),
        }
    }
    if pending.is_some() {
        return Err(CryptError::Format("truncated trailing hex pair".into()));
    }
    Ok(out)
}
