//! Streaming RESP parser.
//!
//! [`parse`] takes a byte buffer and returns `Ok((RespValue, bytes_consumed))`
//! or `Err(Incomplete)` when more data is needed, or `Err(Protocol(…))` on
//! malformed input.
//!
//! [`resp_frame_len`] answers "is a whole reply buffered yet, and how long
//! is it" without allocating, so the connection only materializes a
//! `RespValue` once every byte of the reply has arrived.

use bytes::Bytes;
use crate::error::{Error, Result};
use crate::resp::types::RespValue;
use memchr::memchr;

/// Maximum number of elements accepted in a single array header.
///
/// Keeps a hostile `*2147483647\r\n` from reserving gigabytes before any
/// element has been read.
pub const MAX_RESP_ELEMENTS: usize = 16_777_216;

/// Maximum nesting depth for arrays.
pub const MAX_PARSE_DEPTH: usize = 512;

/// Parse one RESP value from the front of `buf`.
///
/// Returns `(value, bytes_consumed)` on success.
/// Returns `Err(Incomplete)` when the buffer is too short,
/// callers should read more data and retry.
///
/// Bulk strings are zero-copy `slice()`s of `buf`.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    parse_at(buf, 0, 0)
}

/// Convenience wrapper: parse from a byte slice (copies into `Bytes` first).
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

/// Compute the byte length of one complete RESP frame at the front of `buf`
/// without allocating or building a `RespValue` tree.
///
/// Returns `Ok(bytes_consumed)` or `Err(Incomplete)`.
pub fn resp_frame_len(buf: &[u8]) -> Result<usize> {
    frame_len_at(buf, 0, 0)
}

fn frame_len_at(buf: &[u8], start: usize, depth: usize) -> Result<usize> {
    if start >= buf.len() {
        return Err(Error::Incomplete);
    }
    match buf[start] {
        b'+' | b'-' | b':' => {
            let (_, next) = read_line(buf, start + 1)?;
            Ok(next - start)
        }
        b'$' => {
            let (line, next) = read_line(buf, start + 1)?;
            let Some(len) = length_header(line)? else {
                return Ok(next - start); // $-1\r\n  null bulk
            };
            let total = next + len + 2;
            if buf.len() < total {
                return Err(Error::Incomplete);
            }
            Ok(total - start)
        }
        b'*' => {
            let (line, mut next) = read_line(buf, start + 1)?;
            let Some(count) = length_header(line)? else {
                return Ok(next - start); // *-1\r\n  null array
            };
            check_aggregate(count, depth)?;
            for _ in 0..count {
                next += frame_len_at(buf, next, depth + 1)?;
            }
            Ok(next - start)
        }
        other => Err(unknown_type(other)),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn unknown_type(byte: u8) -> Error {
    Error::Protocol(format!("unknown RESP type byte: 0x{byte:02x}"))
}

/// Length of a `$` or `*` header. `-1` is the null marker (`None`); any
/// other negative value is malformed.
fn length_header(line: &[u8]) -> Result<Option<usize>> {
    match parse_int_from_bytes(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(Error::Protocol(format!("invalid length {n}"))),
        n => Ok(Some(n as usize)),
    }
}

fn check_aggregate(count: usize, depth: usize) -> Result<()> {
    if count > MAX_RESP_ELEMENTS {
        return Err(Error::Protocol(format!(
            "array of {count} elements exceeds limit of {MAX_RESP_ELEMENTS}"
        )));
    }
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::Protocol(format!(
            "array nesting exceeds {MAX_PARSE_DEPTH} levels"
        )));
    }
    Ok(())
}

/// Find the next `\r\n` in `buf` starting at `offset`.
/// Returns the index of `\r`.
#[inline]
fn find_crlf(buf: &[u8], offset: usize) -> Result<usize> {
    let search = &buf[offset..];
    match memchr(b'\r', search) {
        Some(pos) => {
            let abs = offset + pos;
            if abs + 1 < buf.len() && buf[abs + 1] == b'\n' {
                Ok(abs)
            } else if abs + 1 >= buf.len() {
                Err(Error::Incomplete)
            } else {
                Err(Error::Protocol("expected \\n after \\r".into()))
            }
        }
        None => Err(Error::Incomplete),
    }
}

/// Read the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
fn read_line(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let cr = find_crlf(buf, offset)?;
    Ok((&buf[offset..cr], cr + 2))
}

/// Parse an integer from a byte slice (no allocations).
fn parse_int_from_bytes(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Err(Error::Protocol("empty integer".into()));
    }
    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    if digits.is_empty() {
        return Err(Error::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative so i64::MIN does not overflow.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| Error::Protocol("integer overflow".into()))?;
    }

    if negative {
        Ok(n)
    } else {
        n.checked_neg()
            .ok_or_else(|| Error::Protocol("integer overflow".into()))
    }
}

fn utf8_line(line: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in {what}: {e}")))
}

// ── Type parsers ──────────────────────────────────────────────────

fn parse_at(buf: &Bytes, start: usize, depth: usize) -> Result<(RespValue, usize)> {
    if start >= buf.len() {
        return Err(Error::Incomplete);
    }

    let (value, end) = match buf[start] {
        b'+' => {
            let (line, next) = read_line(buf, start + 1)?;
            let s = match line {
                b"OK" => "OK".to_string(),
                b"QUEUED" => "QUEUED".to_string(),
                _ => utf8_line(line, "simple string")?,
            };
            (RespValue::SimpleString(s), next)
        }
        b'-' => {
            let (line, next) = read_line(buf, start + 1)?;
            (RespValue::Error(utf8_line(line, "error")?), next)
        }
        b':' => {
            let (line, next) = read_line(buf, start + 1)?;
            (RespValue::Integer(parse_int_from_bytes(line)?), next)
        }
        b'$' => parse_bulk_string(buf, start)?,
        b'*' => parse_array(buf, start, depth)?,
        other => return Err(unknown_type(other)),
    };
    Ok((value, end - start))
}

/// `$<length>\r\n<data>\r\n`  or  `$-1\r\n`
///
/// Returns the absolute end offset.
fn parse_bulk_string(buf: &Bytes, start: usize) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, start + 1)?;
    let Some(len) = length_header(line)? else {
        return Ok((RespValue::Null, next));
    };

    let data_end = next + len;
    if buf.len() < data_end + 2 {
        return Err(Error::Incomplete);
    }
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(Error::Protocol(
            "bulk string not terminated by \\r\\n".into(),
        ));
    }

    Ok((RespValue::BulkString(buf.slice(next..data_end)), data_end + 2))
}

/// `*<count>\r\n<elements>`  or  `*-1\r\n`
///
/// Returns the absolute end offset.
fn parse_array(buf: &Bytes, start: usize, depth: usize) -> Result<(RespValue, usize)> {
    let (line, mut next) = read_line(buf, start + 1)?;
    let Some(count) = length_header(line)? else {
        return Ok((RespValue::Null, next));
    };
    check_aggregate(count, depth)?;

    // Cap the up-front reservation; a real reply grows past it naturally.
    let mut elements = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let (val, consumed) = parse_at(buf, next, depth + 1)?;
        elements.push(val);
        next += consumed;
    }
    Ok((RespValue::Array(elements), next))
}

// ── Tests ──────────────────────────────────────────────────────────
