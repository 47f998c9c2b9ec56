//! RESP2 encoder and decoder for the backend session.
//!
//! Only what a lookup needs is supported on the way out (a command as an
//! array of bulk strings). Replies are decoded in full so any reply type
//! the store sends can be consumed and mapped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Hard cap on a single bulk string reply (512 MiB, the store's own limit).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Hard cap on array length in a reply.
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Hard cap on array nesting in a reply.
const MAX_DEPTH: usize = 8;

/// A decoded reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`
    Simple(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`
    Bulk(Bytes),
    /// `*N` followed by N values.
    Array(Vec<RespValue>),
    /// `$-1` or `*-1`.
    Null,
}

/// Framing violation in the reply stream. The session cannot recover from
/// one and is dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown reply type byte 0x{0:02x}")]
    UnknownType(u8),

    #[error("invalid length or integer: {0:?}")]
    InvalidNumber(String),

    #[error("bulk string of {0} bytes exceeds limit")]
    BulkTooLarge(usize),

    #[error("array of {0} elements exceeds limit")]
    ArrayTooLarge(usize),

    #[error("reply nesting too deep")]
    TooDeep,

    #[error("bulk string not terminated by CRLF")]
    MissingCrlf,
}

/// Append `GET <key>` to `dst` as a RESP array of bulk strings.
pub fn encode_get(key: &[u8], dst: &mut BytesMut) {
    encode_command(&[b"GET", key], dst);
}

/// Append an arbitrary command to `dst`.
pub fn encode_command(args: &[&[u8]], dst: &mut BytesMut) {
    dst.reserve(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    dst.put_u8(b'*');
    dst.put_slice(args.len().to_string().as_bytes());
    dst.put_slice(b"\r\n");
    for arg in args {
        dst.put_u8(b'$');
        dst.put_slice(arg.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

/// Decode one complete reply from the front of `src`.
///
/// Returns `Ok(None)` and leaves `src` untouched when more bytes are needed.
/// On success the consumed bytes are removed from `src`.
pub fn decode(src: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
    match parse(src, 0, 0)? {
        Some((value, consumed)) => {
            src.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Parse a value starting at `pos`; returns the value and the position just
/// past it.
fn parse(
    src: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::TooDeep);
    }
    let Some(&tag) = src.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(src, pos + 1) else {
        return Ok(None);
    };

    let value = match tag {
        b'+' => (RespValue::Simple(String::from_utf8_lossy(line).into_owned()), next),
        b'-' => (RespValue::Error(String::from_utf8_lossy(line).into_owned()), next),
        b':' => (RespValue::Integer(parse_int(line)?), next),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((RespValue::Null, next)));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkTooLarge(len));
            }
            let end = next + len;
            if src.len() < end + 2 {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf);
            }
            (RespValue::Bulk(Bytes::copy_from_slice(&src[next..end])), end + 2)
        }
        b'*' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((RespValue::Null, next)));
            }
            let len = len as usize;
            if len > MAX_ARRAY_LEN {
                return Err(ProtocolError::ArrayTooLarge(len));
            }
            let mut items = Vec::with_capacity(len.min(64));
            let mut cursor = next;
            for _ in 0..len {
                match parse(src, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            (RespValue::Array(items), cursor)
        }
        other => return Err(ProtocolError::UnknownType(other)),
    };
    Ok(Some(value))
}

/// Find the CRLF-terminated line starting at `pos`.
fn read_line(src: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = src.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidNumber(String::from_utf8_lossy(line).into_owned()))
}
