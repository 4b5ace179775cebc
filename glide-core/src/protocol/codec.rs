//! RESP2 encoder and incremental decoder

use super::value::Value;
use crate::error::{GlideError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Maximum accepted bulk string length (512 MB, the server's own limit)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(args: &[Vec<u8>], buf: &mut BytesMut) {
    let len: usize = args.iter().map(|a| a.len() + 16).sum();
    buf.reserve(len + 16);

    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");

    for arg in args {
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Decode one complete reply from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; consumed bytes are removed
/// from the buffer only when a full reply was parsed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Value>> {
    match parse(&buf[..], 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Find the `\r\n` terminated line starting at `pos`
fn read_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = data.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            GlideError::Protocol(format!(
                "invalid integer: {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn parse(data: &[u8], pos: usize) -> Result<Option<(Value, usize)>> {
    let Some(&type_byte) = data.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(data, pos + 1) else {
        return Ok(None);
    };

    match type_byte {
        b'+' => Ok(Some((
            Value::Status(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            Value::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((Value::Int(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Value::Nil, next)));
            }
            if len > MAX_BULK_LEN {
                return Err(GlideError::Protocol(format!(
                    "bulk string too large: {}",
                    len
                )));
            }
            let len = len as usize;
            if data.len() < next + len + 2 {
                return Ok(None);
            }
            if &data[next + len..next + len + 2] != b"\r\n" {
                return Err(GlideError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            Ok(Some((
                Value::BulkString(data[next..next + len].to_vec()),
                next + len + 2,
            )))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Ok(Some((Value::Nil, next)));
            }
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            let mut cursor = next;
            for _ in 0..count {
                match parse(data, cursor)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), cursor)))
        }
        other => Err(GlideError::Protocol(format!(
            "unknown reply type byte: 0x{:02x}",
            other
        ))),
    }
}
