//! RESP2 (REdis Serialization Protocol) frames
//!
//! Decoding is incremental: an incomplete frame yields `Ok(None)` and leaves
//! the buffer untouched so the caller can read more bytes and retry. Lines
//! that do not start with a type marker are inline commands
//! (`PING\r\n`), as sent by telnet-style clients.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Maximum bulk string size (512MB)
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum array length (1M elements)
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum inline command line (64KB)
const MAX_INLINE_LEN: usize = 64 * 1024;

/// Maximum depth of nested arrays
const MAX_NESTING: usize = 32;

/// A single RESP2 value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`, or `$-1\r\n` for null
    Bulk(Option<Vec<u8>>),
    /// `*2\r\n...`, or `*-1\r\n` for null
    Array(Option<Vec<Frame>>),
}

/// Malformed input on the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Nested value with an unknown type marker
    #[error("unknown RESP type: {0}")]
    UnknownType(char),

    /// Length or integer field is not a number
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Simple string or error line is not UTF-8
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    /// Bulk string payload not followed by CRLF
    #[error("expected CRLF after bulk string")]
    MissingCrlf,

    /// Declared length is negative (other than -1)
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Bulk string larger than the limit
    #[error("bulk string too large: {0} bytes (max: {max} bytes)", max = MAX_BULK_LEN)]
    BulkTooLarge(usize),

    /// Array longer than the limit
    #[error("array too large: {0} elements (max: {max} elements)", max = MAX_ARRAY_LEN)]
    ArrayTooLarge(usize),

    /// Inline command line without CRLF past the limit
    #[error("inline command too long")]
    InlineTooLong,

    /// Arrays nested deeper than the limit
    #[error("nesting too deep (max: {max} levels)", max = MAX_NESTING)]
    NestingTooDeep,
}

type Decoded<T> = Result<Option<T>, ProtocolError>;

impl Frame {
    /// Simple `OK` reply
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    /// Error reply with the given message
    pub fn error(message: impl Into<String>) -> Frame {
        Frame::Error(message.into())
    }

    /// Non-null bulk string
    pub fn bulk(data: impl Into<Vec<u8>>) -> Frame {
        Frame::Bulk(Some(data.into()))
    }

    /// Null bulk string
    pub fn null() -> Frame {
        Frame::Bulk(None)
    }

    /// Append the wire form of this frame to `out`
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(out, b'+', s.as_bytes()),
            Frame::Error(e) => put_line(out, b'-', e.as_bytes()),
            Frame::Integer(i) => put_line(out, b':', i.to_string().as_bytes()),
            Frame::Bulk(None) => out.put_slice(b"$-1\r\n"),
            Frame::Bulk(Some(data)) => {
                put_line(out, b'$', data.len().to_string().as_bytes());
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            Frame::Array(None) => out.put_slice(b"*-1\r\n"),
            Frame::Array(Some(items)) => {
                put_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Wire form of this frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out.to_vec()
    }

    /// Decode one frame from the front of `buf`
    ///
    /// Consumes the frame's bytes on success; leaves `buf` as is when more
    /// data is needed.
    pub fn decode(buf: &mut BytesMut) -> Decoded<Frame> {
        if buf.is_empty() {
            return Ok(None);
        }

        let (frame, used) = {
            let mut parser = Parser { input: &buf[..], pos: 0 };
            let frame = if is_type_marker(buf[0]) {
                parser.frame(0)?
            } else {
                parser.inline()?
            };
            (frame, parser.pos)
        };

        if frame.is_some() {
            buf.advance(used);
        }
        Ok(frame)
    }
}

fn put_line(out: &mut BytesMut, marker: u8, body: &[u8]) {
    out.put_u8(marker);
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

fn is_type_marker(byte: u8) -> bool {
    matches!(byte, b'+' | b'-' | b':' | b'$' | b'*')
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn frame(&mut self, depth: usize) -> Decoded<Frame> {
        let Some(&marker) = self.input.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        match marker {
            b'+' => Ok(self.text()?.map(Frame::Simple)),
            b'-' => Ok(self.text()?.map(Frame::Error)),
            b':' => Ok(self.integer()?.map(Frame::Integer)),
            b'$' => self.bulk(),
            b'*' => self.array(depth),
            other => Err(ProtocolError::UnknownType(other as char)),
        }
    }

    fn bulk(&mut self) -> Decoded<Frame> {
        let Some(len) = self.length(MAX_BULK_LEN, ProtocolError::BulkTooLarge)? else {
            return Ok(None);
        };
        let Some(len) = len else {
            return Ok(Some(Frame::Bulk(None)));
        };

        if self.input.len() - self.pos < len + 2 {
            return Ok(None);
        }

        let data = self.input[self.pos..self.pos + len].to_vec();
        if &self.input[self.pos + len..self.pos + len + 2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf);
        }
        self.pos += len + 2;

        Ok(Some(Frame::Bulk(Some(data))))
    }

    fn array(&mut self, depth: usize) -> Decoded<Frame> {
        if depth >= MAX_NESTING {
            return Err(ProtocolError::NestingTooDeep);
        }

        let Some(len) = self.length(MAX_ARRAY_LEN, ProtocolError::ArrayTooLarge)? else {
            return Ok(None);
        };
        let Some(len) = len else {
            return Ok(Some(Frame::Array(None)));
        };

        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            match self.frame(depth + 1)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }

        Ok(Some(Frame::Array(Some(items))))
    }

    fn inline(&mut self) -> Decoded<Frame> {
        let Some(line) = self.line() else {
            if self.input.len() > MAX_INLINE_LEN {
                return Err(ProtocolError::InlineTooLong);
            }
            return Ok(None);
        };

        let words = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|word| !word.is_empty())
            .map(|word| Frame::Bulk(Some(word.to_vec())))
            .collect();

        Ok(Some(Frame::Array(Some(words))))
    }

    // Outer None: need more data. Inner None: null (-1).
    fn length(
        &mut self,
        max: usize,
        too_large: fn(usize) -> ProtocolError,
    ) -> Decoded<Option<usize>> {
        let Some(len) = self.integer()? else {
            return Ok(None);
        };

        match len {
            -1 => Ok(Some(None)),
            len if len < 0 => Err(ProtocolError::InvalidLength(len)),
            len if len as u64 > max as u64 => Err(too_large(len as usize)),
            len => Ok(Some(Some(len as usize))),
        }
    }

    fn integer(&mut self) -> Decoded<i64> {
        let Some(line) = self.line() else {
            return Ok(None);
        };

        let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))
    }

    fn text(&mut self) -> Decoded<String> {
        let Some(line) = self.line() else {
            return Ok(None);
        };

        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn line(&mut self) -> Option<&'a [u8]> {
        let input: &'a [u8] = self.input;
        let rest = &input[self.pos..];
        let end = rest.windows(2).position(|window| window == b"\r\n")?;
        self.pos += end + 2;
        Some(&rest[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(data: &[u8]) -> Frame {
        let mut buf = BytesMut::from(data);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        frame
    }

    #[test]
    fn test_scalar_frames() {
        assert_eq!(decode_all(b"+OK\r\n"), Frame::ok());
        assert_eq!(decode_all(b"-ERR boom\r\n"), Frame::error("ERR boom"));
        assert_eq!(decode_all(b":-42\r\n"), Frame::Integer(-42));
        assert_eq!(decode_all(b"$6\r\nfoobar\r\n"), Frame::bulk("foobar"));
        assert_eq!(decode_all(b"$0\r\n\r\n"), Frame::bulk(""));
        assert_eq!(decode_all(b"$-1\r\n"), Frame::null());
        assert_eq!(decode_all(b"*-1\r\n"), Frame::Array(None));
    }

    #[test]
    fn test_command_array() {
        let frame = decode_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
        assert_eq!(
            frame,
            Frame::Array(Some(vec![
                Frame::bulk("SET"),
                Frame::bulk("key"),
                Frame::bulk("value"),
            ]))
        );
    }

    #[test]
    fn test_encode() {
        let reply = Frame::Array(Some(vec![Frame::bulk("a"), Frame::null(), Frame::Integer(3)]));
        assert_eq!(reply.to_bytes(), b"*3\r\n$1\r\na\r\n$-1\r\n:3\r\n");
        assert_eq!(Frame::error("ERR no").to_bytes(), b"-ERR no\r\n");
    }

    #[test]
    fn test_bulk_with_crlf_in_payload() {
        let frame = decode_all(b"$4\r\na\r\nb\r\n");
        assert_eq!(frame, Frame::bulk("a\r\nb"));
    }

    #[test]
    fn test_incomplete_frames_leave_buffer() {
        let partials: [&[u8]; 6] = [
            b"$6\r\nfoo",
            b"$6\r\nfoobar",
            b"*2\r\n$3\r\nfoo\r\n",
            b"*2\r\n$3\r\nfoo\r\n$3\r\nba",
            b"+OK",
            b"PING",
        ];
        for partial in partials {
            let mut buf = BytesMut::from(partial);
            assert_eq!(Frame::decode(&mut buf).unwrap(), None);
            assert_eq!(&buf[..], partial);
        }
    }

    #[test]
    fn test_pipelined_frames() {
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\n"[..]);

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Frame::Array(Some(vec![Frame::bulk("PING")])));

        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            second,
            Frame::Array(Some(vec![Frame::bulk("GET"), Frame::bulk("a")]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_inline_command() {
        let frame = decode_all(b"SET  greeting hello\r\n");
        assert_eq!(
            frame,
            Frame::Array(Some(vec![
                Frame::bulk("SET"),
                Frame::bulk("greeting"),
                Frame::bulk("hello"),
            ]))
        );
    }

    #[test]
    fn test_malformed_input() {
        let mut buf = BytesMut::from(&b"$abc\r\n"[..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::InvalidInteger(_))
        ));

        let mut buf = BytesMut::from(&b"$3\r\nfooXX"[..]);
        assert_eq!(Frame::decode(&mut buf), Err(ProtocolError::MissingCrlf));

        let mut buf = BytesMut::from(&b"*-5\r\n"[..]);
        assert_eq!(Frame::decode(&mut buf), Err(ProtocolError::InvalidLength(-5)));
    }

    #[test]
    fn test_unknown_nested_type() {
        let mut buf = BytesMut::from(&b"*1\r\n?x\r\n"[..]);
        assert_eq!(Frame::decode(&mut buf), Err(ProtocolError::UnknownType('?')));
    }

    #[test]
    fn test_size_limits() {
        let mut buf = BytesMut::from(format!("${}\r\n", MAX_BULK_LEN + 1).as_bytes());
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::BulkTooLarge(_))
        ));

        let mut buf = BytesMut::from(format!("*{}\r\n", MAX_ARRAY_LEN + 1).as_bytes());
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::ArrayTooLarge(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut nested = b"*1\r\n".repeat(MAX_NESTING);
        nested.extend_from_slice(b":1\r\n");
        let mut buf = BytesMut::from(&nested[..]);
        let mut frame = Frame::decode(&mut buf).unwrap().unwrap();
        for _ in 0..MAX_NESTING {
            let Frame::Array(Some(mut items)) = frame else {
                panic!("Expected array");
            };
            frame = items.remove(0);
        }
        assert_eq!(frame, Frame::Integer(1));

        let mut buf = BytesMut::from(&b"*1\r\n".repeat(MAX_NESTING + 1)[..]);
        assert_eq!(Frame::decode(&mut buf), Err(ProtocolError::NestingTooDeep));
    }

    #[test]
    fn test_deep_nesting_fails_without_overflow() {
        let mut buf = BytesMut::from(&b"*1\r\n".repeat(500_000)[..]);
        assert_eq!(Frame::decode(&mut buf), Err(ProtocolError::NestingTooDeep));
    }
}
