use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// Longest header line accepted while looking for CRLF.
pub const MAX_LINE_LEN: usize = 64 * 1024;
/// Largest element count accepted in a request header.
pub const MAX_ARGS: i64 = 1024 * 1024;
/// Largest bulk argument accepted (512MB, same as Redis).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Upper bound on span slots reserved up front for one request.
const INITIAL_SPANS: usize = 1024;

/// A reply on the client-facing wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n  or  $-1\r\n (null)
    BulkString(Option<Bytes>),
    /// *2\r\n...  or  *-1\r\n (null)
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Serialize this value to RESP bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Write RESP bytes into the given buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
            RespValue::Array(Some(items)) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}

/// One decoded client request: the command name followed by its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    parts: Vec<Bytes>,
}

impl Request {
    /// Callers guarantee `parts` is non-empty; the decoder rejects empty frames.
    pub fn new(parts: Vec<Bytes>) -> Self {
        debug_assert!(!parts.is_empty());
        Request { parts }
    }

    /// Command name, trimmed and upper-cased for dispatch.
    pub fn command_name(&self) -> String {
        String::from_utf8_lossy(&self.parts[0])
            .trim()
            .to_ascii_uppercase()
    }

    pub fn into_args(mut self) -> Vec<Bytes> {
        self.parts.split_off(1)
    }
}

/// Strict request decoder: `*N\r\n` followed by N `$L\r\n<L bytes>\r\n` elements.
///
/// Handles partial reads: returns `Ok(None)` and leaves the buffer untouched
/// until a whole request is available, then consumes exactly that request.
/// Elements already parsed are remembered between calls, so the caller must
/// only append to `buf` while a request is pending.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    pending: Option<Pending>,
    #[cfg(test)]
    lines_read: usize,
}

/// A request whose header and leading elements have been parsed.
#[derive(Debug)]
struct Pending {
    remaining: usize,
    /// Offset of the next element header.
    pos: usize,
    spans: Vec<Range<usize>>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, FrameError> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.decode_header(buf)? {
                Some(pending) => pending,
                None => return Ok(None),
            },
        };

        while pending.remaining > 0 {
            match self.decode_element(buf, pending.pos)? {
                Some((span, next)) => {
                    pending.spans.push(span);
                    pending.pos = next;
                    pending.remaining -= 1;
                }
                None => {
                    self.pending = Some(pending);
                    return Ok(None);
                }
            }
        }

        let frame = buf.split_to(pending.pos).freeze();
        let parts = pending
            .spans
            .into_iter()
            .map(|span| frame.slice(span))
            .collect();
        Ok(Some(Request::new(parts)))
    }

    fn decode_header(&mut self, buf: &[u8]) -> Result<Option<Pending>, FrameError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let mut pos = 0;
        let header = match self.read_line(buf, &mut pos)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if header.first() != Some(&b'*') {
            return Err(FrameError::UnexpectedByte {
                expected: '*',
                line: String::from_utf8_lossy(header).into_owned(),
            });
        }
        let count = parse_int(&header[1..])?;
        if count <= 0 {
            return Err(FrameError::EmptyRequest);
        }
        if count > MAX_ARGS {
            return Err(FrameError::TooManyArgs);
        }
        let count = count as usize;
        Ok(Some(Pending {
            remaining: count,
            pos,
            spans: Vec::with_capacity(count.min(INITIAL_SPANS)),
        }))
    }

    /// Parse the element at `pos`, returning its payload span and the offset
    /// after it, or `None` if it is not fully buffered yet.
    fn decode_element(
        &mut self,
        buf: &[u8],
        mut pos: usize,
    ) -> Result<Option<(Range<usize>, usize)>, FrameError> {
        let line = match self.read_line(buf, &mut pos)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if line.first() != Some(&b'$') {
            return Err(FrameError::UnexpectedByte {
                expected: '$',
                line: String::from_utf8_lossy(line).into_owned(),
            });
        }
        let len = parse_int(&line[1..])?;
        if len < 0 {
            return Err(FrameError::NegativeLength);
        }
        if len > MAX_BULK_LEN {
            return Err(FrameError::BulkTooLarge);
        }

        let start = pos;
        let end = start + len as usize;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(FrameError::BadBulkTerminator);
        }
        Ok(Some((start..end, end + 2)))
    }

    fn read_line<'a>(
        &mut self,
        buf: &'a [u8],
        pos: &mut usize,
    ) -> Result<Option<&'a [u8]>, FrameError> {
        #[cfg(test)]
        {
            self.lines_read += 1;
        }
        read_line(buf, pos)
    }
}

fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a [u8]>, FrameError> {
    let rest = &buf[*pos..];
    let newline = match rest.iter().position(|&b| b == b'\n') {
        Some(i) => i,
        None => {
            if rest.len() > MAX_LINE_LEN {
                return Err(FrameError::LineTooLong);
            }
            return Ok(None);
        }
    };
    if newline > MAX_LINE_LEN {
        return Err(FrameError::LineTooLong);
    }
    if newline == 0 || rest[newline - 1] != b'\r' {
        return Err(FrameError::BadTerminator);
    }
    *pos += newline + 1;
    Ok(Some(&rest[..newline - 1]))
}

/// Base-10 integer with an optional leading `-`. No whitespace or `+` allowed.
pub fn parse_int(p: &[u8]) -> Result<i64, FrameError> {
    let (negate, digits) = match p.split_first() {
        None => return Err(FrameError::InvalidInteger),
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, p),
    };
    if digits.is_empty() {
        return Err(FrameError::InvalidInteger);
    }
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(FrameError::InvalidInteger);
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(i64::from(b - b'0')))
            .ok_or(FrameError::InvalidInteger)?;
    }
    Ok(if negate { -n } else { n })
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("expected '{expected}', got '{line}'")]
    UnexpectedByte { expected: char, line: String },

    #[error("invalid integer in length header")]
    InvalidInteger,

    #[error("empty request")]
    EmptyRequest,

    #[error("invalid multibulk length")]
    TooManyArgs,

    #[error("negative bulk length")]
    NegativeLength,

    #[error("invalid bulk length")]
    BulkTooLarge,

    #[error("bad line terminator")]
    BadTerminator,

    #[error("bad bulk string format")]
    BadBulkTerminator,

    #[error("line longer than buffer")]
    LineTooLong,
}
