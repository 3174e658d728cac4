use bytes::{Buf, Bytes, BytesMut};

use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Largest accepted request line plus header section.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    UnsupportedTransferEncoding,
    HeadersTooLarge,
    PayloadTooLarge,
    Incomplete,
}

/// Request line and headers, before the body has arrived.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub headers: Headers,
}

/// How the body following a request head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(usize),
    Chunked,
}

impl RequestHead {
    pub fn into_request(self, body: Bytes) -> Request {
        Request {
            method: self.method,
            target: self.target,
            version: self.version,
            headers: self.headers,
            body,
        }
    }

    /// True if the caller waits for `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.version != "HTTP/1.0"
            && self
                .headers
                .get("Expect")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}

/// Parse the request line and headers.
///
/// Returns the head and the number of bytes consumed, including the blank
/// line that ends the header section.
pub fn parse_request_head(buf: &[u8]) -> Result<(RequestHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) if end > MAX_HEAD_SIZE => return Err(ParseError::HeadersTooLarge),
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let headers_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        if key.is_empty() || key.contains(|c: char| c.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    let head = RequestHead {
        method,
        target: target.to_string(),
        version: version.to_string(),
        headers,
    };

    Ok((head, headers_end + 4))
}

/// Work out how the body is framed and reject bodies over `max_body` early.
pub fn body_framing(headers: &Headers, max_body: usize) -> Result<BodyFraming, ParseError> {
    if headers.contains("Transfer-Encoding") {
        let last = headers
            .get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .last();

        return match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
            _ => Err(ParseError::UnsupportedTransferEncoding),
        };
    }

    let mut length: Option<usize> = None;
    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength)?;

        match length {
            Some(existing) if existing != parsed => return Err(ParseError::InvalidContentLength),
            _ => length = Some(parsed),
        }
    }

    match length {
        None | Some(0) => Ok(BodyFraming::None),
        Some(n) if n > max_body => Err(ParseError::PayloadTooLarge),
        Some(n) => Ok(BodyFraming::Length(n)),
    }
}

/// Longest accepted chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

/// Incremental decoder for a chunked request body.
///
/// Bytes are consumed from the front of the connection buffer as they
/// arrive, so each byte is looked at once no matter how the body is split
/// across reads.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
    body: BytesMut,
    max_body: usize,
    trailer_bytes: usize,
}

impl ChunkedDecoder {
    pub fn new(max_body: usize) -> Self {
        Self {
            state: ChunkState::Size,
            body: BytesMut::new(),
            max_body,
            trailer_bytes: 0,
        }
    }

    /// Consume what `buf` holds of the body.
    ///
    /// Returns `Ok(None)` when more input is needed, and the decoded payload
    /// once the last chunk and the trailer section have been read.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ParseError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(buf) else {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(ParseError::InvalidChunk);
                        }
                        return Ok(None);
                    };

                    let size = parse_chunk_size(&buf[..line_end])?;
                    buf.advance(line_end + 2);

                    if size == 0 {
                        self.state = ChunkState::Trailers;
                    } else if self.body.len().saturating_add(size) > self.max_body {
                        return Err(ParseError::PayloadTooLarge);
                    } else {
                        self.state = ChunkState::Data(size);
                    }
                }
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(None);
                    }

                    let take = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf[..take]);
                    buf.advance(take);

                    self.state = match remaining - take {
                        0 => ChunkState::DataEnd,
                        left => ChunkState::Data(left),
                    };
                }
                ChunkState::DataEnd => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunk);
                    }
                    buf.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line_end) = find_crlf(buf) else {
                        if self.trailer_bytes + buf.len() > MAX_HEAD_SIZE {
                            return Err(ParseError::HeadersTooLarge);
                        }
                        return Ok(None);
                    };

                    buf.advance(line_end + 2);

                    if line_end == 0 {
                        self.state = ChunkState::Size;
                        self.trailer_bytes = 0;
                        return Ok(Some(std::mem::take(&mut self.body).freeze()));
                    }

                    self.trailer_bytes += line_end + 2;
                    if self.trailer_bytes > MAX_HEAD_SIZE {
                        return Err(ParseError::HeadersTooLarge);
                    }
                }
            }
        }
    }
}

/// Chunk extensions follow a ';' and are ignored.
fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    let size = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
