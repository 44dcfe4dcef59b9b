//! Incremental decoder for `Transfer-Encoding: chunked` bodies.
//!
//! ```text
//!   Size ──(n > 0)──▶ Data ──(n bytes)──▶ DataEnd ──(CRLF)──▶ Size
//!     │
//!     └──(n == 0)──▶ Trailer ──(empty line)──▶ Done
//! ```
//!
//! Input may be split at any byte. Chunk payloads are counted in bytes and
//! copied untouched, so a multibyte character spanning two chunks comes out
//! exactly as it went in.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::http::header::{self, Header};

const MAX_SIZE_LINE: usize = 1024;
const MAX_TRAILER_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Size,
    Data,
    DataEnd,
    Trailer,
    Done,
}

/// Transient state while a chunked body is being decoded.
#[derive(Debug, Default)]
pub struct ChunkState {
    /// Bytes still expected for the current chunk
    pub remaining: usize,
    /// The zero-size chunk has been read
    pub terminal_seen: bool,
    /// Trailer headers seen after the terminal chunk
    pub trailers: Vec<Header>,
    trailer_bytes: usize,
}

#[derive(Debug)]
pub struct ChunkedDecoder {
    phase: Phase,
    state: ChunkState,
    body: BytesMut,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::Size,
            state: ChunkState::default(),
            body: BytesMut::new(),
        }
    }

    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Payload bytes decoded so far.
    pub fn decoded_len(&self) -> usize {
        self.body.len()
    }

    /// Consumes as much of `input` as it can.
    ///
    /// Returns `Ok(true)` once the final empty line after the trailers has
    /// been read; bytes after it are left in `input`. `Ok(false)` means more
    /// input is needed.
    pub fn decode(&mut self, input: &mut BytesMut) -> Result<bool> {
        loop {
            match self.phase {
                Phase::Size => {
                    let Some(line) = take_line(input, MAX_SIZE_LINE)? else {
                        return Ok(false);
                    };
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.state.terminal_seen = true;
                        self.phase = Phase::Trailer;
                    } else {
                        self.state.remaining = size;
                        self.phase = Phase::Data;
                    }
                }

                Phase::Data => {
                    if input.is_empty() {
                        return Ok(false);
                    }
                    let n = self.state.remaining.min(input.len());
                    self.body.extend_from_slice(&input[..n]);
                    input.advance(n);
                    self.state.remaining -= n;
                    if self.state.remaining == 0 {
                        self.phase = Phase::DataEnd;
                    }
                }

                Phase::DataEnd => {
                    match (input.first().copied(), input.get(1).copied()) {
                        (None, _) | (Some(b'\r'), None) => return Ok(false),
                        (Some(b'\r'), Some(b'\n')) => input.advance(2),
                        (Some(b'\n'), _) => input.advance(1),
                        _ => {
                            return Err(Error::Protocol(
                                "chunk data not followed by CRLF".to_string(),
                            ));
                        }
                    }
                    self.phase = Phase::Size;
                }

                Phase::Trailer => {
                    let Some(line) = take_line(input, MAX_TRAILER_BYTES)? else {
                        return Ok(false);
                    };
                    if line.is_empty() {
                        self.phase = Phase::Done;
                        return Ok(true);
                    }

                    self.state.trailer_bytes += line.len();
                    if self.state.trailer_bytes > MAX_TRAILER_BYTES {
                        return Err(Error::Protocol("chunked trailers too large".to_string()));
                    }
                    let text = std::str::from_utf8(&line)
                        .map_err(|_| Error::Protocol("trailer is not valid UTF-8".to_string()))?;
                    let trailer = header::parse(text)
                        .map_err(|e| Error::Protocol(format!("malformed trailer: {}", e)))?;
                    self.state.trailers.push(trailer);
                }

                Phase::Done => return Ok(true),
            }
        }
    }

    /// Decoded body and trailers. Fails if the terminal chunk was never seen.
    pub fn finish(self) -> Result<(Bytes, Vec<Header>)> {
        if self.phase != Phase::Done {
            return Err(Error::Protocol("truncated chunked body".to_string()));
        }
        Ok((self.body.freeze(), self.state.trailers))
    }
}

/// Decodes a complete chunked body held in memory.
///
/// # Example
///
/// ```
/// # use sockwire::http::chunked::decode_chunked;
/// let (body, trailers) = decode_chunked(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n").unwrap();
/// assert_eq!(&body[..], b"Wikipedia");
/// assert!(trailers.is_empty());
/// ```
pub fn decode_chunked(input: &[u8]) -> Result<(Bytes, Vec<Header>)> {
    let mut buf = BytesMut::from(input);
    let mut decoder = ChunkedDecoder::new();
    decoder.decode(&mut buf)?;
    decoder.finish()
}

/// Splits one LF-terminated line off the front of `input`, without its
/// terminator (a preceding CR is dropped too).
fn take_line(input: &mut BytesMut, max: usize) -> Result<Option<BytesMut>> {
    let Some(pos) = input.iter().position(|&b| b == b'\n') else {
        if input.len() > max {
            return Err(Error::Protocol("chunk framing line too long".to_string()));
        }
        return Ok(None);
    };
    if pos > max {
        return Err(Error::Protocol("chunk framing line too long".to_string()));
    }

    let mut line = input.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }
    Ok(Some(line))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("chunk size is not ASCII".to_string()))?;

    // Chunk extensions (";name=value") are ignored.
    let hex = text
        .split(';')
        .next()
        .unwrap_or_default()
        .trim_matches(|c| c == ' ' || c == '\t');

    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Protocol(format!("invalid chunk size: {:?}", text)));
    }
    usize::from_str_radix(hex, 16)
        .map_err(|_| Error::Protocol(format!("chunk size out of range: {}", hex)))
}
