use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result, TimeoutPhase};
use crate::http::chunked::ChunkedDecoder;
use crate::http::header::Header;
use crate::http::parser::{ParseError, ResponseHead, parse_response_head};
use crate::http::request::Method;
use crate::http::response::{BodyFraming, RawResponse, StatusLine};
use crate::transport::{Deadline, Transport};

/// Default buffer size for socket reads
const BUFFER_SIZE: usize = 8192;

/// Reads one response off a transport.
///
/// A single deadline, `timeout` from the start of [`read_response`], covers
/// the status line, headers and body.
///
/// [`read_response`]: ResponseReader::read_response
#[derive(Debug, Clone)]
pub struct ResponseReader {
    timeout: Duration,
    expect_body: bool,
}

impl ResponseReader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            expect_body: true,
        }
    }

    /// Responses to HEAD carry headers only.
    pub fn for_method(mut self, method: Method) -> Self {
        self.expect_body = method.expects_response_body();
        self
    }

    pub fn read_response<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<RawResponse> {
        let mut src = Source {
            transport,
            buf: BytesMut::with_capacity(BUFFER_SIZE),
            deadline: Deadline::after(self.timeout),
            timeout: self.timeout,
        };

        loop {
            let head = self.read_head(&mut src)?;

            if head.status.is_informational() && head.status.code != 101 {
                tracing::trace!(status = head.status.code, "skipping interim response");
                continue;
            }

            let mut response = self.read_body(&mut src, head)?;
            if !src.buf.is_empty() {
                tracing::debug!(bytes = src.buf.len(), "discarding bytes after response");
                response.trailing_bytes = src.buf.len();
            }
            return Ok(response);
        }
    }

    fn read_head<T: Transport + ?Sized>(&self, src: &mut Source<'_, T>) -> Result<ResponseHead> {
        loop {
            match parse_response_head(&src.buf) {
                Ok((head, consumed)) => {
                    src.buf.advance(consumed);
                    return Ok(head);
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            if src.fill()? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    fn read_body<T: Transport + ?Sized>(
        &self,
        src: &mut Source<'_, T>,
        head: ResponseHead,
    ) -> Result<RawResponse> {
        let ResponseHead {
            status,
            mut headers,
        } = head;

        let framing = body_framing(&status, &headers, self.expect_body)?;
        let body = match framing {
            BodyFraming::Empty => Bytes::new(),
            BodyFraming::ContentLength(len) => src.read_exact(len)?,
            BodyFraming::Chunked => {
                let mut decoder = ChunkedDecoder::new();
                while !decoder.decode(&mut src.buf)? {
                    if src.fill()? == 0 {
                        return Err(Error::Protocol(
                            "connection closed inside chunked body".to_string(),
                        ));
                    }
                }
                let (body, trailers) = decoder.finish()?;
                headers.extend(trailers);
                body
            }
            BodyFraming::UntilClose => src.read_to_close()?,
        };

        tracing::debug!(
            status = status.code,
            body_bytes = body.len(),
            framing = ?framing,
            "response read"
        );

        Ok(RawResponse {
            status,
            headers,
            body,
            framing,
            trailing_bytes: 0,
        })
    }
}

/// Decides how the body is delimited.
///
/// Transfer-Encoding wins over Content-Length; only `chunked` as the final
/// coding is understood.
pub fn body_framing(status: &StatusLine, headers: &[Header], expect_body: bool) -> Result<BodyFraming> {
    if !expect_body || status.forbids_body() {
        return Ok(BodyFraming::Empty);
    }

    let codings: Vec<String> = headers
        .iter()
        .filter(|h| h.is_named("Transfer-Encoding"))
        .flat_map(|h| h.value().as_str().split(','))
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    if let Some(last) = codings.last() {
        if last == "chunked" {
            return Ok(BodyFraming::Chunked);
        }
        return Err(Error::Protocol(format!("cannot handle {} transfer encoding", last)));
    }

    let mut length: Option<u64> = None;
    for value in headers
        .iter()
        .filter(|h| h.is_named("Content-Length"))
        .flat_map(|h| h.value().as_str().split(','))
    {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Protocol(format!("invalid Content-Length: {:?}", value)));
        }
        let parsed: u64 = value
            .parse()
            .map_err(|_| Error::Protocol(format!("Content-Length out of range: {}", value)))?;
        match length {
            Some(prev) if prev != parsed => {
                return Err(Error::Protocol("conflicting Content-Length values".to_string()));
            }
            _ => length = Some(parsed),
        }
    }

    Ok(length.map_or(BodyFraming::UntilClose, BodyFraming::ContentLength))
}

/// Buffered view of the transport bounded by one deadline.
struct Source<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    buf: BytesMut,
    deadline: Deadline,
    timeout: Duration,
}

impl<T: Transport + ?Sized> Source<'_, T> {
    /// Reads once from the transport, appending to the buffer.
    fn fill(&mut self) -> Result<usize> {
        let remaining = self.deadline.remaining();
        if remaining.is_zero() {
            tracing::warn!(timeout = ?self.timeout, "response deadline expired");
            return Err(Error::timeout(TimeoutPhase::Read, self.timeout));
        }

        let mut chunk = [0u8; BUFFER_SIZE];
        let n = self
            .transport
            .read(&mut chunk, remaining)
            .map_err(|e| match e.timeout_phase() {
                Some(TimeoutPhase::Read) => Error::timeout(TimeoutPhase::Read, self.timeout),
                _ => e,
            })?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn read_exact(&mut self, len: u64) -> Result<Bytes> {
        let len = usize::try_from(len)
            .map_err(|_| Error::Protocol(format!("Content-Length too large: {}", len)))?;

        while self.buf.len() < len {
            if self.fill()? == 0 {
                return Err(Error::Protocol(format!(
                    "connection closed after {} of {} body bytes",
                    self.buf.len(),
                    len
                )));
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    fn read_to_close(&mut self) -> Result<Bytes> {
        while self.fill()? > 0 {}
        Ok(self.buf.split().freeze())
    }
}
