use bytes::Bytes;

use crate::http::header::Header;

/// The first line of a response: `HTTP/1.1 200 OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Protocol version as sent by the server (e.g. "HTTP/1.1")
    pub version: String,
    /// Three-digit status code
    pub code: u16,
    /// Reason phrase, possibly empty
    pub reason: String,
}

impl StatusLine {
    /// 1xx responses never carry a body.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this status forbids a body regardless of framing headers.
    pub fn forbids_body(&self) -> bool {
        self.is_informational() || self.code == 204 || self.code == 304
    }
}

/// How the body of a response was delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body (HEAD, 1xx, 204, 304)
    Empty,
    /// Exactly `Content-Length` bytes
    ContentLength(u64),
    /// Transfer-Encoding: chunked
    Chunked,
    /// Everything until the server closed the connection
    UntilClose,
}

/// A response as read off the wire.
///
/// The body is an opaque byte sequence; no text decoding is applied.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusLine,
    /// Headers in wire order, followed by any chunked trailers
    pub headers: Vec<Header>,
    pub body: Bytes,
    pub framing: BodyFraming,
    /// Bytes the server sent past the end of this response
    pub trailing_bytes: usize,
}

impl RawResponse {
    pub fn code(&self) -> u16 {
        self.status.code
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is_named(name))
            .map(|h| h.value().as_str())
    }

    /// All values of a header, in order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.is_named(name))
            .map(|h| h.value().as_str())
    }

    /// Whether the server allows this connection to carry another request.
    ///
    /// `Connection: close` always ends it; HTTP/1.0 needs an explicit
    /// `keep-alive`; a close-delimited body consumed the connection. Stray
    /// bytes after the response leave the stream out of step, so they end it
    /// too.
    pub fn keep_alive(&self) -> bool {
        if self.framing == BodyFraming::UntilClose || self.trailing_bytes > 0 {
            return false;
        }
        let tokens: Vec<String> = self
            .header_values("Connection")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .collect();

        if tokens.iter().any(|t| t == "close") {
            return false;
        }
        if self.status.version == "HTTP/1.0" {
            return tokens.iter().any(|t| t == "keep-alive");
        }
        true
    }
}
