use std::time::Duration;

use crate::error::{Error, Result};
use crate::http::header;
use crate::http::request::{Request, validate_target};
use crate::transport::Transport;

/// Consecutive zero-byte writes tolerated before the socket is declared stalled.
pub const MAX_ZERO_WRITES: usize = 32;

/// Upper bound on the pause between zero-byte write retries.
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Serializes a request: request line, headers, blank line, body.
pub fn serialize_request(req: &Request) -> Result<Vec<u8>> {
    validate_target(&req.target)?;

    let mut buf = Vec::with_capacity(256 + req.body.len());

    // Request line
    let request_line = format!(
        "{} {} {}\r\n",
        req.method.as_str(),
        req.target,
        req.version.as_str()
    );
    buf.extend_from_slice(request_line.as_bytes());

    // Headers
    for h in &req.headers {
        buf.extend_from_slice(header::format(h).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body, verbatim
    buf.extend_from_slice(&req.body);

    Ok(buf)
}

/// Pushes a serialized request onto a transport.
pub struct RequestWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl RequestWriter {
    pub fn new(request: &Request) -> Result<Self> {
        Ok(Self {
            buffer: serialize_request(request)?,
            written: 0,
        })
    }

    /// Bytes accepted by the transport so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Writes until every byte is accepted.
    ///
    /// A zero-byte write is retried after a short pause; any progress resets
    /// the count. More than [`MAX_ZERO_WRITES`] zero-byte writes in a row
    /// fails with [`Error::WriteStalled`].
    pub fn write_to<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<usize> {
        let mut zero_writes = 0usize;

        while self.written < self.buffer.len() {
            let n = transport.write(&self.buffer[self.written..])?;

            if n == 0 {
                zero_writes += 1;
                if zero_writes > MAX_ZERO_WRITES {
                    tracing::warn!(
                        written = self.written,
                        total = self.buffer.len(),
                        "write stalled"
                    );
                    return Err(Error::WriteStalled(zero_writes));
                }
                std::thread::sleep(backoff(zero_writes));
                continue;
            }

            zero_writes = 0;
            self.written += n;
        }

        transport.flush()?;
        tracing::trace!(bytes = self.written, "request written");
        Ok(self.written)
    }
}

fn backoff(attempt: usize) -> Duration {
    let shift = attempt.min(6) as u32;
    Duration::from_micros(100u64 << shift).min(MAX_BACKOFF)
}
