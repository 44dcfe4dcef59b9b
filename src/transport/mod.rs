//! Socket and TLS plumbing.
//!
//! - **`tls`**: declarative TLS policy and its translation into rustls
//!   client configuration
//! - **`connection`**: one blocking TCP or TLS connection with deadlines
//! - **`adapter`**: the connect / write / read facade over a single connection

use std::time::{Duration, Instant};

use crate::error::Result;

pub mod adapter;
pub mod connection;
pub mod tls;

pub use adapter::SocketAdapter;
pub use connection::{Connection, SocketOptions, Target};
pub use tls::{ContextOptions, TlsConfig, TlsContextBuilder};

/// Byte stream the request writer and response reader run over.
pub trait Transport {
    /// Writes some prefix of `buf`. `Ok(0)` is not an error: nothing was
    /// accepted this time and the caller should retry.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reads into `buf`, waiting at most `timeout`. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Point in time a blocking operation has to finish by.
///
/// A timeout too large to add to the current instant means no deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Time left; zero once expired, `Duration::MAX` when unbounded.
    pub(crate) fn remaining(&self) -> Duration {
        match self.0 {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }
}
