//! Sockwire - blocking HTTP/1.x client transport
//!
//! Plain TCP or TLS connections, request serialization, and response
//! reading with chunked decoding.

pub mod config;
pub mod error;
pub mod http;
pub mod transport;

pub use error::{Error, ErrorKind, Result, TimeoutPhase};
