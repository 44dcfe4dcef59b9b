//! HTTP/1.x message handling for the client side of a connection.
//!
//! # Architecture
//!
//! - **`header`**: validated header values and the `Name: Value` codec
//! - **`request`**: outgoing request representation and builder
//! - **`writer`**: serializes requests and pushes them onto a transport
//! - **`parser`**: parses the response status line and header block
//! - **`reader`**: drives a transport until a full response is buffered
//! - **`chunked`**: incremental `Transfer-Encoding: chunked` decoder
//! - **`response`**: the raw response handed back to callers
//!
//! # Response State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │ StatusLine  │ ← Wait for the first line
//!        └──────┬──────┘
//!               │ (1xx interim → back to StatusLine)
//!               ▼
//!        ┌──────────────────┐
//!        │     Headers      │ ← Until the blank line
//!        └──────┬───────────┘
//!               │ Framing decided
//!               ▼
//!        ┌──────────────────┐
//!        │       Body       │ ← Content-Length, chunked, or until close
//!        └──────┬───────────┘
//!               ▼
//!             Done
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sockwire::http::reader::ResponseReader;
//! use sockwire::http::request::{Method, RequestBuilder};
//! use sockwire::http::writer::RequestWriter;
//!
//! let request = RequestBuilder::new(Method::GET)
//!     .target("/")
//!     .header("Host", "example.com")
//!     .build()?;
//! RequestWriter::new(&request)?.write_to(&mut conn)?;
//! let response = ResponseReader::new(timeout).read_response(&mut conn)?;
//! ```

pub mod chunked;
pub mod header;
pub mod parser;
pub mod reader;
pub mod request;
pub mod response;
pub mod writer;
