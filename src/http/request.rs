use bytes::Bytes;

use crate::error::{Error, Result};
use crate::http::header::Header;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but the response carries no body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Loop-back of the request message
    TRACE,
    /// CONNECT - Tunnel through a proxy
    CONNECT,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Example
    ///
    /// ```
    /// # use sockwire::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
        }
    }

    /// Whether a response to this method can carry a body.
    pub fn expects_response_body(&self) -> bool {
        !matches!(self, Method::HEAD)
    }
}

/// Protocol version written on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// An outgoing HTTP request.
///
/// The body is written verbatim; whether a method may carry one is the
/// caller's decision.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request target as it appears on the request line (e.g. "/index.html?q=1")
    pub target: String,
    pub version: Version,
    /// Headers in the order they are written
    pub headers: Vec<Header>,
    pub body: Bytes,
}

impl Request {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is_named(name))
            .map(|h| h.value().as_str())
    }
}

/// Builder for constructing Request objects.
///
/// Header and target validation errors are held back and reported by
/// [`RequestBuilder::build`].
pub struct RequestBuilder {
    method: Method,
    target: Option<String>,
    version: Version,
    headers: Vec<Header>,
    body: Bytes,
    error: Option<Error>,
}

impl RequestBuilder {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            target: None,
            version: Version::default(),
            headers: Vec::new(),
            body: Bytes::new(),
            error: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Appends a header; duplicates are kept in order.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match Header::new(name, value) {
            Ok(h) => self.headers.push(h),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let target = match self.target {
            Some(t) if t.is_empty() => "/".to_string(),
            Some(t) => t,
            None => "/".to_string(),
        };
        validate_target(&target)?;

        Ok(Request {
            method: self.method,
            target,
            version: self.version,
            headers: self.headers,
            body: self.body,
        })
    }
}

/// A request target must be a single token: no whitespace, no control bytes.
pub(crate) fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(Error::InvalidRequest("empty request target".to_string()));
    }
    if target
        .bytes()
        .any(|b| b.is_ascii_control() || b == b' ' || b >= 0x80)
    {
        return Err(Error::InvalidRequest(format!(
            "request target contains whitespace or control characters: {:?}",
            target
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_reports_first_bad_header() {
        let err = RequestBuilder::new(Method::GET)
            .header("X-Ok", "fine")
            .header("X-Evil", "a\r\nInjected: yes")
            .header("Bad Name", "x")
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("line break"));
    }

    #[test]
    fn empty_target_defaults_to_root() {
        let req = RequestBuilder::new(Method::GET).target("").build().unwrap();
        assert_eq!(req.target, "/");
    }

    #[test]
    fn target_cannot_split_request_line() {
        let err = RequestBuilder::new(Method::GET)
            .target("/ HTTP/1.1\r\nHost: evil")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
