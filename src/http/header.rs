use std::fmt;

use crate::error::{Error, Result};

/// A header field value that is safe to put on the wire.
///
/// Construction fails if the raw string contains a carriage return, a line
/// feed or a NUL byte. Nothing is ever stripped: a value that would let a
/// caller smuggle a second header or a body boundary is rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderValue(String);

impl HeaderValue {
    /// Validates `raw` and wraps it.
    ///
    /// # Example
    ///
    /// ```
    /// # use sockwire::http::header::HeaderValue;
    /// assert!(HeaderValue::validate("text/html").is_ok());
    /// assert!(HeaderValue::validate("a\r\nSet-Cookie: x").is_err());
    /// ```
    pub fn validate(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if !Self::is_valid(&raw) {
            return Err(Error::InvalidHeader(format!(
                "value contains a line break or NUL: {:?}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    pub fn is_valid(raw: &str) -> bool {
        !raw.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0'))
    }

    /// The value as written on the wire.
    pub fn to_wire(&self) -> &str {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single header field: a token name and a validated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: HeaderValue,
}

impl Header {
    /// Builds a header from a name and an untrusted value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            value: HeaderValue::validate(value)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidHeader("empty header name".to_string()));
    }
    let bad = name
        .bytes()
        .any(|b| b.is_ascii_control() || b == b':' || b == b' ' || b >= 0x80);
    if bad {
        return Err(Error::InvalidHeader(format!("invalid header name: {:?}", name)));
    }
    Ok(())
}

/// Parses a `Name: Value` line (without its line terminator).
///
/// Exactly one space after the colon is consumed; anything further belongs to
/// the value.
pub fn parse(line: &str) -> Result<Header> {
    let (name, rest) = line
        .split_once(':')
        .ok_or_else(|| Error::InvalidHeader(format!("missing colon in {:?}", line)))?;
    let value = rest.strip_prefix(' ').unwrap_or(rest);
    Header::new(name, value)
}

/// Parses a full `Name: Value` string for a header whose canonical name is
/// known, failing if the line names a different field.
pub fn parse_from_full_field(field_name: &str, field_and_value: &str) -> Result<Header> {
    let parsed = parse(field_and_value)?;
    if !parsed.is_named(field_name) {
        return Err(Error::InvalidHeader(format!(
            "expected a {} header, found {}",
            field_name,
            parsed.name()
        )));
    }
    Header::new(field_name, parsed.value.0)
}

/// Serializes a header as `Name: Value`. CRLF framing is the writer's job.
pub fn format(header: &Header) -> String {
    header.to_string()
}
