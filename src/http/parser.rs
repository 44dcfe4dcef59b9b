use crate::http::header::{self, Header};
use crate::http::response::StatusLine;

/// Largest status line plus header block accepted from a server.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("incomplete response head")]
    Incomplete,
    #[error("invalid status line: {0:?}")]
    InvalidStatusLine(String),
    #[error("invalid header line: {0}")]
    InvalidHeader(String),
    #[error("response head is not valid UTF-8")]
    InvalidEncoding,
    #[error("response headers too large")]
    HeadTooLarge,
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusLine,
    pub headers: Vec<Header>,
}

/// Parses the status line and header block at the front of `buf`.
///
/// Returns the head and the number of bytes it occupied, including the blank
/// line. `ParseError::Incomplete` means the blank line has not arrived yet.
pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    // Tolerate empty lines before the status line.
    let skipped = leading_blank_lines(buf);
    let rest = &buf[skipped..];

    let (head_len, consumed) = match find_head_end(rest) {
        Some(found) => found,
        None if rest.len() > MAX_HEAD_BYTES => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if head_len > MAX_HEAD_BYTES {
        return Err(ParseError::HeadTooLarge);
    }

    let text = std::str::from_utf8(&rest[..head_len]).map_err(|_| ParseError::InvalidEncoding)?;
    let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    // Status line
    let status_line = lines.next().unwrap_or_default();
    let status = parse_status_line(status_line)?;

    // Headers
    let mut headers = Vec::new();
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(ParseError::InvalidHeader(
                "obsolete line folding is not accepted".to_string(),
            ));
        }
        let h = header::parse(line).map_err(|e| ParseError::InvalidHeader(e.to_string()))?;
        headers.push(h);
    }

    Ok((ResponseHead { status, headers }, skipped + consumed))
}

/// Parses `HTTP/<major>.<minor> <code> [reason]`.
pub fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    let invalid = || ParseError::InvalidStatusLine(line.to_string());

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or_else(invalid)?;
    let code = parts.next().ok_or_else(invalid)?;
    let reason = parts.next().unwrap_or_default();

    let numbers = version.strip_prefix("HTTP/").ok_or_else(invalid)?.as_bytes();
    let version_ok = numbers.len() == 3
        && numbers[0].is_ascii_digit()
        && numbers[1] == b'.'
        && numbers[2].is_ascii_digit();
    if !version_ok {
        return Err(invalid());
    }

    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let code: u16 = code.parse().map_err(|_| invalid())?;

    if reason.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
        return Err(invalid());
    }

    Ok(StatusLine {
        version: version.to_string(),
        code,
        reason: reason.to_string(),
    })
}

fn leading_blank_lines(buf: &[u8]) -> usize {
    let mut i = 0;
    loop {
        if buf[i..].starts_with(b"\r\n") {
            i += 2;
        } else if buf[i..].starts_with(b"\n") {
            i += 1;
        } else {
            return i;
        }
    }
}

/// Finds the blank line ending the head. Returns the head length (up to and
/// excluding the last header's line feed) and the bytes consumed including
/// the blank line.
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(pos) = buf[from..].iter().position(|&b| b == b'\n') {
        let i = from + pos;
        let after = &buf[i + 1..];
        if after.starts_with(b"\r\n") {
            return Some((i, i + 3));
        }
        if after.starts_with(b"\n") {
            return Some((i, i + 2));
        }
        from = i + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_head() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let (head, consumed) = parse_response_head(buf).unwrap();

        assert_eq!(head.status.code, 200);
        assert_eq!(head.status.reason, "OK");
        assert_eq!(head.headers.len(), 1);
        assert_eq!(&buf[consumed..], b"hello");
    }

    #[test]
    fn head_end_with_bare_line_feeds() {
        let buf = b"HTTP/1.0 204 No Content\nServer: x\n\n";
        let (head, consumed) = parse_response_head(buf).unwrap();
        assert_eq!(head.status.version, "HTTP/1.0");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn incomplete_until_blank_line() {
        assert_eq!(
            parse_response_head(b"HTTP/1.1 200 OK\r\nA: b\r\n").unwrap_err(),
            ParseError::Incomplete
        );
    }

    #[test]
    fn status_line_variants() {
        assert_eq!(parse_status_line("HTTP/1.1 404 Not Found").unwrap().reason, "Not Found");
        assert_eq!(parse_status_line("HTTP/1.1 200").unwrap().reason, "");
        assert!(parse_status_line("HTTP/1.1 20 OK").is_err());
        assert!(parse_status_line("HTTP/11 200 OK").is_err());
        assert!(parse_status_line("ICY 200 OK").is_err());
    }
}
