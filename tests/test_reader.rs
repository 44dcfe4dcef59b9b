//! Tests for reading responses off a transport

mod helpers;

use std::time::Duration;

use helpers::ScriptedTransport;
use sockwire::http::reader::ResponseReader;
use sockwire::http::request::Method;
use sockwire::http::response::BodyFraming;
use sockwire::{Error, ErrorKind, TimeoutPhase};

fn reader() -> ResponseReader {
    ResponseReader::new(Duration::from_secs(5))
}

#[test]
fn test_content_length_body_across_partial_reads() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nContent-Ty",
        "pe: text/plain\r\nContent-Length: 11\r\n",
        "\r\nhello ",
        "world",
    ]);
    let resp = reader().read_response(&mut t).unwrap();

    assert_eq!(resp.code(), 200);
    assert_eq!(resp.status.reason, "OK");
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert_eq!(&resp.body[..], b"hello world");
    assert_eq!(resp.framing, BodyFraming::ContentLength(11));
}

#[test]
fn test_chunked_body_with_trailers() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi",
        "ki\r\n5\r\npedia\r\n0\r\nX-Trace: abc\r\n\r\n",
    ]);
    let resp = reader().read_response(&mut t).unwrap();

    assert_eq!(&resp.body[..], b"Wikipedia");
    assert_eq!(resp.framing, BodyFraming::Chunked);
    assert_eq!(resp.header("X-Trace"), Some("abc"));
}

#[test]
fn test_transfer_encoding_wins_over_content_length() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n",
    ]);
    let resp = reader().read_response(&mut t).unwrap();
    assert_eq!(&resp.body[..], b"ok");
}

#[test]
fn test_body_until_close() {
    let mut t = ScriptedTransport::with_reads(["HTTP/1.0 200 OK\r\n\r\nfirst ", "second"]);
    let resp = reader().read_response(&mut t).unwrap();

    assert_eq!(&resp.body[..], b"first second");
    assert_eq!(resp.framing, BodyFraming::UntilClose);
    assert!(!resp.keep_alive());
}

#[test]
fn test_interim_responses_are_skipped() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 100 Continue\r\n\r\n",
        "HTTP/1.1 103 Early Hints\r\nLink: </style.css>\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
    ]);
    let resp = reader().read_response(&mut t).unwrap();

    assert_eq!(resp.code(), 201);
    assert!(resp.header("Link").is_none());
    assert!(resp.body.is_empty());
}

#[test]
fn test_head_response_has_no_body() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nContent-Length: 5000\r\n\r\n",
    ]);
    let resp = reader()
        .for_method(Method::HEAD)
        .read_response(&mut t)
        .unwrap();

    assert_eq!(resp.header("Content-Length"), Some("5000"));
    assert!(resp.body.is_empty());
    assert_eq!(resp.framing, BodyFraming::Empty);
}

#[test]
fn test_no_content_ignores_framing_headers() {
    let mut t = ScriptedTransport::with_reads(["HTTP/1.1 204 No Content\r\nContent-Length: 3\r\n\r\n"]);
    let resp = reader().read_response(&mut t).unwrap();
    assert!(resp.body.is_empty());
}

#[test]
fn test_binary_body_is_untouched() {
    let payload: Vec<u8> = (0..=255u8).collect();
    let mut wire = b"HTTP/1.1 200 OK\r\nContent-Length: 256\r\n\r\n".to_vec();
    wire.extend_from_slice(&payload);

    let mut t = ScriptedTransport::with_reads([wire]);
    let resp = reader().read_response(&mut t).unwrap();
    assert_eq!(&resp.body[..], &payload[..]);
}

#[test]
fn test_malformed_status_line() {
    let mut t = ScriptedTransport::with_reads(["HTTX/1.1 200 OK\r\n\r\n"]);
    let err = reader().read_response(&mut t).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

#[test]
fn test_conflicting_content_length() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\nabcd",
    ]);
    let err = reader().read_response(&mut t).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[test]
fn test_unsupported_transfer_encoding() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\nxxxx",
    ]);
    let err = reader().read_response(&mut t).unwrap_err();
    assert!(err.to_string().contains("gzip"));
}

#[test]
fn test_eof_before_head_is_connection_closed() {
    let mut t = ScriptedTransport::with_reads(["HTTP/1.1 200 OK\r\nContent-Le"]);
    let err = reader().read_response(&mut t).unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[test]
fn test_short_body_fails() {
    let mut t = ScriptedTransport::with_reads(["HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"]);
    let err = reader().read_response(&mut t).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[test]
fn test_transport_timeout_reports_configured_timeout() {
    let mut t = ScriptedTransport::with_reads(["HTTP/1.1 200 OK\r\n"]).then_timeout();
    let err = ResponseReader::new(Duration::from_secs(3))
        .read_response(&mut t)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.timeout_phase(), Some(TimeoutPhase::Read));
    match err {
        Error::Timeout { after, .. } => assert_eq!(after, Duration::from_secs(3)),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[test]
fn test_unbounded_timeout_still_reads() {
    let mut t = ScriptedTransport::with_reads(["HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"]);
    let resp = ResponseReader::new(Duration::MAX).read_response(&mut t).unwrap();
    assert_eq!(&resp.body[..], b"ok");
}

#[test]
fn test_bytes_after_response_prevent_reuse() {
    let mut t = ScriptedTransport::with_reads([
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokHTTP/1.1 200 OK\r\n",
    ]);
    let resp = reader().read_response(&mut t).unwrap();

    assert_eq!(&resp.body[..], b"ok");
    assert_eq!(resp.trailing_bytes, 17);
    assert!(!resp.keep_alive());

    let mut t = ScriptedTransport::with_reads(["HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"]);
    let resp = reader().read_response(&mut t).unwrap();
    assert_eq!(resp.trailing_bytes, 0);
    assert!(resp.keep_alive());
}
