//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use sockwire::error::{Error, Result, TimeoutPhase};
use sockwire::transport::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One scripted read outcome.
pub enum Step {
    Data(Vec<u8>),
    Timeout,
}

/// In-memory transport that replays canned reads and records writes.
#[derive(Default)]
pub struct ScriptedTransport {
    reads: VecDeque<Step>,
    /// Maximum bytes accepted per write call; unlimited once exhausted
    write_caps: VecDeque<usize>,
    pub written: Vec<u8>,
    pub write_calls: usize,
    pub flushes: usize,
    /// Every write accepts zero bytes
    pub stalled: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads return these segments in order, then end of stream.
    pub fn with_reads<I, B>(segments: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut t = Self::new();
        for s in segments {
            t.reads.push_back(Step::Data(s.as_ref().to_vec()));
        }
        t
    }

    pub fn then_timeout(mut self) -> Self {
        self.reads.push_back(Step::Timeout);
        self
    }

    pub fn with_write_caps(mut self, caps: impl IntoIterator<Item = usize>) -> Self {
        self.write_caps.extend(caps);
        self
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_calls += 1;
        if self.stalled {
            return Ok(0);
        }
        let n = match self.write_caps.pop_front() {
            Some(cap) => cap.min(buf.len()),
            None => buf.len(),
        };
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.reads.pop_front() {
            None => Ok(0),
            Some(Step::Timeout) => Err(Error::Timeout {
                phase: TimeoutPhase::Read,
                after: timeout,
            }),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Plain HTTP server on loopback serving canned responses in order.
pub struct MockServer {
    pub addr: SocketAddr,
    pub accepts: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn accepted(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// Each request head read is answered with the next response. Once the
/// responses run out the server goes silent but keeps the connection open.
/// With `keep_open` false the server closes after each response.
pub async fn spawn_mock_server(responses: Vec<Vec<u8>>, keep_open: bool) -> MockServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

    let counter = accepts.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let queue = queue.clone();

            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    while find_head_end(&buf).is_none() {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    if let Some(end) = find_head_end(&buf) {
                        buf.drain(..end);
                    }

                    let next = queue.lock().unwrap().pop_front();
                    let Some(response) = next else {
                        // Silent: wait for the client to give up
                        while let Ok(n) = socket.read(&mut chunk).await {
                            if n == 0 {
                                return;
                            }
                        }
                        return;
                    };
                    if socket.write_all(&response).await.is_err() {
                        return;
                    }
                    if !keep_open {
                        let _ = socket.shutdown().await;
                        return;
                    }
                }
            });
        }
    });

    MockServer { addr, accepts }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Self-signed certificate for `localhost`.
pub struct TestCert {
    pub pem: String,
    pub der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
    pub key_pem: String,
}

pub fn self_signed_cert() -> TestCert {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    TestCert {
        pem: certified.cert.pem(),
        der: certified.cert.der().clone(),
        key_der: certified.key_pair.serialize_der(),
        key_pem: certified.key_pair.serialize_pem(),
    }
}

/// Blocking TLS server accepting a single connection. It answers the first
/// request with `response`, sends close_notify and exits. Handshake failures
/// end the thread quietly.
fn server_config(cert: &TestCert) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_der.clone()));
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der.clone()], key)
        .unwrap();
    Arc::new(config)
}

pub fn spawn_tls_server(cert: &TestCert, response: &'static [u8]) -> SocketAddr {
    let config = server_config(cert);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let Ok((tcp, _)) = listener.accept() else {
            return;
        };
        tcp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let conn = ServerConnection::new(config).unwrap();
        let mut tls = StreamOwned::new(conn, tcp);

        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        while find_head_end(&buf).is_none() {
            match tls.read(&mut chunk) {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        if tls.write_all(response).is_err() {
            return;
        }
        tls.conn.send_close_notify();
        let _ = tls.flush();
    });

    addr
}

/// TLS server that completes the handshake and reads the request promptly,
/// then sends the encrypted response one byte every `delay`.
pub fn spawn_trickling_tls_server(
    cert: &TestCert,
    response: &'static [u8],
    delay: Duration,
) -> SocketAddr {
    let config = server_config(cert);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let Ok((mut tcp, _)) = listener.accept() else {
            return;
        };
        tcp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut conn = ServerConnection::new(config).unwrap();

        {
            let mut tls = rustls::Stream::new(&mut conn, &mut tcp);
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            while find_head_end(&buf).is_none() {
                match tls.read(&mut chunk) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
        }

        if conn.writer().write_all(response).is_err() {
            return;
        }
        let mut wire = Vec::new();
        while conn.wants_write() {
            if conn.write_tls(&mut wire).is_err() {
                return;
            }
        }
        for byte in wire {
            thread::sleep(delay);
            if tcp.write_all(&[byte]).is_err() {
                return;
            }
        }
    });

    addr
}

/// Accepts TCP connections and never sends a byte, holding each socket for
/// a few seconds.
pub fn spawn_silent_tcp_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else {
                return;
            };
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(4));
                drop(stream);
            });
        }
    });
    addr
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Writes `contents` to a per-process temp file and returns its path.
pub fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sockwire-{}-{}", std::process::id(), name));
    std::fs::write(&path, contents).unwrap();
    path
}
