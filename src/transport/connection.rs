//! One blocking TCP or TLS connection.
//!
//! Connect (name resolution, TCP and handshake) runs under a single
//! deadline. Reads take an explicit timeout and close the connection when it
//! expires; nothing is retried behind the caller's back.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use rustls::{ClientConnection, StreamOwned};
use socket2::{Domain, Protocol, Socket, Type};
use url::{Host, Url};

use crate::error::{Error, Result, TimeoutPhase, is_timeout};
use crate::transport::{Deadline, Transport};
use crate::transport::tls::ContextOptions;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Derives the target from an `http` or `https` URL.
    pub fn from_url(url: &Url) -> Result<Self> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(Error::InvalidRequest(format!("unsupported scheme: {}", other)));
            }
        };
        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(Error::InvalidRequest("URL has no host".to_string())),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidRequest("URL has no port".to_string()))?;

        Ok(Self { host, port, secure })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "tls" } else { "tcp" };
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => write!(f, "{}://[{}]:{}", scheme, ip, self.port),
            _ => write!(f, "{}://{}:{}", scheme, self.host, self.port),
        }
    }
}

/// Socket-level options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Local address to bind before connecting
    pub bind_to: Option<SocketAddr>,
    pub nodelay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind_to: None,
            nodelay: true,
        }
    }
}

/// Certificates captured from the peer during the handshake.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates {
    pub leaf: Option<CertificateDer<'static>>,
    pub chain: Vec<CertificateDer<'static>>,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => &s.sock,
        }
    }
}

pub struct Connection {
    target: Target,
    stream: Option<Stream>,
    write_timeout: Duration,
    peer: PeerCertificates,
}

impl Connection {
    /// Opens a connection, applying `tls` only when the target is secure.
    ///
    /// TCP connect and TLS handshake share one `timeout`.
    pub fn connect(
        target: &Target,
        timeout: Duration,
        tls: &ContextOptions,
        socket: &SocketOptions,
    ) -> Result<Self> {
        let deadline = Deadline::after(timeout);
        tracing::debug!(
            host = %target.host,
            port = target.port,
            secure = target.secure,
            "connecting"
        );

        let tls_config = if target.secure {
            Some(tls.client_config()?)
        } else {
            None
        };

        let mut tcp = open_tcp(target, deadline, timeout, socket)?;
        let mut peer = PeerCertificates::default();

        let stream = match tls_config {
            None => Stream::Plain(tcp),
            Some(config) => {
                let server_name = tls.server_name(&target.host)?;
                let mut conn = ClientConnection::new(config, server_name)
                    .map_err(|e| Error::Tls(e.to_string()))?;
                handshake(&mut conn, &mut tcp, deadline, timeout)?;

                if tls.captures_peer() {
                    peer = capture_peer(&conn, tls);
                }
                tracing::trace!(
                    version = ?conn.protocol_version(),
                    cipher = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
                    "tls handshake complete"
                );
                Stream::Tls(Box::new(StreamOwned::new(conn, tcp)))
            }
        };

        Ok(Self {
            target: target.clone(),
            stream: Some(stream),
            write_timeout: timeout,
            peer,
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref()?.tcp().local_addr().ok()
    }

    /// Leaf certificate, when capture was requested.
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer.leaf.as_ref()
    }

    /// Full peer chain, when chain capture was requested.
    pub fn peer_certificate_chain(&self) -> &[CertificateDer<'static>] {
        &self.peer.chain
    }

    /// Writes part of `buf`. Returns `Ok(0)` when the socket accepted nothing
    /// this time; that is not an error.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream
            .tcp()
            .set_write_timeout(Some(self.write_timeout).filter(|t| !t.is_zero()))?;

        let res = match stream {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        };

        match res {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) if is_timeout(&e) => {
                tracing::warn!(peer = %self.target, "write timed out");
                self.close();
                Err(Error::timeout(TimeoutPhase::Write, self.write_timeout))
            }
            Err(e) => {
                self.close();
                Err(Error::Io(e))
            }
        }
    }

    /// Reads into `buf`, waiting at most `timeout`. `Ok(0)` is end of stream.
    ///
    /// The deadline is checked before every socket read, so a peer trickling
    /// bytes cannot stretch the wait.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Deadline::after(timeout);
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let res = match stream {
            Stream::Plain(s) => read_plain(s, buf, deadline),
            Stream::Tls(s) => read_tls(s, buf, deadline),
        };

        match res {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && self.target.secure => {
                tracing::debug!(peer = %self.target, "peer closed without close_notify");
                Ok(0)
            }
            Err(e) if is_timeout(&e) => {
                tracing::warn!(peer = %self.target, timeout = ?timeout, "read timed out");
                self.close();
                Err(Error::timeout(TimeoutPhase::Read, timeout))
            }
            Err(e) => {
                self.close();
                Err(Error::Io(e))
            }
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        let res = match self.stream.as_mut() {
            Some(Stream::Plain(s)) => s.flush(),
            Some(Stream::Tls(s)) => s.flush(),
            None => return Err(Error::NotConnected),
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if is_timeout(&e) => {
                self.close();
                Err(Error::timeout(TimeoutPhase::Write, self.write_timeout))
            }
            Err(e) => {
                self.close();
                Err(Error::Io(e))
            }
        }
    }

    /// Releases the socket. Safe to call any number of times.
    pub fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        tracing::debug!(peer = %self.target, "closing connection");

        match stream {
            Stream::Plain(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Stream::Tls(mut s) => {
                s.conn.send_close_notify();
                if let Err(e) = s.conn.write_tls(&mut s.sock) {
                    tracing::trace!(error = %e, "close_notify not delivered");
                }
                let _ = s.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Transport for Connection {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Connection::write(self, buf)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Connection::read(self, buf, timeout)
    }

    fn flush(&mut self) -> Result<()> {
        Connection::flush(self)
    }
}

fn read_plain(s: &mut TcpStream, buf: &mut [u8], deadline: Deadline) -> io::Result<usize> {
    loop {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        s.set_read_timeout(Some(remaining))?;
        match s.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Pulls TLS records off the socket one read at a time until plaintext is
/// available. `Ok(0)` is close_notify; a bare TCP close is `UnexpectedEof`.
fn read_tls(
    s: &mut StreamOwned<ClientConnection, TcpStream>,
    buf: &mut [u8],
    deadline: Deadline,
) -> io::Result<usize> {
    loop {
        match s.conn.reader().read(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            other => return other,
        }

        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        s.sock.set_read_timeout(Some(remaining))?;

        match s.conn.read_tls(&mut s.sock) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        let processed = s.conn.process_new_packets();
        // Pending alerts or key update responses
        while s.conn.wants_write() {
            if s.conn.write_tls(&mut s.sock)? == 0 {
                break;
            }
        }
        if let Err(e) = processed {
            return Err(io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }
}

/// Resolves the target on a helper thread so a slow resolver cannot outlast
/// the connect deadline. Literal addresses skip the resolver.
fn resolve(target: &Target, deadline: Deadline, timeout: Duration) -> Result<Vec<SocketAddr>> {
    let connect_error = |reason: String| Error::Connect {
        target: target.to_string(),
        reason,
    };

    if let Ok(ip) = target.host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, target.port)]);
    }

    let (tx, rx) = mpsc::channel();
    let host = target.host.clone();
    let port = target.port;
    thread::Builder::new()
        .name("sockwire-resolve".to_string())
        .spawn(move || {
            let res = (host.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            let _ = tx.send(res);
        })?;

    let addrs = match rx.recv_timeout(deadline.remaining()) {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => return Err(connect_error(e.to_string())),
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(peer = %target, timeout = ?timeout, "name resolution timed out");
            return Err(Error::timeout(TimeoutPhase::Connect, timeout));
        }
        Err(RecvTimeoutError::Disconnected) => {
            return Err(connect_error("resolver exited without an answer".to_string()));
        }
    };
    if addrs.is_empty() {
        return Err(connect_error("host resolved to no addresses".to_string()));
    }
    Ok(addrs)
}

fn open_tcp(
    target: &Target,
    deadline: Deadline,
    timeout: Duration,
    opts: &SocketOptions,
) -> Result<TcpStream> {
    let connect_error = |reason: String| Error::Connect {
        target: target.to_string(),
        reason,
    };

    let addrs = resolve(target, deadline, timeout)?;

    let mut last_error = None;
    let mut timed_out = false;
    for addr in addrs {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            timed_out = true;
            break;
        }
        match connect_addr(addr, remaining, opts) {
            Ok(stream) => {
                tracing::trace!(%addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(%addr, error = %e, "tcp connect attempt failed");
                timed_out |= is_timeout(&e);
                last_error = Some(e);
            }
        }
    }

    if timed_out {
        tracing::warn!(peer = %target, timeout = ?timeout, "connect timed out");
        return Err(Error::timeout(TimeoutPhase::Connect, timeout));
    }
    Err(connect_error(
        last_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

fn connect_addr(addr: SocketAddr, timeout: Duration, opts: &SocketOptions) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if let Some(bind) = opts.bind_to {
        socket.bind(&bind.into())?;
    }
    socket.connect_timeout(&addr.into(), timeout)?;

    let stream: TcpStream = socket.into();
    stream.set_nodelay(opts.nodelay)?;
    Ok(stream)
}

fn handshake(
    conn: &mut ClientConnection,
    tcp: &mut TcpStream,
    deadline: Deadline,
    timeout: Duration,
) -> Result<()> {
    while conn.is_handshaking() {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(Error::timeout(TimeoutPhase::Connect, timeout));
        }
        tcp.set_read_timeout(Some(remaining))?;
        tcp.set_write_timeout(Some(remaining))?;

        match conn.complete_io(tcp) {
            Ok((0, 0)) if conn.is_handshaking() => {
                return Err(Error::Tls("peer closed during handshake".to_string()));
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {
                tracing::warn!(timeout = ?timeout, "tls handshake timed out");
                return Err(Error::timeout(TimeoutPhase::Connect, timeout));
            }
            Err(e) => return Err(Error::Tls(format!("handshake failed: {}", e))),
        }
    }
    Ok(())
}

fn capture_peer(conn: &ClientConnection, tls: &ContextOptions) -> PeerCertificates {
    let chain = conn
        .peer_certificates()
        .map(|certs| certs.to_vec())
        .unwrap_or_default();

    PeerCertificates {
        leaf: if tls.capture_peer_cert {
            chain.first().cloned()
        } else {
            None
        },
        chain: if tls.capture_peer_chain { chain } else { Vec::new() },
    }
}
