use std::sync::Arc;

use crate::config::{AdapterConfig, ConfigSource};
use crate::error::{Error, Result};
use crate::http::reader::ResponseReader;
use crate::http::request::{Method, Request};
use crate::http::response::RawResponse;
use crate::http::writer::RequestWriter;
use crate::transport::connection::{Connection, Target};
use crate::transport::tls::{ContextOptions, TlsContextBuilder};

/// Drives one request/response exchange at a time over a single connection.
///
/// ```ignore
/// let mut adapter = SocketAdapter::new();
/// adapter.connect(&Target::new("example.com", 443, true))?;
/// adapter.write(&request)?;
/// let response = adapter.read()?;
/// ```
///
/// After `read` the connection is closed unless keep-alive is enabled and the
/// response allows another exchange. Any error closes it.
#[derive(Debug)]
pub struct SocketAdapter {
    config: AdapterConfig,
    context: Arc<ContextOptions>,
    conn: Option<Connection>,
    /// The held connection finished its last exchange and may carry another
    idle: bool,
    last_method: Method,
}

impl Default for SocketAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketAdapter {
    pub fn new() -> Self {
        Self::with_config(AdapterConfig::default())
    }

    pub fn with_config(config: AdapterConfig) -> Self {
        let context = Arc::new(TlsContextBuilder::build(config.tls()));
        Self {
            config,
            context,
            conn: None,
            idle: false,
            last_method: Method::GET,
        }
    }

    /// Merges further options into the configuration. Takes effect on the
    /// next connect; a held connection was opened under the old options and
    /// is closed.
    pub fn set_options(&mut self, source: &dyn ConfigSource) -> Result<()> {
        self.config.set_options(source)?;
        self.context = Arc::new(TlsContextBuilder::build(self.config.tls()));
        self.close();
        Ok(())
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// TLS options applied to secure connections.
    pub fn context(&self) -> Arc<ContextOptions> {
        Arc::clone(&self.context)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Connects to `target`, reusing the held connection when it is idle,
    /// open, aimed at the same target, and keep-alive is enabled.
    pub fn connect(&mut self, target: &Target) -> Result<()> {
        if let Some(conn) = &self.conn {
            if self.idle && self.config.keepalive() && conn.is_open() && conn.target() == target {
                tracing::debug!(peer = %target, "reusing idle connection");
                self.idle = false;
                return Ok(());
            }
        }

        self.close();
        let conn = Connection::connect(
            target,
            self.config.timeout(),
            &self.context,
            self.config.socket(),
        )?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Writes a request on the open connection. Returns the bytes written.
    pub fn write(&mut self, request: &Request) -> Result<usize> {
        let mut writer = RequestWriter::new(request)?;
        let conn = self
            .conn
            .as_mut()
            .filter(|c| c.is_open())
            .ok_or(Error::NotConnected)?;

        self.last_method = request.method;
        self.idle = false;
        match writer.write_to(conn) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Reads the response to the last written request.
    pub fn read(&mut self) -> Result<RawResponse> {
        let conn = self
            .conn
            .as_mut()
            .filter(|c| c.is_open())
            .ok_or(Error::NotConnected)?;

        let reader = ResponseReader::new(self.config.timeout()).for_method(self.last_method);
        match reader.read_response(conn) {
            Ok(response) => {
                if self.config.keepalive() && response.keep_alive() {
                    self.idle = true;
                } else {
                    self.close();
                }
                Ok(response)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Connect, write and read in one call.
    pub fn send(&mut self, target: &Target, request: &Request) -> Result<RawResponse> {
        self.connect(target)?;
        self.write(request)?;
        self.read()
    }

    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.idle = false;
    }
}
