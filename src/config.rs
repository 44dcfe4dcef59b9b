//! Adapter configuration.
//!
//! Options arrive as a loosely typed mapping, possibly in several partial
//! updates. Each update is merged into what is already there: top-level keys
//! are lowercased, later keys win, nested groups such as `ssl` or `socket`
//! merge key by key, and unknown keys are carried along untouched. After
//! every merge the typed view is recomputed; an update that leaves any known
//! key with the wrong shape is rejected and nothing changes.
//!
//! ```yaml
//! timeout: 5
//! keepalive: true
//! sslcafile: /etc/ssl/internal-ca.pem
//! ssl:
//!   peer_name: api.internal
//! socket:
//!   bindto: 10.0.0.5:0
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::transport::connection::SocketOptions;
use crate::transport::tls::TlsConfig;

/// Environment variable naming a YAML configuration file.
pub const CONFIG_ENV: &str = "SOCKWIRE_CONFIG";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can be turned into an option mapping.
pub trait ConfigSource {
    fn to_mapping(&self) -> Result<Mapping>;
}

impl ConfigSource for Mapping {
    fn to_mapping(&self) -> Result<Mapping> {
        Ok(self.clone())
    }
}

impl ConfigSource for Value {
    fn to_mapping(&self) -> Result<Mapping> {
        match self {
            Value::Mapping(m) => Ok(m.clone()),
            Value::Null => Ok(Mapping::new()),
            other => Err(Error::InvalidConfig(format!(
                "expected a mapping of options, found {}",
                type_name(other)
            ))),
        }
    }
}

/// Adapter over any serializable configuration type.
///
/// ```
/// # use sockwire::config::{AdapterConfig, Structured};
/// #[derive(serde::Serialize)]
/// struct Settings { timeout: u32, keepalive: bool }
///
/// let cfg = AdapterConfig::from_source(&Structured(&Settings { timeout: 3, keepalive: true })).unwrap();
/// assert!(cfg.keepalive());
/// ```
pub struct Structured<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> ConfigSource for Structured<'_, T> {
    fn to_mapping(&self) -> Result<Mapping> {
        serde_yaml::to_value(self.0)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?
            .to_mapping()
    }
}

/// Merged options plus their typed view.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    raw: Mapping,
    timeout: Duration,
    keepalive: bool,
    tls: TlsConfig,
    socket: SocketOptions,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            raw: Mapping::new(),
            timeout: DEFAULT_TIMEOUT,
            keepalive: false,
            tls: TlsConfig::default(),
            socket: SocketOptions::default(),
        }
    }
}

impl ConfigSource for AdapterConfig {
    fn to_mapping(&self) -> Result<Mapping> {
        Ok(self.raw.clone())
    }
}

impl AdapterConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.set_options(source)?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value =
            serde_yaml::from_str(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_source(&value)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("unable to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reads the file named by `SOCKWIRE_CONFIG`, or returns defaults when
    /// the variable is unset.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => {
                tracing::debug!(path = %path, "loading configuration");
                Self::from_yaml_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Merges `source` into the current options.
    pub fn set_options(&mut self, source: &dyn ConfigSource) -> Result<()> {
        let update = source.to_mapping()?;

        let mut merged = self.raw.clone();
        for (key, value) in update {
            let key = match key {
                Value::String(s) => Value::String(s.to_lowercase()),
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "option names must be strings, found {}",
                        type_name(&other)
                    )));
                }
            };
            merge_value(&mut merged, key, value);
        }

        let resolved = Resolved::from_mapping(&merged)?;
        self.raw = merged;
        self.timeout = resolved.timeout;
        self.keepalive = resolved.keepalive;
        self.tls = resolved.tls;
        self.socket = resolved.socket;
        Ok(())
    }

    /// Raw value of a top-level option, including pass-through keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    pub fn raw(&self) -> &Mapping {
        &self.raw
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn socket(&self) -> &SocketOptions {
        &self.socket
    }
}

fn merge_value(into: &mut Mapping, key: Value, value: Value) {
    if let Value::Mapping(update) = value {
        if let Some(Value::Mapping(existing)) = into.get_mut(&key) {
            for (k, v) in update {
                merge_value(existing, k, v);
            }
            return;
        }
        into.insert(key, Value::Mapping(update));
        return;
    }
    into.insert(key, value);
}

struct Resolved {
    timeout: Duration,
    keepalive: bool,
    tls: TlsConfig,
    socket: SocketOptions,
}

impl Resolved {
    fn from_mapping(m: &Mapping) -> Result<Self> {
        let timeout = match m.get("timeout") {
            None | Some(Value::Null) => DEFAULT_TIMEOUT,
            Some(v) => parse_timeout(v)?,
        };
        let keepalive = get_bool(m, "keepalive", "keepalive")?.unwrap_or(false);

        let ssl = get_group(m, "ssl")?;
        let socket = get_group(m, "socket")?;
        let defaults = TlsConfig::default();

        let tls = TlsConfig {
            verify_peer: pick_bool(m, "sslverifypeer", ssl, "verify_peer")?
                .unwrap_or(defaults.verify_peer),
            verify_peer_name: pick_bool(m, "sslverifypeername", ssl, "verify_peer_name")?
                .unwrap_or(defaults.verify_peer_name),
            allow_self_signed: pick_bool(m, "sslallowselfsigned", ssl, "allow_self_signed")?
                .unwrap_or(defaults.allow_self_signed),
            ca_file: pick_string(m, "sslcafile", ssl, "cafile")?.map(PathBuf::from),
            client_cert: pick_string(m, "sslcert", ssl, "local_cert")?.map(PathBuf::from),
            peer_name: match ssl {
                Some(g) => get_string(g, "peer_name", "ssl.peer_name")?,
                None => None,
            },
            capture_peer_cert: pick_bool(m, "sslcapturepeercert", ssl, "capture_peer_cert")?
                .unwrap_or(defaults.capture_peer_cert),
            capture_peer_chain: pick_bool(m, "sslcapturepeerchain", ssl, "capture_peer_cert_chain")?
                .unwrap_or(defaults.capture_peer_chain),
        };

        let mut socket_opts = SocketOptions::default();
        if let Some(g) = socket {
            if let Some(bind) = get_string(g, "bindto", "socket.bindto")? {
                socket_opts.bind_to = Some(parse_bind_addr(&bind)?);
            }
            if let Some(nodelay) = get_bool(g, "tcp_nodelay", "socket.tcp_nodelay")? {
                socket_opts.nodelay = nodelay;
            }
        }

        Ok(Self {
            timeout,
            keepalive,
            tls,
            socket: socket_opts,
        })
    }
}

fn parse_timeout(v: &Value) -> Result<Duration> {
    let invalid = || Error::InvalidConfig("timeout must be a positive number of seconds".to_string());
    let secs = v.as_f64().filter(|s| s.is_finite() && *s > 0.0).ok_or_else(invalid)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::InvalidConfig(format!("timeout out of range: {}", secs)))
}

fn parse_bind_addr(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 0))
        .map_err(|_| Error::InvalidConfig(format!("socket.bindto is not an address: {:?}", s)))
}

fn get_group<'a>(m: &'a Mapping, key: &str) -> Result<Option<&'a Mapping>> {
    match m.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Mapping(g)) => Ok(Some(g)),
        Some(other) => Err(Error::InvalidConfig(format!(
            "{} must be a mapping, found {}",
            key,
            type_name(other)
        ))),
    }
}

fn get_bool(m: &Mapping, key: &str, label: &str) -> Result<Option<bool>> {
    match m.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(Error::InvalidConfig(format!(
            "{} must be a boolean, found {}",
            label,
            type_name(other)
        ))),
    }
}

fn get_string(m: &Mapping, key: &str, label: &str) -> Result<Option<String>> {
    match m.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::InvalidConfig(format!(
            "{} must be a string, found {}",
            label,
            type_name(other)
        ))),
    }
}

/// Flat `ssl*` key first, then the key inside the `ssl` group.
fn pick_bool(m: &Mapping, flat: &str, group: Option<&Mapping>, key: &str) -> Result<Option<bool>> {
    if let Some(b) = get_bool(m, flat, flat)? {
        return Ok(Some(b));
    }
    match group {
        Some(g) => get_bool(g, key, &format!("ssl.{}", key)),
        None => Ok(None),
    }
}

fn pick_string(m: &Mapping, flat: &str, group: Option<&Mapping>, key: &str) -> Result<Option<String>> {
    if let Some(s) = get_string(m, flat, flat)? {
        return Ok(Some(s));
    }
    match group {
        Some(g) => get_string(g, key, &format!("ssl.{}", key)),
        None => Ok(None),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
