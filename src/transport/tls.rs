//! TLS policy for outgoing connections.
//!
//! `TlsConfig` is what callers declare. `TlsContextBuilder::build` turns it
//! into `ContextOptions`, a read-only value that connections can share.
//! Nothing touches the filesystem until [`ContextOptions::client_config`] is
//! called at connect time, so a bad CA path surfaces as a connect failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, Result};

/// Declarative TLS settings. Secure by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Verify the peer certificate chain
    pub verify_peer: bool,
    /// Verify that the certificate is valid for the host name
    pub verify_peer_name: bool,
    /// Accept a lone self-signed certificate that is not a trust anchor
    pub allow_self_signed: bool,
    /// PEM bundle replacing the built-in trust anchors
    pub ca_file: Option<PathBuf>,
    /// PEM file holding a client certificate chain and its private key
    pub client_cert: Option<PathBuf>,
    /// Name used for SNI and verification instead of the connect host
    pub peer_name: Option<String>,
    /// Keep the peer's leaf certificate after the handshake
    pub capture_peer_cert: bool,
    /// Keep the peer's whole certificate chain after the handshake
    pub capture_peer_chain: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_peer: true,
            verify_peer_name: true,
            allow_self_signed: false,
            ca_file: None,
            client_cert: None,
            peer_name: None,
            capture_peer_cert: false,
            capture_peer_chain: false,
        }
    }
}

/// Where trusted roots come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustAnchors {
    /// Mozilla roots bundled through `webpki-roots`
    WebPki,
    /// A PEM file, used verbatim
    CaFile(PathBuf),
}

/// Options handed to the secure transport when a connection is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub verify_peer: bool,
    pub verify_peer_name: bool,
    pub allow_self_signed: bool,
    pub trust_anchors: TrustAnchors,
    pub client_cert: Option<PathBuf>,
    pub peer_name: Option<String>,
    pub capture_peer_cert: bool,
    pub capture_peer_chain: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        TlsContextBuilder::build(&TlsConfig::default())
    }
}

/// Translates [`TlsConfig`] into [`ContextOptions`].
pub struct TlsContextBuilder;

impl TlsContextBuilder {
    pub fn build(cfg: &TlsConfig) -> ContextOptions {
        let trust_anchors = match &cfg.ca_file {
            Some(path) => TrustAnchors::CaFile(path.clone()),
            None => TrustAnchors::WebPki,
        };

        ContextOptions {
            verify_peer: cfg.verify_peer,
            verify_peer_name: cfg.verify_peer_name,
            allow_self_signed: cfg.allow_self_signed,
            trust_anchors,
            client_cert: cfg.client_cert.clone(),
            peer_name: cfg.peer_name.clone(),
            capture_peer_cert: cfg.capture_peer_cert,
            capture_peer_chain: cfg.capture_peer_chain,
        }
    }
}

impl ContextOptions {
    /// Whether any peer certificate should be kept after the handshake.
    pub fn captures_peer(&self) -> bool {
        self.capture_peer_cert || self.capture_peer_chain
    }

    /// Name presented in SNI and checked against the certificate.
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.peer_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_string())
            .map_err(|_| Error::Tls(format!("invalid server name: {}", name)))
    }

    /// Builds the rustls client configuration, loading any files named in
    /// the options.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let roots = if self.verify_peer {
            self.load_roots()?
        } else {
            RootCertStore::empty()
        };

        let verifier = PolicyVerifier {
            roots,
            verify_peer: self.verify_peer,
            verify_peer_name: self.verify_peer_name,
            allow_self_signed: self.allow_self_signed,
            provider: provider.clone(),
        };

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier));

        let config = match &self.client_cert {
            Some(path) => {
                let (certs, key) = load_identity(path)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| Error::Tls(format!("client certificate rejected: {}", e)))?
            }
            None => builder.with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }

    fn load_roots(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        match &self.trust_anchors {
            TrustAnchors::WebPki => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            TrustAnchors::CaFile(path) => {
                for cert in load_certs(path)? {
                    roots.add(cert).map_err(|e| {
                        Error::Tls(format!("bad CA certificate in {}: {}", path.display(), e))
                    })?;
                }
            }
        }
        Ok(roots)
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| Error::Tls(format!("unable to read {}: {}", path.display(), e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("unable to parse {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

fn load_identity(path: &Path) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = load_certs(path)?;
    let key = PrivateKeyDer::from_pem_file(path)
        .map_err(|e| Error::Tls(format!("no private key in {}: {}", path.display(), e)))?;
    Ok((certs, key))
}

/// Applies verify-peer, self-signed and peer-name policy on top of webpki
/// chain validation. Handshake signatures are always checked.
#[derive(Debug)]
struct PolicyVerifier {
    roots: RootCertStore,
    verify_peer: bool,
    verify_peer_name: bool,
    allow_self_signed: bool,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if !self.verify_peer {
            return Ok(ServerCertVerified::assertion());
        }

        let cert = ParsedCertificate::try_from(end_entity)?;
        match verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        ) {
            Ok(()) => {}
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
                if self.allow_self_signed && intermediates.is_empty() =>
            {
                tracing::debug!("accepting self-signed peer certificate");
            }
            Err(e) => return Err(e),
        }

        if self.verify_peer_name {
            verify_server_name(&cert, server_name)?;
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
