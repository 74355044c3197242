//! Pinned TLS for the outbound client
//!
//! Trust is pinned to a single CA loaded by symbolic name; no system or
//! bundled roots are consulted. Key material comes from a
//! [`TlsMaterialProvider`], by default PEM files in one directory.

use crate::config::ClientTlsConfig;
use crate::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Source of certificates and private keys, looked up by name
pub trait TlsMaterialProvider: Send + Sync {
    fn certificates(&self, name: &str) -> Result<Vec<CertificateDer<'static>>>;

    fn private_key(&self, name: &str) -> Result<PrivateKeyDer<'static>>;
}

/// Resolves `name` to `<dir>/<name>.pem`
#[derive(Debug, Clone)]
pub struct PemDirectoryProvider {
    dir: PathBuf,
}

impl PemDirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pem"))
    }
}

impl TlsMaterialProvider for PemDirectoryProvider {
    fn certificates(&self, name: &str) -> Result<Vec<CertificateDer<'static>>> {
        load_certs(self.path_for(name))
    }

    fn private_key(&self, name: &str) -> Result<PrivateKeyDer<'static>> {
        load_private_key(self.path_for(name))
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open {}: {}", path.display(), e)))?;
    Ok(BufReader::new(file))
}

/// Load certificates from PEM file
pub fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path.as_ref())?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls("No certificates found in file".to_string()));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path.as_ref())?;

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| Error::Tls(format!("Failed to parse key: {}", e)))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            None => break,
            _ => continue,
        }
    }

    Err(Error::Tls("No private key found in file".to_string()))
}

/// Client config trusting only the CA named `ca`.
///
/// With `identity`, the same name supplies the client certificate chain and
/// its private key.
pub fn pinned_client_config(
    provider: &dyn TlsMaterialProvider,
    ca: &str,
    identity: Option<&str>,
) -> Result<rustls::ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in provider.certificates(ca)? {
        roots
            .add(cert)
            .map_err(|e| Error::Tls(format!("Rejected pinned CA {ca}: {e}")))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_root_certificates(roots);

    let mut config = match identity {
        Some(name) => builder
            .with_client_auth_cert(provider.certificates(name)?, provider.private_key(name)?)
            .map_err(|e| Error::Tls(e.to_string()))?,
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Connector plus the name the server certificate is verified against
#[derive(Clone)]
pub struct PinnedTls {
    pub connector: TlsConnector,
    pub server_name: ServerName<'static>,
}

impl PinnedTls {
    pub fn from_config(tls: &ClientTlsConfig, host: &str) -> Result<Self> {
        let provider = PemDirectoryProvider::new(&tls.material_dir);
        Self::with_provider(&provider, tls, host)
    }

    pub fn with_provider(
        provider: &dyn TlsMaterialProvider,
        tls: &ClientTlsConfig,
        host: &str,
    ) -> Result<Self> {
        let config = pinned_client_config(provider, &tls.ca, tls.identity.as_deref())?;
        let name = tls.server_name.as_deref().unwrap_or(host).to_string();
        let server_name = ServerName::try_from(name)
            .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }
}

impl std::fmt::Debug for PinnedTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
