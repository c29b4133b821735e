//! Root CA certificate loading
//!
//! The bridge's root certificate is pinned as the only TLS trust anchor. The
//! file may be a PEM bundle (the usual `roots.pem`) or a single DER
//! certificate (`.crt` exported from a certificate store).

use crate::error::{PublisherError, PublisherResult};
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;
use std::path::{Path, PathBuf};
use tracing::debug;

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// Trust anchors parsed from a root certificate file
#[derive(Debug, Clone)]
pub struct RootCertificate {
    source: PathBuf,
    certificates: Vec<CertificateDer<'static>>,
}

impl RootCertificate {
    /// Read and parse the certificate file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> PublisherResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| PublisherError::file_access(path, e))?;
        let root = Self::from_bytes(path, &bytes)?;

        debug!(
            path = %path.display(),
            certificates = root.certificates.len(),
            "Loaded root certificate"
        );
        Ok(root)
    }

    /// Parse certificate bytes; `source` is only used in error messages
    pub fn from_bytes<P: AsRef<Path>>(source: P, bytes: &[u8]) -> PublisherResult<Self> {
        let source = source.as_ref();
        let certificates = if looks_like_pem(bytes) {
            parse_pem(source, bytes)?
        } else {
            vec![CertificateDer::from(bytes.to_vec())]
        };

        let root = Self {
            source: source.to_path_buf(),
            certificates,
        };
        // Reject anything webpki would not accept as a trust anchor now, rather
        // than during the TLS handshake.
        root.root_store()?;
        Ok(root)
    }

    /// Number of certificates in the file
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Build a rustls trust store holding every certificate in the file
    pub fn root_store(&self) -> PublisherResult<RootCertStore> {
        let mut store = RootCertStore::empty();
        for cert in &self.certificates {
            store
                .add(cert.clone())
                .map_err(|e| PublisherError::parse(&self.source, e.to_string()))?;
        }
        Ok(store)
    }
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER)
}

fn parse_pem(source: &Path, bytes: &[u8]) -> PublisherResult<Vec<CertificateDer<'static>>> {
    let mut reader = bytes;
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PublisherError::parse(source, e.to_string()))?;

    if certificates.is_empty() {
        return Err(PublisherError::parse(
            source,
            "no CERTIFICATE block found in PEM file",
        ));
    }
    Ok(certificates)
}
