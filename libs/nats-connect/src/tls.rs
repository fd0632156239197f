//! TLS settings for the transport.
//!
//! The builder validates the configured PEM material up front so that a bad
//! path or an empty file fails the connect attempt with a [`TlsError`] rather
//! than surfacing later as an opaque handshake failure.

use std::path::{Path, PathBuf};

use config::TlsSettings;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use tracing::debug;

use crate::error::TlsError;

/// Client certificate & private key presented during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Validated TLS material, ready to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecureTransport {
    /// CA bundles to trust. Empty means the platform roots are used
    pub root_certificates: Vec<PathBuf>,
    pub client_certificate: Option<ClientCertificate>,
}

/// Builds transport-ready TLS settings from config.
pub trait TlsBuilder: Send + Sync {
    /// `Ok(None)` means the settings hold no usable material and the
    /// connection should be made without TLS.
    fn build(&self, settings: &TlsSettings) -> Result<Option<SecureTransport>, TlsError>;
}

/// Reads and checks PEM encoded CA bundles, certificates & keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct PemTlsBuilder;

impl TlsBuilder for PemTlsBuilder {
    fn build(&self, settings: &TlsSettings) -> Result<Option<SecureTransport>, TlsError> {
        if settings.is_empty() {
            return Ok(None);
        }

        for ca in &settings.ca_files {
            let count = load_certificates(ca)?;
            debug!(ca_file = %ca.display(), count, "loaded CA certificates");
        }

        let client_certificate = match (&settings.cert_file, &settings.key_file) {
            (Some(cert), Some(key)) => {
                load_certificates(cert)?;
                load_private_key(key)?;
                Some(ClientCertificate {
                    cert: cert.clone(),
                    key: key.clone(),
                })
            }
            (None, None) => None,
            _ => return Err(TlsError::IncompleteKeyPair),
        };

        Ok(Some(SecureTransport {
            root_certificates: settings.ca_files.clone(),
            client_certificate,
        }))
    }
}

fn pem_error(path: &Path, err: impl std::fmt::Display) -> TlsError {
    TlsError::Pem {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// returns the number of certificates in the file, at least one
fn load_certificates(path: &Path) -> Result<usize, TlsError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| pem_error(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs.len())
}

fn load_private_key(path: &Path) -> Result<(), TlsError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| pem_error(path, e))?;
    Ok(())
}
