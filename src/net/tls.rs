//! TLS context construction and server-side handshake.
//!
//! # Responsibilities
//! - Build the rustls server configuration from host-provided material
//! - Perform the buffered server handshake over detection leftovers
//!
//! # Design Decisions
//! - Certificate and key arrive as PEM byte buffers from host callbacks,
//!   parsed with `rustls-pemfile`; invalid material is startup-fatal
//! - DH parameters and the key password are accepted for provider-surface
//!   parity and logged at debug level; rustls negotiates its own groups and
//!   expects an unencrypted key
//! - The handshake consumes the detector's buffered prefix through
//!   [`Rewind`], so no handshake byte is re-read from the socket

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::host::TlsMaterial;
use crate::net::rewind::Rewind;

/// Deadline for the TLS handshake and for the TLS closing handshake.
pub const TLS_TIMEOUT: Duration = Duration::from_secs(30);

/// Error building the TLS context from host material.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// The host registered no TLS material providers.
    #[error("TLS requested but no material providers are registered")]
    MissingMaterial,
    /// The certificate provider returned no parseable certificate.
    #[error("invalid certificate material: {0}")]
    Certificate(std::io::Error),
    /// The key provider returned no parseable private key.
    #[error("invalid private key material")]
    PrivateKey,
    /// rustls rejected the assembled certificate/key pair.
    #[error("TLS configuration rejected: {0}")]
    Config(#[from] tokio_rustls::rustls::Error),
}

/// Assemble a rustls server configuration from the host's providers.
pub fn build_server_config(material: &TlsMaterial) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_pem = (material.certificate)();
    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Certificate)?;
    if certs.is_empty() {
        return Err(TlsError::Certificate(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no certificates in provided PEM",
        )));
    }

    let key_pem = (material.private_key)();
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|_| TlsError::PrivateKey)?
        .ok_or(TlsError::PrivateKey)?;

    if let Some(dh) = &material.dh_params {
        let dh_bytes = dh();
        tracing::debug!(
            bytes = dh_bytes.len(),
            "DH parameters provided; TLS provider negotiates its own groups"
        );
    }
    if let Some(password) = &material.password {
        let pw = password(false);
        tracing::debug!(
            bytes = pw.len(),
            "Key password provided; engine expects unencrypted key material"
        );
    }

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Perform the server handshake, replaying `buffered` detection bytes first.
///
/// Enforces [`TLS_TIMEOUT`]; a timeout surfaces as an I/O error like any
/// other handshake failure.
pub async fn handshake<S>(
    acceptor: &TlsAcceptor,
    stream: Rewind<S>,
) -> std::io::Result<TlsStream<Rewind<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match tokio::time::timeout(TLS_TIMEOUT, acceptor.accept(stream)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "TLS handshake timed out",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_certificate_material_is_rejected() {
        let material = TlsMaterial::new(Vec::new, Vec::new);
        assert!(matches!(
            build_server_config(&material),
            Err(TlsError::Certificate(_))
        ));
    }

    #[test]
    fn garbage_material_is_rejected() {
        let material = TlsMaterial::new(|| b"not a pem".to_vec(), || b"also not a pem".to_vec());
        assert!(build_server_config(&material).is_err());
    }
}
