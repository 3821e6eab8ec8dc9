//! TLS client setup for stream dials (rustls with the ring provider).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::debug;

use super::conn::Conn;
use super::dial::{CaSource, TlsOptions};
use crate::core::{TransportError, TransportResult};

/// Upgrade a connected TCP stream to TLS.
pub(crate) async fn connect(
    stream: TcpStream,
    address: &str,
    opts: &TlsOptions,
) -> TransportResult<Conn> {
    let config = client_config(opts)?;
    let name = opts.server_name.as_deref().unwrap_or_else(|| host(address));
    let server_name = ServerName::try_from(name.to_string())
        .map_err(|e| TransportError::Tls(format!("invalid server name {name}: {e}")))?;

    debug!(server_name = name, "tls handshake");
    let stream = TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await?;
    Ok(Conn::Tls(Box::new(stream)))
}

fn client_config(opts: &TlsOptions) -> TransportResult<ClientConfig> {
    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?;

    let builder = match &opts.ca {
        CaSource::SkipVerify => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider))),
        CaSource::SystemRoots => {
            let mut roots = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            let (added, _ignored) = roots.add_parsable_certificates(native.certs);
            if added == 0 {
                return Err(TransportError::Tls("no usable system root certificates".into()));
            }
            builder.with_root_certificates(roots)
        }
        CaSource::File(path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert).map_err(tls_err)?;
            }
            builder.with_root_certificates(roots)
        }
    };

    match (&opts.cert_file, &opts.key_file) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(tls_err),
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn load_certs(path: &Path) -> TransportResult<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("invalid certs in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> TransportResult<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::Tls(format!("invalid private key in {}: {e}", path.display())))?
        .ok_or_else(|| TransportError::Tls(format!("missing private key in {}", path.display())))
}

fn tls_err(e: rustls::Error) -> TransportError {
    TransportError::Tls(e.to_string())
}

/// Host part of `host:port`, without IPv6 brackets.
fn host(address: &str) -> &str {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Accepts any server certificate; signatures are still checked.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_host_from_address() {
        assert_eq!(host("example.com:443"), "example.com");
        assert_eq!(host("[::1]:8443"), "::1");
        assert_eq!(host("10.0.0.1:80"), "10.0.0.1");
        assert_eq!(host("localhost"), "localhost");
    }

    #[test]
    fn test_skip_verify_config_builds() {
        let opts = TlsOptions::new(CaSource::SkipVerify);
        assert!(client_config(&opts).is_ok());
    }

    #[test]
    fn test_missing_ca_file() {
        let opts = TlsOptions::new(CaSource::File(PathBuf::from("/nonexistent/ca.pem")));
        let err = client_config(&opts).unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
