//! rustls client configuration for the socket transport.

use crate::{TransportError, TransportResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{debug, warn};

/// Client config trusting the platform's root certificates, or trusting any
/// certificate when `allow_untrusted_server` is set.
pub(crate) fn client_config(allow_untrusted_server: bool) -> TransportResult<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let config = if allow_untrusted_server {
        warn!("TLS certificate verification disabled for the collector");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(native_roots()?)
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

fn native_roots() -> TransportResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!(error = %err, "Skipping unreadable native certificate source");
    }

    let mut valid = 0;
    for cert in native.certs {
        if roots.add(cert).is_ok() {
            valid += 1;
        }
    }
    if valid == 0 {
        return Err(TransportError::Tls(
            "no usable root certificates found".to_string(),
        ));
    }
    debug!(count = valid, "Loaded native root certificates");
    Ok(roots)
}

/// Server name for SNI and certificate checks.
pub(crate) fn server_name(host: &str) -> TransportResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::Tls(format!("invalid server name {host:?}: {e}")))
}

/// Skips chain validation but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
