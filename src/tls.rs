use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore,
    SignatureScheme,
};

use crate::config::TlsSettings;
use crate::error::ConfigError;

/// Slot the handshake verifier writes the peer's DER chain into, read
/// back after an exchange completes when certificate attribute
/// extraction is enabled.
pub(crate) type RecordedChain = Arc<Mutex<Option<Vec<Vec<u8>>>>>;

/// TLS material resolved from a section's settings at startup.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedTls {
    pub(crate) config: ClientConfig,
    pub(crate) recorded_chain: Option<RecordedChain>,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_config_error(message: impl Into<String>) -> ConfigError {
    ConfigError::TlsConfig {
        message: message.into(),
    }
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_owned(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::ReadFile {
            path: path.to_owned(),
            source,
        })
}

fn build_roots(settings: &TlsSettings) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();

    if settings.ca_file.is_none() && settings.ca_path.is_none() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    }

    let mut loaded = 0_usize;
    if let Some(ca_file) = &settings.ca_file {
        for cert in read_certs(ca_file)? {
            roots
                .add(cert)
                .map_err(|error| tls_config_error(format!("bad ca cert in {ca_file}: {error}")))?;
            loaded += 1;
        }
    }
    if let Some(ca_path) = &settings.ca_path {
        let entries = std::fs::read_dir(ca_path).map_err(|source| ConfigError::ReadFile {
            path: ca_path.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::ReadFile {
                path: ca_path.clone(),
                source,
            })?;
            let path = entry.path();
            if !has_cert_extension(&path) {
                continue;
            }
            for cert in read_certs(&path.to_string_lossy())? {
                if roots.add(cert).is_ok() {
                    loaded += 1;
                }
            }
        }
    }

    if loaded == 0 {
        return Err(tls_config_error("no usable ca certificates were loaded"));
    }
    Ok(roots)
}

fn has_cert_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            extension.eq_ignore_ascii_case("pem") || extension.eq_ignore_ascii_case("crt")
        })
}

fn load_client_identity(
    settings: &TlsSettings,
) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>, ConfigError> {
    let (Some(cert_file), Some(key_file)) =
        (&settings.certificate_file, &settings.private_key_file)
    else {
        if settings.certificate_file.is_some() || settings.private_key_file.is_some() {
            return Err(tls_config_error(
                "'certificate_file' and 'private_key_file' must be set together",
            ));
        }
        return Ok(None);
    };

    if settings.private_key_password.is_some() {
        return Err(tls_config_error(
            "encrypted private keys are not available in this build, decrypt the key file",
        ));
    }

    let certs = read_certs(cert_file)?;
    if certs.is_empty() {
        return Err(tls_config_error(format!(
            "no certificates found in {cert_file}"
        )));
    }

    let file = File::open(key_file).map_err(|source| ConfigError::ReadFile {
        path: key_file.clone(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ConfigError::ReadFile {
            path: key_file.clone(),
            source,
        })?
        .ok_or_else(|| tls_config_error(format!("no private key found in {key_file}")))?;

    Ok(Some((certs, key)))
}

/// Builds the rustls client configuration for one section, applying the
/// section's trust anchors, verification policy, and client identity.
pub(crate) fn resolve_tls(settings: &TlsSettings) -> Result<ResolvedTls, ConfigError> {
    let provider = provider();
    let roots = Arc::new(build_roots(settings)?);
    let webpki = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&provider))
        .build()
        .map_err(|error| tls_config_error(error.to_string()))?;

    let recorded_chain = settings
        .extract_cert_attrs
        .then(|| Arc::new(Mutex::new(None)));

    let verifier = PolicyVerifier {
        inner: webpki,
        verify_peer: settings.check_cert,
        verify_hostname: settings.check_cert_cn,
        recorded_chain: recorded_chain.clone(),
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| tls_config_error(error.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let config = match load_client_identity(settings)? {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|error| tls_config_error(error.to_string()))?,
        None => builder.with_no_client_auth(),
    };

    Ok(ResolvedTls {
        config,
        recorded_chain,
    })
}

/// Server certificate verifier applying the section's `check_cert` /
/// `check_cert_cn` policy on top of webpki verification, recording the
/// presented chain when attribute extraction wants it.
#[derive(Debug)]
struct PolicyVerifier {
    inner: Arc<WebPkiServerVerifier>,
    verify_peer: bool,
    verify_hostname: bool,
    recorded_chain: Option<RecordedChain>,
}

impl PolicyVerifier {
    fn record(&self, end_entity: &CertificateDer<'_>, intermediates: &[CertificateDer<'_>]) {
        let Some(slot) = &self.recorded_chain else {
            return;
        };
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.as_ref().to_vec());
        chain.extend(intermediates.iter().map(|cert| cert.as_ref().to_vec()));
        let mut guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(chain);
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        self.record(end_entity, intermediates);

        if !self.verify_peer {
            return Ok(ServerCertVerified::assertion());
        }

        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );
        match verified {
            Err(RustlsError::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) if !self.verify_hostname => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
