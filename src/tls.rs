//! mTLS listener configuration: CA trust pool, hardened cipher/curve list,
//! required-and-verified client certificates, and peer identity extraction.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::crypto::aws_lc_rs::cipher_suite::{
    TLS13_AES_128_GCM_SHA256, TLS13_AES_256_GCM_SHA384, TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
};
use rustls::crypto::aws_lc_rs::kx_group::{SECP256R1, SECP384R1, SECP521R1};
use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::TlsError;

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_string()))
}

/// The server's preferred cipher suites, in preference order. Restricting to
/// this list is a hardening choice carried over from the source's Go
/// `tls.Config.CipherSuites`.
const PREFERRED_SUITES: &[rustls::SupportedCipherSuite] = &[
    TLS13_AES_128_GCM_SHA256,
    TLS13_AES_256_GCM_SHA384,
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
];

/// Curve preference, in order: P-521, P-384, P-256.
const PREFERRED_GROUPS: &[&dyn rustls::crypto::SupportedKxGroup] = &[SECP521R1, SECP384R1, SECP256R1];

fn hardened_provider() -> Result<CryptoProvider, TlsError> {
    let base = rustls::crypto::aws_lc_rs::default_provider();

    // Both lists above are fixed, non-empty arrays of typed constants the
    // aws-lc-rs provider always supports; the check still guards against a
    // future edit that empties PREFERRED_GROUPS and would otherwise produce
    // a ServerConfig that can perform no key exchange.
    if PREFERRED_GROUPS.is_empty() {
        return Err(TlsError::NoKeyExchangeGroups);
    }

    Ok(CryptoProvider {
        cipher_suites: PREFERRED_SUITES.to_vec(),
        kx_groups: PREFERRED_GROUPS.to_vec(),
        ..base
    })
}

/// Build the server-side mTLS configuration: CA pool for client verification,
/// server identity, TLS 1.2 floor, hardened cipher/curve list.
pub fn build_server_config(
    cert_path: &str,
    key_path: &str,
    ca_path: &str,
) -> Result<Arc<ServerConfig>, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::Rustls(rustls::Error::General(e.to_string())))?;
    }

    let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| TlsError::Rustls(rustls::Error::General(e.to_string())))?;

    let provider = Arc::new(hardened_provider()?);

    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Extract the Subject Common Name of the first peer certificate in the
/// verified chain. Returns `None` if there is no peer certificate, which the
/// caller treats as a failed handshake.
pub fn peer_common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = x509_parser::prelude::parse_x509_certificate(cert.as_ref()).ok()?;
    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
}
