//! TLS setup and client identity extraction.
//!
//! The listener terminates TLS itself with a rustls config that *requires*
//! client certificates chaining to the configured CA. The client identity
//! is the subject Common Name of the presented leaf certificate.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig as TlsServerConfig};
use x509_cert::der::asn1::{PrintableStringRef, Utf8StringRef};
use x509_cert::der::Decode;

use crate::error::ServerError;

/// Build the rustls server config with mandatory client authentication.
pub fn build_tls_config(
    cert_file: &Path,
    key_file: &Path,
    ca_file: &Path,
) -> Result<Arc<TlsServerConfig>, ServerError> {
    let certs = read_certs(cert_file)?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_file)?))?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {}", key_file.display())))?;

    let mut roots = RootCertStore::empty();
    for ca in read_certs(ca_file)? {
        roots
            .add(ca)
            .map_err(|err| ServerError::Tls(format!("bad CA certificate: {err}")))?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|err| ServerError::Tls(format!("client verifier: {err}")))?;

    let config = TlsServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    rustls_pemfile::certs(&mut BufReader::new(File::open(path)?))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ServerError::Io)
}

/// Subject Common Name of the peer's leaf certificate, if present.
pub fn peer_common_name(certs: &[CertificateDer<'_>]) -> Option<String> {
    let leaf = certs.first()?;
    let cert = x509_cert::Certificate::from_der(leaf.as_ref()).ok()?;
    for rdn in cert.tbs_certificate.subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid != const_oid::db::rfc4519::CN {
                continue;
            }
            if let Ok(name) = atv.value.decode_as::<Utf8StringRef<'_>>() {
                return Some(name.to_string());
            }
            if let Ok(name) = atv.value.decode_as::<PrintableStringRef<'_>>() {
                return Some(name.to_string());
            }
        }
    }
    None
}
