use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {kind} '{path}': {source}")]
    Read {
        kind: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[error("'{0}' contains no certificates")]
    NoCerts(String),
    #[error("'{0}' contains no private key")]
    NoKey(String),
    #[error("failed to build TLS config: {0}")]
    Config(#[from] rustls::Error),
}

/// Builds the webhook's server-side TLS config from PEM cert and key files
/// (the pair a cert-manager Certificate mounts into the pod).
pub fn server_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = read_certs(cert_path)?;
    let key = read_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(open(path, "cert file")?);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::Read {
            kind: "cert file",
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCerts(path.to_string()));
    }
    Ok(certs)
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(open(path, "key file")?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            kind: "key file",
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(path.to_string()))
}

fn open(path: &str, kind: &'static str) -> Result<File, TlsError> {
    File::open(path).map_err(|source| TlsError::Read {
        kind,
        path: path.to_string(),
        source,
    })
}
