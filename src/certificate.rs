//! Certificate loading and self-signed certificate setup
//!
//! The proxy only needs a key pair; where it comes from is behind
//! [`CertificateProvider`]. `gloss setup` uses [`generate_self_signed`] to
//! write a pair the default provider can load.

use crate::error::CertificateError;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Certificate chain plus its private key
pub struct CertifiedKey {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Source of the server certificate
pub trait CertificateProvider {
    fn get_certificate(
        &self,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<CertifiedKey, CertificateError>;
}

/// Loads a PEM certificate chain and PEM private key from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct PemFiles;

impl CertificateProvider for PemFiles {
    fn get_certificate(
        &self,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<CertifiedKey, CertificateError> {
        let mut reader = open(cert_path)?;
        let chain = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| CertificateError::Read {
                path: cert_path.to_path_buf(),
                source,
            })?;
        if chain.is_empty() {
            return Err(CertificateError::NoCertificates(cert_path.to_path_buf()));
        }

        let mut reader = open(key_path)?;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|source| CertificateError::Read {
                path: key_path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| CertificateError::NoPrivateKey(key_path.to_path_buf()))?;

        info!("Loaded TLS certificate from {}", cert_path.display());
        Ok(CertifiedKey { chain, key })
    }
}

fn open(path: &Path) -> Result<BufReader<File>, CertificateError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Build the TLS acceptor for the encrypted listener
pub fn tls_acceptor(cert: CertifiedKey) -> Result<TlsAcceptor, CertificateError> {
    Ok(TlsAcceptor::from(Arc::new(server_config(cert)?)))
}

fn server_config(cert: CertifiedKey) -> Result<ServerConfig, CertificateError> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert.chain, cert.key)?;
    // HTTP/1.1 only
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Generate a self-signed certificate for `hosts` and write it as PEM to
/// `cert_path` and `key_path`, creating parent directories
pub fn generate_self_signed(
    hosts: &[String],
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), CertificateError> {
    let mut subject_alt_names: Vec<String> = hosts.to_vec();
    if !subject_alt_names.iter().any(|h| h == "localhost") {
        subject_alt_names.push("localhost".to_string());
    }

    let cert = generate_simple_self_signed(subject_alt_names)?;
    let cert_pem = cert.serialize_pem()?;
    let key_pem = cert.serialize_private_key_pem();

    write(cert_path, &cert_pem)?;
    write(key_path, &key_pem)?;

    info!("Generated self-signed certificate for: {}", hosts.join(", "));
    Ok(())
}

fn write(path: &Path, contents: &str) -> Result<(), CertificateError> {
    let to_error = |source| CertificateError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    fs::write(path, contents).map_err(to_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_and_load() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("nested/cert.pem");
        let key_path = dir.path().join("nested/key.pem");

        generate_self_signed(&["example.org".to_string()], &cert_path, &key_path).unwrap();
        assert!(cert_path.exists());
        assert!(key_path.exists());

        let cert = PemFiles.get_certificate(&cert_path, &key_path).unwrap();
        assert_eq!(cert.chain.len(), 1);
        assert!(tls_acceptor(cert).is_ok());
    }

    #[test]
    fn test_alpn_offers_http11_only() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        generate_self_signed(&["example.org".to_string()], &cert_path, &key_path).unwrap();

        let cert = PemFiles.get_certificate(&cert_path, &key_path).unwrap();
        let config = server_config(cert).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_missing_files() {
        let dir = tempdir().unwrap();
        let result = PemFiles.get_certificate(&dir.path().join("cert.pem"), &dir.path().join("key.pem"));
        assert!(matches!(result, Err(CertificateError::Read { .. })));
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        generate_self_signed(&["example.org".to_string()], &cert_path, &key_path).unwrap();

        // A certificate where the key should be
        let result = PemFiles.get_certificate(&cert_path, &cert_path);
        assert!(matches!(result, Err(CertificateError::NoPrivateKey(_))));
    }

    #[test]
    fn test_cert_file_without_certificates() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        generate_self_signed(&["example.org".to_string()], &cert_path, &key_path).unwrap();

        let result = PemFiles.get_certificate(&key_path, &key_path);
        assert!(matches!(result, Err(CertificateError::NoCertificates(_))));
    }
}
