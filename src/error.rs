//! Error types for gloss
//!
//! Only startup errors live here. Per-request failures never surface as
//! errors: the transport turns them into HTTP responses.

use std::io;
use std::net::SocketAddr;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for startup operations
pub type Result<T> = std::result::Result<T, GlossError>;

/// Malformed mapping specification
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Token has no `host:port` separator
    #[error("Mapping error: '{token}' is not of the form host:port")]
    MissingSeparator { token: String },

    /// Port is not a base-10 number in 1..=65535
    #[error("Mapping error: invalid port in '{token}': {reason}")]
    InvalidPort { token: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid_port(token: &str, err: ParseIntError) -> Self {
        ConfigError::InvalidPort {
            token: token.to_string(),
            reason: err.to_string(),
        }
    }
}

/// The certificate provider could not produce a usable key pair
#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("TLS config error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::RcgenError),
}

/// Fatal startup and lifecycle errors
#[derive(Error, Debug)]
pub enum GlossError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// A listener could not bind its port
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A supervised listener task panicked or was cancelled
    #[error("listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
