//! Gloss - a very simple TLS-terminating reverse proxy
//!
//! - Host based routing to local backends from a static `host:port` table
//! - TLS termination with a certificate loaded from PEM files
//! - One access log line per proxied request
//! - Plain HTTP on port 80 redirected to https

pub mod access_log;
pub mod body;
pub mod certificate;
pub mod context;
pub mod error;
pub mod mapping;
pub mod proxy;
pub mod router;
pub mod server;
pub mod timeout;
pub mod transport;

pub use access_log::{AccessLog, AccessRecord};
pub use certificate::{generate_self_signed, tls_acceptor, CertificateProvider, PemFiles};
pub use context::Context;
pub use error::{CertificateError, ConfigError, GlossError};
pub use mapping::MappingTable;
pub use proxy::ProxyHandler;
pub use router::{Route, Router};
pub use server::{ProxyServer, ServerConfig};
pub use transport::{HttpUpstream, LoggingTransport, Upstream};
