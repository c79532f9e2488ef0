//! Host to backend port mapping table
//!
//! Built once at startup from a `host:port[,host:port...]` string and
//! read-only for the rest of the process.

use crate::error::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Host token that is logged as a wildcard. It is stored and matched as a
/// literal key like any other host.
pub const WILDCARD_HOST: &str = "*";

/// A single `host -> port` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub host: String,
    pub port: u16,
}

/// Immutable lookup table from host identifier to backend port
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    entries: BTreeMap<String, u16>,
}

impl MappingTable {
    /// Parse a comma-separated list of `host:port` tokens.
    ///
    /// Tokens are trimmed and split on the first colon. A later duplicate of
    /// a host replaces the earlier port. Any malformed token fails the whole
    /// build.
    pub fn build(mappings: &str) -> Result<Self, ConfigError> {
        Self::parse(mappings, None)
    }

    /// Same as [`MappingTable::build`], with startup lines naming the TLS
    /// port the hosts are served on
    pub fn build_for_listener(mappings: &str, tls_port: u16) -> Result<Self, ConfigError> {
        Self::parse(mappings, Some(tls_port))
    }

    fn parse(mappings: &str, tls_port: Option<u16>) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();

        // One line per token in declaration order, so duplicates show up
        for token in mappings.split(',') {
            let entry = parse_token(token.trim())?;
            match (entry.host.as_str(), tls_port) {
                (WILDCARD_HOST, _) => info!("Mapping * to {}", entry.port),
                (host, Some(tls_port)) => info!("Mapping {}:{} to {}", host, tls_port, entry.port),
                (host, None) => info!("Mapping {} to {}", host, entry.port),
            }
            entries.insert(entry.host, entry.port);
        }

        Ok(Self { entries })
    }

    /// Exact-match lookup
    pub fn get(&self, host: &str) -> Option<u16> {
        self.entries.get(host).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by host
    pub fn iter(&self) -> impl Iterator<Item = MappingEntry> + '_ {
        self.entries.iter().map(|(host, port)| MappingEntry {
            host: host.clone(),
            port: *port,
        })
    }
}

fn parse_token(token: &str) -> Result<MappingEntry, ConfigError> {
    let (host, port) = token
        .split_once(':')
        .ok_or_else(|| ConfigError::MissingSeparator {
            token: token.to_string(),
        })?;

    let port: u16 = port
        .parse()
        .map_err(|e| ConfigError::invalid_port(token, e))?;

    if port == 0 {
        return Err(ConfigError::InvalidPort {
            token: token.to_string(),
            reason: "port must be positive".to_string(),
        });
    }

    Ok(MappingEntry {
        host: host.to_string(),
        port,
    })
}
