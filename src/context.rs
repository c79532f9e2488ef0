//! Server context shared by the router, transport and handler

use crate::access_log::AccessLog;
use crate::mapping::MappingTable;

/// Name used in synthesized error bodies
pub const PROXY_NAME: &str = "Gloss";

/// Everything request handling needs, built once before serving starts
pub struct Context {
    pub mappings: MappingTable,
    pub access_log: AccessLog,
    pub proxy_name: String,
}

impl Context {
    pub fn new(mappings: MappingTable, access_log: AccessLog) -> Self {
        Self {
            mappings,
            access_log,
            proxy_name: PROXY_NAME.to_string(),
        }
    }
}
