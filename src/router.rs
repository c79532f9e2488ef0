//! Host based request routing
//!
//! Rewrites the destination of a request to the loopback backend mapped for
//! its host. Unmapped hosts are left untouched.

use crate::access_log::request_host;
use crate::context::Context;
use hyper::header::{HeaderValue, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Uri};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Backends are always dialled over IPv4 loopback. "localhost" may resolve
/// to ::1 first on dual-stack hosts.
pub const BACKEND_ADDR: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Outcome of routing a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Destination rewritten to the backend on this port
    Routed { port: u16 },
    /// No mapping for the host; request left as it was
    Unmapped,
}

/// Resolves request hosts against the mapping table
#[derive(Clone)]
pub struct Router {
    context: Arc<Context>,
}

impl Router {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    /// Rewrite `req` in place towards its mapped backend
    pub fn route<B>(&self, req: &mut Request<B>) -> Route {
        let host = request_host(req);

        let Some(port) = self.context.mappings.get(&host) else {
            warn!("No mapping found for domain {}", host);
            return Route::Unmapped;
        };

        match backend_target(req.uri(), port) {
            Ok((uri, host_value)) => {
                debug!("Routing {} to {}", host, uri);
                *req.uri_mut() = uri;
                req.headers_mut().insert(HOST, host_value);
                Route::Routed { port }
            }
            Err(e) => {
                warn!("Cannot rewrite request for {} to port {}: {}", host, port, e);
                Route::Unmapped
            }
        }
    }
}

/// Absolute backend URI and matching `Host` value for `port`
fn backend_target(uri: &Uri, port: u16) -> Result<(Uri, HeaderValue), hyper::http::Error> {
    let authority: Authority = format!("{}:{}", BACKEND_ADDR, port).parse()?;
    let host_value = HeaderValue::from_str(authority.as_str())?;

    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(authority);
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }

    Ok((Uri::from_parts(parts)?, host_value))
}
