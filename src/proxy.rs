//! Reverse proxy handler
//! Sets forwarding headers, routes the request and sends it upstream

use crate::access_log::InboundInfo;
use crate::body::ProxyBody;
use crate::context::Context;
use crate::router::{Route, Router};
use crate::transport::{HttpUpstream, LoggingTransport, Upstream};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Hop-by-hop headers that only apply to a single connection
const HOP_HEADERS: [&str; 3] = ["keep-alive", "proxy-connection", "proxy-authenticate"];

/// Router plus logging transport behind one entry point
pub struct ProxyHandler<U = HttpUpstream> {
    router: Router,
    transport: LoggingTransport<U>,
}

impl ProxyHandler<HttpUpstream> {
    /// Handler forwarding over plain HTTP
    pub fn new(context: Arc<Context>) -> Self {
        Self::with_upstream(context, HttpUpstream::new())
    }
}

impl<U: Upstream> ProxyHandler<U> {
    pub fn with_upstream(context: Arc<Context>, upstream: U) -> Self {
        Self {
            router: Router::new(context.clone()),
            transport: LoggingTransport::new(upstream, context),
        }
    }

    /// Serve one request received from `remote_addr`
    pub async fn serve<B>(
        &self,
        req: Request<B>,
        remote_addr: SocketAddr,
        is_tls: bool,
    ) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let info = InboundInfo::capture(&req, remote_addr);
        let mut req = req.map(|body| body.boxed());
        req.extensions_mut().insert(info);

        let headers = req.headers_mut();
        remove_hop_headers(headers);
        if is_tls {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        }
        if let Ok(value) = HeaderValue::from_str(&remote_addr.ip().to_string()) {
            headers.insert(X_FORWARDED_FOR, value);
        }

        if let Route::Routed { port } = self.router.route(&mut req) {
            debug!("Forwarding request from {} to port {}", remote_addr, port);
        }

        let mut response = self.transport.round_trip(req).await;
        remove_hop_headers(response.headers_mut());
        response
    }
}

/// Strip hop-by-hop headers, including any listed in `Connection`
fn remove_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    for name in [CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}
