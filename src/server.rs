//! Server lifecycle
//! A plaintext listener that redirects everything to https, and the TLS
//! listener that serves the proxy

use crate::access_log::request_host;
use crate::body::{empty_body, text_response, ProxyBody};
use crate::context::Context;
use crate::error::{GlossError, Result};
use crate::proxy::ProxyHandler;
use crate::timeout::TimeoutIo;
use anyhow::{anyhow, Context as _};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_TLS_PORT: u16 = 443;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_HEADER_BYTES: usize = 1 << 20;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub http_port: u16,
    pub tls_port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            tls_port: DEFAULT_TLS_PORT,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            max_header_bytes: MAX_HEADER_BYTES,
        }
    }
}

/// Proxy server
pub struct ProxyServer {
    config: ServerConfig,
    handler: Arc<ProxyHandler>,
    acceptor: TlsAcceptor,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(config: ServerConfig, context: Arc<Context>, acceptor: TlsAcceptor) -> Self {
        Self {
            config,
            handler: Arc::new(ProxyHandler::new(context)),
            acceptor,
        }
    }

    /// Run both listeners until one of them fails
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut redirect = tokio::spawn(self.clone().run_redirect_server());

        let result = tokio::select! {
            joined = &mut redirect => match joined {
                Ok(result) => result,
                Err(e) => Err(GlossError::Task(e)),
            },
            result = self.clone().run_tls_server() => result,
        };

        redirect.abort();
        if let Err(e) = &result {
            error!("Server stopped: {}", e);
        }
        result
    }

    /// Plaintext listener answering every request with a redirect to https
    async fn run_redirect_server(self: Arc<Self>) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.http_port);
        let listener = bind(addr).await?;
        info!("HTTP redirect server listening on {}", addr);

        loop {
            let Some((stream, remote_addr)) = accept(&listener).await else {
                continue;
            };
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_redirect_connection(stream, config).await {
                    debug!("HTTP connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// TLS listener serving the proxy handler
    async fn run_tls_server(self: Arc<Self>) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.tls_port);
        let listener = bind(addr).await?;
        info!("HTTPS proxy listening on {}", addr);

        loop {
            let Some((stream, remote_addr)) = accept(&listener).await else {
                continue;
            };
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_tls_connection(stream, remote_addr).await {
                    debug!("HTTPS connection error from {}: {:#}", remote_addr, e);
                }
            });
        }
    }

    async fn handle_redirect_connection(
        stream: TcpStream,
        config: ServerConfig,
    ) -> anyhow::Result<()> {
        let io = TokioIo::new(TimeoutIo::new(stream, config.write_timeout));

        http1_builder(&config)
            .serve_connection(
                io,
                service_fn(|req: Request<Incoming>| async move {
                    Ok::<_, Infallible>(redirect_response(&req))
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    async fn handle_tls_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> anyhow::Result<()> {
        let stream = TimeoutIo::new(stream, self.config.write_timeout);
        let tls_stream = timeout(self.config.read_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| anyhow!("TLS handshake timed out"))?
            .context("TLS handshake failed")?;

        let io = TokioIo::new(tls_stream);
        let handler = self.handler.clone();

        http1_builder(&self.config)
            .serve_connection(
                io,
                service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    async move {
                        // Runs to completion, access line included, even if
                        // hyper drops this future on disconnect
                        let round_trip =
                            tokio::spawn(async move { handler.serve(req, remote_addr, true).await });
                        let response = match round_trip.await {
                            Ok(response) => response,
                            Err(e) => {
                                error!("Proxy task for {} failed: {}", remote_addr, e);
                                text_response(
                                    StatusCode::BAD_GATEWAY,
                                    "Internal proxy error".to_string(),
                                )
                            }
                        };
                        Ok::<_, Infallible>(response)
                    }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTPS service error: {}", e))
    }
}

/// HTTP/1 settings shared by both listeners. The header timer bounds each
/// request head from the moment the connection waits for it, idle
/// keep-alive time included.
fn http1_builder(config: &ServerConfig) -> http1::Builder {
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(config.read_timeout)
        .max_buf_size(config.max_header_bytes);
    builder
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| GlossError::Bind { addr, source })
}

async fn accept(listener: &TcpListener) -> Option<(TcpStream, SocketAddr)> {
    match listener.accept().await {
        Ok(conn) => Some(conn),
        Err(e) => {
            warn!("Failed to accept connection: {}", e);
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

/// 301 to the same host and URI under https
pub fn redirect_response<B>(req: &Request<B>) -> Response<ProxyBody> {
    let host = request_host(req);
    if host.is_empty() {
        return text_response(StatusCode::BAD_REQUEST, "Missing Host header".to_string());
    }

    let uri = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let Ok(location) = HeaderValue::from_str(&format!("https://{}{}", host, uri)) else {
        return text_response(StatusCode::BAD_REQUEST, "Invalid Host header".to_string());
    };

    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    response.headers_mut().insert(LOCATION, location);
    response
}
