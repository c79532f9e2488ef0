//! Upstream transport with error masking and access logging
//!
//! [`LoggingTransport::round_trip`] always yields a response. A failure to
//! reach the backend becomes a 502 with the error in the body, and every
//! round trip produces exactly one access log line.

use crate::access_log::AccessRecord;
use crate::body::{text_response, ProxyBody};
use crate::context::Context;
use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::CONTENT_LENGTH;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Performs the network round trip to a backend
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, BoxError>;
}

/// Plain HTTP upstream over a pooled hyper client
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<HttpConnector, ProxyBody>,
}

impl HttpUpstream {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build_http();
        Self { client }
    }
}

impl Default for HttpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, BoxError> {
        let response = self.client.request(req).await?;
        Ok(response.map(|body| body.boxed()))
    }
}

/// Wraps an [`Upstream`], turning failures into responses and logging
/// every round trip
pub struct LoggingTransport<U = HttpUpstream> {
    upstream: U,
    context: Arc<Context>,
}

impl<U: Upstream> LoggingTransport<U> {
    pub fn new(upstream: U, context: Arc<Context>) -> Self {
        Self { upstream, context }
    }

    pub async fn round_trip(&self, req: Request<ProxyBody>) -> Response<ProxyBody> {
        let mut record = AccessRecord::new(&req, StatusCode::BAD_GATEWAY, -1);

        let response = match self.upstream.send(req).await {
            Ok(response) => response,
            Err(e) => {
                let message = error_chain(&*e);
                warn!("Backend request for {} failed: {}", record.host, message);
                self.error_response(&message)
            }
        };

        record.finish(response.status(), content_length(&response));
        self.context.access_log.write(&record);
        debug!("{} {} -> {}", record.method, record.uri, record.status);

        response
    }

    fn error_response(&self, message: &str) -> Response<ProxyBody> {
        text_response(
            StatusCode::BAD_GATEWAY,
            format!("{} proxy error: {}", self.context.proxy_name, message),
        )
    }
}

/// Error text including its sources, which carry the useful detail for
/// client errors ("client error (Connect): tcp connect error: ...")
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Declared or exactly known body length, -1 when unknown
fn content_length(response: &Response<ProxyBody>) -> i64 {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| {
            response
                .body()
                .size_hint()
                .exact()
                .and_then(|n| i64::try_from(n).ok())
        })
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::test_support::SharedBuffer;
    use crate::access_log::AccessLog;
    use crate::body::{empty_body, full_body};
    use crate::mapping::MappingTable;
    use tokio::net::TcpListener;

    struct FailingUpstream;

    #[async_trait]
    impl Upstream for FailingUpstream {
        async fn send(&self, _req: Request<ProxyBody>) -> Result<Response<ProxyBody>, BoxError> {
            Err("connection refused".into())
        }
    }

    struct FixedUpstream {
        status: StatusCode,
        body: &'static str,
    }

    #[async_trait]
    impl Upstream for FixedUpstream {
        async fn send(&self, _req: Request<ProxyBody>) -> Result<Response<ProxyBody>, BoxError> {
            let mut response = Response::new(full_body(self.body));
            *response.status_mut() = self.status;
            response
                .headers_mut()
                .insert(CONTENT_LENGTH, self.body.len().into());
            Ok(response)
        }
    }

    fn context(buffer: &SharedBuffer) -> Arc<Context> {
        let table = MappingTable::build("a.example:8080").unwrap();
        Arc::new(Context::new(table, AccessLog::new(buffer.clone())))
    }

    fn request() -> Request<ProxyBody> {
        Request::builder()
            .uri("http://127.0.0.1:8080/page")
            .header("host", "a.example")
            .body(empty_body())
            .unwrap()
    }

    async fn body_text(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_failure_becomes_bad_gateway() {
        let buffer = SharedBuffer::default();
        let transport = LoggingTransport::new(FailingUpstream, context(&buffer));

        let response = transport.round_trip(request()).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_text(response).await;
        assert_eq!(body, "Gloss proxy error: connection refused");

        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\" 502 "));
    }

    #[tokio::test]
    async fn test_success_logs_status_and_length() {
        let buffer = SharedBuffer::default();
        let upstream = FixedUpstream {
            status: StatusCode::OK,
            body: "0123456789012345678901234567890123456789ab",
        };
        let transport = LoggingTransport::new(upstream, context(&buffer));

        let response = transport.round_trip(request()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("\" 200 42"), "unexpected line: {}", lines[0]);
        assert!(lines[0].contains(" a.example - ["));
    }

    #[tokio::test]
    async fn test_logs_basic_auth_user() {
        let buffer = SharedBuffer::default();
        let upstream = FixedUpstream {
            status: StatusCode::NO_CONTENT,
            body: "",
        };
        let transport = LoggingTransport::new(upstream, context(&buffer));

        let mut req = request();
        // alice:secret
        req.headers_mut()
            .insert("authorization", "Basic YWxpY2U6c2VjcmV0".parse().unwrap());
        transport.round_trip(req).await;

        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" a.example alice ["));
    }

    #[tokio::test]
    async fn test_refused_backend_with_http_upstream() {
        // Grab a free port, then close it so nothing is listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let buffer = SharedBuffer::default();
        let transport = LoggingTransport::new(HttpUpstream::new(), context(&buffer));

        let req = Request::builder()
            .uri(format!("http://127.0.0.1:{}/", port))
            .body(empty_body())
            .unwrap();
        let response = transport.round_trip(req).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.contains("proxy error"));
        assert_eq!(buffer.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_relative_uri_fails_as_bad_gateway() {
        // An unmapped request still carries its origin-form URI
        let buffer = SharedBuffer::default();
        let transport = LoggingTransport::new(HttpUpstream::new(), context(&buffer));

        let req = Request::builder()
            .uri("/page")
            .header("host", "c.example")
            .body(empty_body())
            .unwrap();
        let response = transport.round_trip(req).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(buffer.lines().len(), 1);
    }
}
