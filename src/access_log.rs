//! Access log records and the line sink they are written to
//!
//! Line format:
//!
//! ```text
//! <remote_addr> <host> <user|-> [<DD/Mon/YYYY HH:MM:SS>] "<method> <uri> <proto>" <status> <content_length>
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Local};
use hyper::header::{AUTHORIZATION, HOST};
use hyper::{HeaderMap, Method, Request, StatusCode, Uri, Version};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};

const TIME_FORMAT: &str = "%d/%b/%Y %H:%M:%S";
const PLACEHOLDER: &str = "-";

/// What the client originally sent, captured before the router rewrites the
/// request. Stored as a request extension.
#[derive(Debug, Clone)]
pub struct InboundInfo {
    pub remote_addr: SocketAddr,
    pub host: String,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
}

impl InboundInfo {
    pub fn capture<B>(req: &Request<B>, remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            host: request_host(req),
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
        }
    }
}

/// Host as the client sent it: the `Host` header, else the URI authority
pub fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Username from an `Authorization: Basic ...` header, if well formed
pub fn basic_auth_user(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, _password) = decoded.split_once(':')?;
    Some(user.to_string())
}

fn proto_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}

/// One access log line
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub remote_addr: String,
    pub host: String,
    pub user: Option<String>,
    pub time: DateTime<Local>,
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub status: StatusCode,
    /// -1 when the length is not known up front
    pub content_length: i64,
}

impl AccessRecord {
    /// Build a record for a finished round trip. Client-facing fields come
    /// from the [`InboundInfo`] extension when the handler attached one.
    pub fn new<B>(req: &Request<B>, status: StatusCode, content_length: i64) -> Self {
        let user = basic_auth_user(req.headers());

        match req.extensions().get::<InboundInfo>() {
            Some(info) => Self {
                remote_addr: info.remote_addr.to_string(),
                host: info.host.clone(),
                user,
                time: Local::now(),
                method: info.method.clone(),
                uri: info.uri.to_string(),
                version: info.version,
                status,
                content_length,
            },
            None => Self {
                remote_addr: PLACEHOLDER.to_string(),
                host: request_host(req),
                user,
                time: Local::now(),
                method: req.method().clone(),
                uri: req.uri().to_string(),
                version: req.version(),
                status,
                content_length,
            },
        }
    }

    /// Fill in the outcome and stamp the completion time
    pub fn finish(&mut self, status: StatusCode, content_length: i64) {
        self.status = status;
        self.content_length = content_length;
        self.time = Local::now();
    }
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}] \"{} {} {}\" {} {}",
            self.remote_addr,
            self.host,
            self.user.as_deref().unwrap_or(PLACEHOLDER),
            self.time.format(TIME_FORMAT),
            self.method,
            self.uri,
            proto_name(self.version),
            self.status.as_u16(),
            self.content_length,
        )
    }
}

/// Append-only, line-oriented access log sink
pub struct AccessLog {
    sink: Mutex<Box<dyn Write + Send>>,
    _guard: Option<WorkerGuard>,
}

impl AccessLog {
    /// Sink that writes on the caller's thread
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
            _guard: None,
        }
    }

    /// Sink backed by a dedicated writer thread. Lines are queued and never
    /// dropped; a full queue blocks the caller. Pending lines are flushed
    /// when the log is dropped.
    pub fn non_blocking<W: Write + Send + 'static>(writer: W) -> Self {
        let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(writer);
        Self {
            sink: Mutex::new(Box::new(writer)),
            _guard: Some(guard),
        }
    }

    pub fn stdout() -> Self {
        Self::non_blocking(io::stdout())
    }

    /// Write one record as a single line
    pub fn write(&self, record: &AccessRecord) {
        let line = format!("{}\n", record);
        let mut sink = self.sink.lock();
        let result = sink.write_all(line.as_bytes()).and_then(|_| sink.flush());
        if let Err(e) = result {
            warn!("Failed to write access log: {}", e);
        }
    }
}

impl fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLog").finish_non_exhaustive()
    }
}
