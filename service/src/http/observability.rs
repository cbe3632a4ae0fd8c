//! Structured request logging with PII redaction.
//!
//! [`request_log_middleware`] produces exactly one [`RequestLogEntry`] per
//! request. Each request owns a [`RequestRecord`] that moves through
//! `Started -> BodyCaptured (optional) -> Finished`:
//!
//! - `Started`: method, path, client IP, user agent and a redacted header
//!   snapshot are recorded when the request enters the middleware.
//! - `BodyCaptured`: JSON responses under the API prefix are buffered, the same
//!   bytes are forwarded to the client, and a copy is kept for the log.
//! - `Finished`: [`RequestRecord::finish`] consumes the record and emits the entry
//!   once the last body frame has been handed to the connection.
//!
//! The record travels with the response body, so if the request future or
//! the body is dropped before the end of the stream (client went away), the
//! record emits a single partial entry from its `Drop` impl with
//! `aborted: true`. A finished record never emits again.
//!
//! Entries go to a [`RequestLogSink`]. Sink failures are logged at error level
//! and never change the response.

use std::{
    collections::BTreeMap,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Instant,
};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{
        header::{HeaderName, AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use serde::Serialize;

use crate::config::RequestLogConfig;

/// Placeholder written in place of sensitive header values.
pub const REDACTED: &str = "[REDACTED]";

/// `tracing` target used for request log entries.
pub const REQUEST_LOG_TARGET: &str = "request_log";

/// Status recorded for requests whose connection closed before completion.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

const REDACTED_HEADERS: [HeaderName; 2] = [AUTHORIZATION, COOKIE];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// One structured log record per HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub user_agent: Option<String>,
    pub ip: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedBody>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

/// Copy of a JSON response body kept for the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapturedBody {
    Json(serde_json::Value),
    Truncated(TruncatedBody),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncatedBody {
    pub truncated: bool,
    pub preview: String,
    pub total_bytes: usize,
}

impl CapturedBody {
    /// Capture `bytes`, keeping at most `limit` bytes.
    ///
    /// Returns `Ok(None)` for an empty body.
    ///
    /// # Errors
    /// Returns the parse error when a body within the limit is not valid JSON.
    pub fn from_bytes(bytes: &[u8], limit: usize) -> Result<Option<Self>, serde_json::Error> {
        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes.len() > limit {
            let preview = String::from_utf8_lossy(&bytes[..limit]).into_owned();
            return Ok(Some(Self::Truncated(TruncatedBody {
                truncated: true,
                preview,
                total_bytes: bytes.len(),
            })));
        }
        serde_json::from_slice(bytes).map(|value| Some(Self::Json(value)))
    }
}

/// Errors raised while emitting a log entry. Always contained by the middleware.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("failed to serialize request log entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("request log sink unavailable: {0}")]
    Sink(String),
}

/// Destination for finished request log entries.
pub trait RequestLogSink: Send + Sync {
    /// Emit one entry.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be serialized or written.
    fn emit(&self, entry: &RequestLogEntry) -> Result<(), ObservabilityError>;
}

/// Sink that writes entries as JSON through `tracing` on [`REQUEST_LOG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RequestLogSink for TracingSink {
    fn emit(&self, entry: &RequestLogEntry) -> Result<(), ObservabilityError> {
        let record = serde_json::to_string(entry)?;
        if entry.aborted {
            tracing::warn!(
                target: REQUEST_LOG_TARGET,
                method = %entry.method,
                path = %entry.path,
                duration_ms = entry.duration_ms,
                record = %record,
                "request aborted before completion"
            );
        } else {
            tracing::info!(
                target: REQUEST_LOG_TARGET,
                method = %entry.method,
                path = %entry.path,
                status_code = entry.status_code,
                duration_ms = entry.duration_ms,
                record = %record,
                "request completed"
            );
        }
        Ok(())
    }
}

fn emit(sink: &dyn RequestLogSink, entry: &RequestLogEntry) {
    if let Err(e) = sink.emit(entry) {
        tracing::error!(
            error = %e,
            method = %entry.method,
            path = %entry.path,
            "failed to emit request log entry"
        );
    }
}

/// Client IP resolved by the request log middleware, available to handlers as
/// a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Resolve the client IP the way a proxy-aware server does.
///
/// The address chain is every `X-Forwarded-For` entry followed by the socket
/// peer. The client is the entry `trusted_hops` positions from the right,
/// clamped to the leftmost entry.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted_hops: usize) -> String {
    let mut chain: Vec<String> = if trusted_hops == 0 {
        Vec::new()
    } else {
        headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    };
    chain.push(peer.map_or_else(|| "unknown".to_string(), |ip| ip.to_string()));

    let index = chain.len().saturating_sub(trusted_hops.saturating_add(1));
    chain.swap_remove(index)
}

/// Snapshot request headers, replacing `authorization` and `cookie` values
/// with [`REDACTED`]. Repeated headers are joined with `", "`.
#[must_use]
pub fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut snapshot: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = if REDACTED_HEADERS.contains(name) {
            REDACTED.into()
        } else {
            String::from_utf8_lossy(value.as_bytes())
        };
        snapshot
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                if existing != REDACTED {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
            })
            .or_insert_with(|| value.into_owned());
    }
    snapshot
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    Started,
    BodyCaptured,
    Finished,
}

/// Per-request log state, owned by a single request's middleware future.
pub struct RequestRecord {
    sink: Arc<dyn RequestLogSink>,
    phase: RequestPhase,
    started: Instant,
    method: String,
    path: String,
    user_agent: Option<String>,
    ip: String,
    headers: BTreeMap<String, String>,
    body: Option<CapturedBody>,
}

impl RequestRecord {
    /// Enter the `Started` phase for a request.
    #[must_use]
    pub fn start(sink: Arc<dyn RequestLogSink>, request: &Request, ip: String) -> Self {
        let user_agent = request
            .headers()
            .get(USER_AGENT)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

        Self {
            sink,
            phase: RequestPhase::Started,
            started: Instant::now(),
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            user_agent,
            ip,
            headers: redact_headers(request.headers()),
            body: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach the captured response body. Only the first capture is kept.
    pub fn capture_body(&mut self, body: CapturedBody) {
        if self.phase == RequestPhase::Started {
            self.body = Some(body);
            self.phase = RequestPhase::BodyCaptured;
        }
    }

    /// Enter the terminal `Finished` phase and emit the entry.
    pub fn finish(mut self, status: StatusCode) {
        let entry = self.entry(status.as_u16(), false);
        self.phase = RequestPhase::Finished;
        emit(self.sink.as_ref(), &entry);
    }

    fn entry(&mut self, status_code: u16, aborted: bool) -> RequestLogEntry {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        RequestLogEntry {
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            status_code,
            duration_ms,
            user_agent: self.user_agent.take(),
            ip: std::mem::take(&mut self.ip),
            headers: std::mem::take(&mut self.headers),
            response: self.body.take(),
            aborted,
        }
    }
}

impl Drop for RequestRecord {
    fn drop(&mut self) {
        if self.phase != RequestPhase::Finished {
            self.phase = RequestPhase::Finished;
            let entry = self.entry(CLIENT_CLOSED_REQUEST, true);
            emit(self.sink.as_ref(), &entry);
        }
    }
}

/// Middleware state for [`request_log_middleware`].
#[derive(Clone)]
pub struct RequestLogger {
    sink: Arc<dyn RequestLogSink>,
    api_prefix: Arc<str>,
    max_body_bytes: usize,
    trust_proxy_hops: usize,
}

impl RequestLogger {
    #[must_use]
    pub fn new(
        config: &RequestLogConfig,
        trust_proxy_hops: usize,
        sink: Arc<dyn RequestLogSink>,
    ) -> Self {
        Self {
            sink,
            api_prefix: Arc::from(config.api_prefix.trim_end_matches('/')),
            max_body_bytes: config.max_body_bytes,
            trust_proxy_hops,
        }
    }

    /// Logger writing through [`TracingSink`].
    #[must_use]
    pub fn tracing(config: &RequestLogConfig, trust_proxy_hops: usize) -> Self {
        Self::new(config, trust_proxy_hops, Arc::new(TracingSink))
    }

    /// Whether `path` is under the API prefix (segment-aware: `/apiary` is not).
    #[must_use]
    pub fn is_api_path(&self, path: &str) -> bool {
        path.strip_prefix(self.api_prefix.as_ref())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .is_some_and(|mime| mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json"))
}

/// Buffer the body, keep a copy on `record`, and forward the same bytes.
async fn capture_json(response: Response, record: &mut RequestRecord, limit: usize) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, path = %record.path(), "failed to read response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match CapturedBody::from_bytes(&bytes, limit) {
        Ok(Some(captured)) => record.capture_body(captured),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, path = %record.path(), "failed to capture JSON response body");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Middleware emitting one [`RequestLogEntry`] per request.
///
/// Also inserts a [`ClientIp`] extension so handlers share the same view of
/// the client address.
///
/// # Example
///
/// ```ignore
/// use axum::{middleware, Router};
/// use marrakech_api::http::observability::{request_log_middleware, RequestLogger};
///
/// let logger = RequestLogger::tracing(&config.request_log, config.server.trust_proxy_hops);
/// let app = Router::new()
///     // ... routes ...
///     .layer(middleware::from_fn_with_state(logger, request_log_middleware));
/// ```
pub async fn request_log_middleware(
    State(logger): State<RequestLogger>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(request.headers(), peer, logger.trust_proxy_hops);
    request.extensions_mut().insert(ClientIp(ip.clone()));

    let capture = logger.is_api_path(request.uri().path());
    let mut record = RequestRecord::start(Arc::clone(&logger.sink), &request, ip);

    let response = next.run(request).await;
    let response = if capture && is_json(response.headers()) {
        capture_json(response, &mut record, logger.max_body_bytes).await
    } else {
        response
    };

    let status = response.status();
    if response.body().is_end_stream() {
        record.finish(status);
        return response;
    }
    response.map(|inner| {
        Body::new(LoggedBody {
            inner,
            record: Some(record),
            status,
        })
    })
}

/// Response body that finishes its [`RequestRecord`] after the last frame.
///
/// Dropped before that point, the record is dropped unfinished and logs the
/// request as aborted.
struct LoggedBody {
    inner: Body,
    record: Option<RequestRecord>,
    status: StatusCode,
}

impl LoggedBody {
    fn finish(&mut self) {
        if let Some(record) = self.record.take() {
            record.finish(self.status);
        }
    }
}

impl HttpBody for LoggedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &frame {
            None => this.finish(),
            Some(Ok(_)) => {
                // hyper stops polling once the body reports its end
                if this.inner.is_end_stream() {
                    this.finish();
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "response body failed mid-stream");
                drop(this.record.take());
            }
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]
pub mod mock {
    //! In-memory sinks for tests.

    use super::{ObservabilityError, RequestLogEntry, RequestLogSink};
    use std::sync::Mutex;

    /// Sink that keeps every entry in memory.
    #[derive(Debug, Default)]
    pub struct MemorySink {
        entries: Mutex<Vec<RequestLogEntry>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        /// All entries emitted so far.
        pub fn entries(&self) -> Vec<RequestLogEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl RequestLogSink for MemorySink {
        fn emit(&self, entry: &RequestLogEntry) -> Result<(), ObservabilityError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    /// Sink that rejects every entry.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FailingSink;

    impl RequestLogSink for FailingSink {
        fn emit(&self, _entry: &RequestLogEntry) -> Result<(), ObservabilityError> {
            Err(ObservabilityError::Sink("sink closed".into()))
        }
    }
}
