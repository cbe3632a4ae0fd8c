//! API route handlers mounted under `/api`.
//!
//! Booking, activity and staff routes live in the persistence layer; this
//! module only owns the operational endpoints.

use std::{num::NonZeroU32, sync::Arc, time::Instant};

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{header::USER_AGENT, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::{json, Value};

use crate::{build_info::BuildInfo, error::ApiError, http::observability::ClientIp};

/// Reports accepted per client IP per minute.
pub const CSP_REPORTS_PER_MINUTE: u32 = 60;

const CSP_REPORT_MAX_BYTES: usize = 64 * 1024;
const CSP_REPORT_RETRY_AFTER_SECS: u64 = 60;

/// Client keys tracked before idle ones are pruned.
pub const CSP_REPORT_TRACKED_CLIENTS: usize = 10_000;

/// Per-client limiter that forgets clients once their quota has refilled.
///
/// Keys come from `X-Forwarded-For`, which callers control, so the key set is
/// pruned whenever it reaches `max_tracked`.
pub struct KeyedLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    max_tracked: usize,
}

impl KeyedLimiter {
    #[must_use]
    pub fn new(quota: Quota, max_tracked: usize) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
            max_tracked,
        }
    }

    /// Record one request for `key`; `false` once the key is over quota.
    #[must_use]
    pub fn check(&self, key: &str) -> bool {
        if self.limiter.len() >= self.max_tracked {
            self.prune();
        }
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Drop every key whose quota has fully refilled.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    started_at: Instant,
    build_info: BuildInfo,
    csp_reports: Arc<KeyedLimiter>,
}

impl ApiState {
    #[must_use]
    pub fn new(build_info: BuildInfo) -> Self {
        let per_minute = NonZeroU32::new(CSP_REPORTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN);
        Self {
            started_at: Instant::now(),
            build_info,
            csp_reports: Arc::new(KeyedLimiter::new(
                Quota::per_minute(per_minute),
                CSP_REPORT_TRACKED_CLIENTS,
            )),
        }
    }
}

/// Routes relative to the API prefix.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/csp-report", post(csp_report))
        .fallback(not_found)
        .with_state(state)
}

/// Liveness check. Never touches storage so it stays instant.
#[allow(clippy::unused_async)] // Required for Axum handler signature
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "version": state.build_info.version,
    }))
}

/// Receive browser CSP violation reports.
///
/// Always answers `204` unless the caller is over its report quota; a bad
/// payload is logged and otherwise ignored.
async fn csp_report(
    State(state): State<ApiState>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let ip = request
        .extensions()
        .get::<ClientIp>()
        .map_or_else(|| "unknown".to_string(), |ClientIp(ip)| ip.clone());

    if !state.csp_reports.check(&ip) {
        tracing::warn!(ip = %ip, "CSP report rate limit exceeded");
        return Err(ApiError::RateLimited {
            retry_after_secs: CSP_REPORT_RETRY_AFTER_SECS,
        });
    }

    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let report = match to_bytes(request.into_body(), CSP_REPORT_MAX_BYTES).await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match report {
        Ok(report) => tracing::warn!(
            kind = "csp",
            user_agent = ?user_agent,
            ip = %ip,
            report = %report,
            "CSP violation detected"
        ),
        Err(error) => tracing::error!(error = %error, ip = %ip, "Error processing CSP report"),
    }

    Ok(StatusCode::NO_CONTENT)
}

#[allow(clippy::unused_async)] // Required for Axum handler signature
async fn not_found() -> impl IntoResponse {
    ApiError::NotFound
}
