//! Test app builder that mirrors main.rs wiring with injectable sinks.
//!
//! [`TestAppBuilder`] starts from the default [`Config`], lets a test adjust
//! the origin and logging settings, and assembles the router through
//! [`build_app`] so layer ordering matches production exactly.
//!
//! Extra routes under `/api` are available for exercising the middleware:
//!
//! - `POST /api/bookings` - 201 with a small JSON body
//! - `GET /api/tours` - a JSON list large enough to trip truncation limits
//! - `GET /api/brochure` - plain text
//! - `GET /api/stalled` - never completes
//! - `GET /api/export` - sends headers, then a body that never ends

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use marrakech_api::{
    app::{build_app, AppContext},
    build_info::BuildInfo,
    config::{Config, Environment},
    http::{observability::RequestLogSink, RequestLogger},
};
use serde_json::json;

/// Directory holding static files served under `/attached_assets` in tests.
pub const ASSETS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/assets");

/// Built client used for SPA fallback tests.
pub const CLIENT_DIST: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/dist");

async fn create_booking() -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(json!({
            "id": "bk_1042",
            "status": "pending",
            "guestEmail": "guest@example.com"
        })),
    )
}

async fn list_tours() -> Json<serde_json::Value> {
    let tours: Vec<_> = (0..200)
        .map(|i| json!({ "id": i, "name": format!("Agafay sunset camel ride #{i}") }))
        .collect();
    Json(json!({ "tours": tours }))
}

async fn brochure() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain")], "Dunes, camels and tea")
}

async fn stalled() -> StatusCode {
    std::future::pending::<StatusCode>().await
}

async fn export() -> impl IntoResponse {
    let rows = futures::stream::pending::<Result<Bytes, std::io::Error>>();
    ([(CONTENT_TYPE, "text/csv")], Body::from_stream(rows))
}

/// Builder for test applications that mirrors main.rs wiring.
pub struct TestAppBuilder {
    config: Config,
    sink: Option<Arc<dyn RequestLogSink>>,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppBuilder {
    /// Development config with static assets served from the test fixtures
    /// and request logging through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Config::default();
        config.static_files.assets_dir = Some(ASSETS_DIR.to_string());
        Self { config, sink: None }
    }

    /// App with security headers and request logging turned off.
    #[must_use]
    pub fn minimal() -> Self {
        let mut builder = Self::new();
        builder.config.security_headers.enabled = false;
        builder.config.request_log.enabled = false;
        builder
    }

    #[must_use]
    pub fn with_cors(mut self, origins: &[&str]) -> Self {
        self.config.cors.allowed_origins = origins.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_preview_domain(mut self, pattern: &str) -> Self {
        self.config.cors.preview_domain = Some(pattern.to_string());
        self
    }

    #[must_use]
    pub fn production(mut self) -> Self {
        self.config.environment = Environment::Production;
        self
    }

    #[must_use]
    pub fn without_security_headers(mut self) -> Self {
        self.config.security_headers.enabled = false;
        self
    }

    #[must_use]
    pub fn with_hsts(mut self) -> Self {
        self.config.security_headers.hsts_enabled = true;
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.config.request_log.max_body_bytes = limit;
        self
    }

    /// Serve the fixture client build with `index.html` fallback.
    #[must_use]
    pub fn with_client_dist(mut self) -> Self {
        self.config.static_files.client_dist = Some(CLIENT_DIST.to_string());
        self
    }

    #[must_use]
    pub fn with_trust_proxy_hops(mut self, hops: usize) -> Self {
        self.config.server.trust_proxy_hops = hops;
        self
    }

    /// Send request log entries to `sink` instead of `tracing`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RequestLogSink>) -> Self {
        self.config.request_log.enabled = true;
        self.sink = Some(sink);
        self
    }

    /// Build the router.
    ///
    /// # Panics
    /// Panics if the configured origin policy is invalid.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn build(self) -> Router {
        let mut ctx = AppContext::from_config(&self.config, BuildInfo::from_lookup(|_| None))
            .expect("test config should produce a valid origin policy");

        if let Some(sink) = self.sink {
            ctx.request_logger = Some(RequestLogger::new(
                &self.config.request_log,
                self.config.server.trust_proxy_hops,
                sink,
            ));
        }

        let routes = Router::new()
            .route("/bookings", post(create_booking))
            .route("/tours", get(list_tours))
            .route("/brochure", get(brochure))
            .route("/stalled", get(stalled))
            .route("/export", get(export));

        build_app(&ctx, routes)
    }
}
