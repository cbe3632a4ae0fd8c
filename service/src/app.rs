//! Router assembly shared by `main.rs` and the integration tests.
//!
//! Layer order, outermost first:
//! 1. Security headers (CSP derived from the origin policy)
//! 2. Gzip compression
//! 3. Request logging (one entry per request, preflights included)
//! 4. CORS, `/api` only
//! 5. API cache headers, `/api` only
//! 6. Routes
//!
//! Compression sits outside request logging so captured bodies are the
//! uncompressed JSON.

use std::sync::Arc;

use axum::{
    http::{
        header::{HeaderName, CACHE_CONTROL, EXPIRES, PRAGMA},
        HeaderMap, HeaderValue,
    },
    middleware, Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
};

use crate::{
    api::{self, ApiState},
    build_info::BuildInfo,
    config::{Config, StaticFilesConfig},
    http::{
        build_security_headers, cors_layer, request_log_middleware, security_headers_middleware,
        OriginPolicy, OriginPolicyError, RequestLogger,
    },
};

/// Path prefix for API routes.
pub const API_PREFIX: &str = "/api";

const SURROGATE_CONTROL: HeaderName = HeaderName::from_static("surrogate-control");
const CROSS_ORIGIN_RESOURCE_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-resource-policy");

/// Everything the router needs, built once before the listener is bound.
#[derive(Clone)]
pub struct AppContext {
    pub policy: Arc<OriginPolicy>,
    pub security_headers: Option<Arc<HeaderMap>>,
    pub request_logger: Option<RequestLogger>,
    pub static_files: StaticFilesConfig,
    pub build_info: BuildInfo,
}

impl AppContext {
    /// Build the context from validated configuration.
    ///
    /// This is where the origin policy is compiled, so a production config
    /// without an allow-list fails here, before anything is bound.
    ///
    /// # Errors
    /// Returns an [`OriginPolicyError`] if the origin policy cannot be built.
    pub fn from_config(config: &Config, build_info: BuildInfo) -> Result<Self, OriginPolicyError> {
        let policy = Arc::new(OriginPolicy::from_config(
            &config.cors,
            config.environment,
        )?);

        let security_headers = config
            .security_headers
            .enabled
            .then(|| build_security_headers(&config.security_headers, &policy));

        let request_logger = config.request_log.enabled.then(|| {
            RequestLogger::tracing(&config.request_log, config.server.trust_proxy_hops)
        });

        Ok(Self {
            policy,
            security_headers,
            request_logger,
            static_files: config.static_files.clone(),
            build_info,
        })
    }
}

/// Build the `/api` router: routes, cache headers and CORS.
#[must_use]
pub fn api_router(ctx: &AppContext, extra_routes: Router) -> Router {
    api::router(ApiState::new(ctx.build_info.clone()))
        .merge(extra_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    SURROGATE_CONTROL,
                    HeaderValue::from_static("no-store"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    CACHE_CONTROL,
                    HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    PRAGMA,
                    HeaderValue::from_static("no-cache"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    EXPIRES,
                    HeaderValue::from_static("0"),
                )),
        )
        .layer(cors_layer(Arc::clone(&ctx.policy)))
}

/// Static assets and, when configured, the built client with SPA fallback.
fn static_routes(app: Router, config: &StaticFilesConfig) -> Router {
    let mut app = app;

    if let Some(dir) = &config.assets_dir {
        let assets = ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                CROSS_ORIGIN_RESOURCE_POLICY,
                HeaderValue::from_static("cross-origin"),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000, immutable"),
            ))
            .service(ServeDir::new(dir));
        app = app.nest_service("/attached_assets", assets);
    }

    if let Some(dist) = &config.client_dist {
        let index = std::path::Path::new(dist).join("index.html");
        app = app.fallback_service(ServeDir::new(dist).fallback(ServeFile::new(index)));
    }

    app
}

/// Assemble the full application.
///
/// `extra_api_routes` are mounted under [`API_PREFIX`] next to the built-in
/// API routes and get the same CORS and cache behaviour.
#[must_use]
pub fn build_app(ctx: &AppContext, extra_api_routes: Router) -> Router {
    let app = Router::new().nest(API_PREFIX, api_router(ctx, extra_api_routes));
    let mut app = static_routes(app, &ctx.static_files);

    if let Some(logger) = ctx.request_logger.clone() {
        app = app.layer(middleware::from_fn_with_state(logger, request_log_middleware));
    }

    app = app.layer(CompressionLayer::new().gzip(true));

    if let Some(headers) = ctx.security_headers.clone() {
        app = app
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(Extension(headers));
    }

    app
}
