//! [CORS] layer for the API router, driven by the shared [`OriginPolicy`].
//!
//! [CORS]: https://developer.mozilla.org/en-US/docs/Glossary/CORS

use std::sync::Arc;

use axum::http::{
    header::{self, HeaderName},
    request, HeaderValue, Method,
};
use tower_http::cors::{AllowCredentials, AllowOrigin, CorsLayer};

use super::origin::OriginPolicy;

const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// Build the credentialed CORS layer for `/api` routes.
///
/// Allowed origins are echoed back (never `*`) together with
/// `Access-Control-Allow-Credentials: true`. Rejected origins get neither
/// header and the handler response is left as is. The default `Vary` list
/// (which includes `origin`) is added to every response.
#[must_use]
pub fn cors_layer(policy: Arc<OriginPolicy>) -> CorsLayer {
    let credentials_policy = Arc::clone(&policy);
    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, X_REQUESTED_WITH])
        .allow_credentials(AllowCredentials::predicate(
            move |origin: &HeaderValue, _parts: &request::Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| credentials_policy.is_allowed_origin(Some(origin)))
            },
        ))
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &request::Parts| is_allowed(&policy, origin),
        ))
}

fn is_allowed(policy: &OriginPolicy, origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        tracing::debug!("rejecting CORS request because origin is not utf-8");
        return false;
    };

    let decision = policy.cors_decision(Some(origin));
    if !decision.is_allowed() {
        tracing::debug!(origin, "rejecting CORS request from unrecognized origin");
    }
    decision.is_allowed()
}
