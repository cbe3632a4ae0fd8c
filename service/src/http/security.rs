//! Security headers middleware for HTTP responses.
//!
//! This module provides middleware for adding security headers to HTTP responses,
//! including CSP, HSTS, X-Frame-Options, and other protective headers. The CSP
//! `connect-src` directive is derived from the [`OriginPolicy`] so it always
//! trusts the same origins the CORS layer does.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{
        header::{
            HeaderName, CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY,
            X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
        },
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
    Extension,
};

use super::origin::OriginPolicy;
use crate::config::SecurityHeadersConfig;

pub const REPORT_TO: HeaderName = HeaderName::from_static("report-to");

/// Reporting group name shared by the `Report-To` header and the CSP `report-to` directive.
pub const CSP_REPORT_GROUP: &str = "csp-endpoint";

// 126 days, the value browsers commonly expect for reporting groups
const REPORT_TO_MAX_AGE: u64 = 10_886_400;

/// Render the full Content-Security-Policy value.
///
/// The result is the configured base directives followed by
/// `connect-src 'self' <origins...>` and, when a report endpoint is set, the
/// reporting directives.
#[must_use]
pub fn content_security_policy(config: &SecurityHeadersConfig, policy: &OriginPolicy) -> String {
    let mut directives: Vec<String> = config
        .content_security_policy
        .split(';')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(str::to_string)
        .collect();

    let connect_src = std::iter::once("'self'")
        .chain(policy.csp_connect_src().iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    directives.push(format!("connect-src {connect_src}"));

    if let Some(endpoint) = &config.csp_report_endpoint {
        directives.push(format!("report-uri {endpoint}"));
        directives.push(format!("report-to {CSP_REPORT_GROUP}"));
    }

    directives.join("; ")
}

fn report_to_header(endpoint: &str) -> String {
    serde_json::json!({
        "group": CSP_REPORT_GROUP,
        "max_age": REPORT_TO_MAX_AGE,
        "endpoints": [{ "url": endpoint }],
    })
    .to_string()
}

/// Build security headers from configuration.
///
/// Returns an `Arc`-wrapped `HeaderMap` that can be shared across requests
/// via Axum's `Extension` layer.
#[must_use]
pub fn build_security_headers(
    config: &SecurityHeadersConfig,
    policy: &OriginPolicy,
) -> Arc<HeaderMap> {
    let mut headers = HeaderMap::new();

    // X-Content-Type-Options: nosniff (always)
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    // X-Frame-Options
    if let Ok(value) = HeaderValue::from_str(&config.frame_options) {
        headers.insert(X_FRAME_OPTIONS, value);
    }

    // X-XSS-Protection (legacy but still useful for older browsers)
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));

    match HeaderValue::from_str(&content_security_policy(config, policy)) {
        Ok(value) => {
            headers.insert(CONTENT_SECURITY_POLICY, value);
        }
        Err(e) => tracing::error!(error = %e, "content security policy is not a valid header value"),
    }

    if let Some(endpoint) = &config.csp_report_endpoint {
        if let Ok(value) = HeaderValue::from_str(&report_to_header(endpoint)) {
            headers.insert(REPORT_TO, value);
        }
    }

    // Referrer-Policy
    if let Ok(value) = HeaderValue::from_str(&config.referrer_policy) {
        headers.insert(REFERRER_POLICY, value);
    }

    // HSTS (only if enabled - should only be used with HTTPS)
    if config.hsts_enabled {
        let hsts_value = if config.hsts_include_subdomains {
            format!("max-age={}; includeSubDomains", config.hsts_max_age)
        } else {
            format!("max-age={}", config.hsts_max_age)
        };
        if let Ok(value) = HeaderValue::from_str(&hsts_value) {
            headers.insert(STRICT_TRANSPORT_SECURITY, value);
        }
    }

    Arc::new(headers)
}

/// Middleware to add security headers to all responses.
///
/// This middleware reads the pre-built `HeaderMap` from an `Extension` and
/// extends every response with those headers. It should be added as the
/// outermost layer so headers are applied to all routes.
///
/// # Example
///
/// ```ignore
/// use axum::{middleware, Router, Extension};
/// use marrakech_api::http::security::{build_security_headers, security_headers_middleware};
///
/// let headers = build_security_headers(&config.security_headers, &policy);
///
/// let app = Router::new()
///     // ... routes ...
///     .layer(middleware::from_fn(security_headers_middleware))
///     .layer(Extension(headers));
/// ```
pub async fn security_headers_middleware(
    Extension(headers): Extension<Arc<HeaderMap>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let response_headers = response.headers_mut();
    for (k, v) in headers.iter() {
        response_headers.insert(k.clone(), v.clone());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> OriginPolicy {
        OriginPolicy::new(
            vec![
                "http://localhost:5173".to_string(),
                "https://marrakechdunes.vercel.app".to_string(),
            ],
            None,
            &["https://marrakechdunes.vercel.app".to_string()],
        )
    }

    fn connect_src(csp: &str) -> Option<&str> {
        csp.split(';')
            .map(str::trim)
            .find_map(|directive| directive.strip_prefix("connect-src "))
    }

    #[test]
    fn test_build_security_headers_default() {
        let config = SecurityHeadersConfig::default();
        let headers = build_security_headers(&config, &policy());

        // Should have at least the mandatory headers
        assert!(headers.contains_key(X_CONTENT_TYPE_OPTIONS));
        assert!(headers.contains_key(X_FRAME_OPTIONS));
        assert!(headers.contains_key(X_XSS_PROTECTION));
        assert!(headers.contains_key(CONTENT_SECURITY_POLICY));
        assert!(headers.contains_key(REFERRER_POLICY));
        assert!(headers.contains_key(REPORT_TO));
        assert!(!headers.contains_key(STRICT_TRANSPORT_SECURITY));
    }

    #[test]
    fn test_connect_src_is_self_plus_policy_list() {
        let config = SecurityHeadersConfig::default();
        let csp = content_security_policy(&config, &policy());

        assert_eq!(
            connect_src(&csp),
            Some("'self' http://localhost:5173 https://marrakechdunes.vercel.app")
        );
        assert_eq!(csp.matches("connect-src").count(), 1);
        assert!(csp.starts_with("default-src 'self'"));
    }

    #[test]
    fn test_report_directives_follow_endpoint() {
        let mut config = SecurityHeadersConfig::default();
        let csp = content_security_policy(&config, &policy());
        assert!(csp.contains("report-uri /api/csp-report"));
        assert!(csp.contains("report-to csp-endpoint"));

        config.csp_report_endpoint = None;
        let csp = content_security_policy(&config, &policy());
        assert!(!csp.contains("report-uri"));
        let headers = build_security_headers(&config, &policy());
        assert!(!headers.contains_key(REPORT_TO));
    }

    #[test]
    fn test_report_to_header_is_json() {
        let value: serde_json::Value =
            serde_json::from_str(&report_to_header("/api/csp-report")).expect("valid json");
        assert_eq!(value["group"], "csp-endpoint");
        assert_eq!(value["max_age"], 10_886_400);
        assert_eq!(value["endpoints"][0]["url"], "/api/csp-report");
    }

    #[test]
    fn test_build_security_headers_with_hsts() {
        let mut config = SecurityHeadersConfig::default();
        config.hsts_enabled = true;
        config.hsts_max_age = 31_536_000;
        config.hsts_include_subdomains = true;

        let headers = build_security_headers(&config, &policy());

        let hsts = headers
            .get(STRICT_TRANSPORT_SECURITY)
            .map(|v| v.to_str().unwrap_or_default());

        assert!(hsts.is_some());
        assert!(hsts.unwrap().contains("max-age=31536000"));
        assert!(hsts.unwrap().contains("includeSubDomains"));
    }

    #[test]
    fn test_build_security_headers_custom_frame_options() {
        let mut config = SecurityHeadersConfig::default();
        config.frame_options = "SAMEORIGIN".to_string();

        let headers = build_security_headers(&config, &policy());

        let frame_options = headers
            .get(X_FRAME_OPTIONS)
            .map(|v| v.to_str().unwrap_or_default());

        assert_eq!(frame_options, Some("SAMEORIGIN"));
    }
}
