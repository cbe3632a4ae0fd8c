//! HTTP utilities and middleware.
//!
//! This module provides the origin policy and the middleware stack shared by
//! the application server: security headers, CORS and request logging.

pub mod cors;
pub mod observability;
pub mod origin;
pub mod security;

pub use cors::cors_layer;
pub use observability::{request_log_middleware, RequestLogger};
pub use origin::{CorsDecision, OriginPolicy, OriginPolicyError, PreviewPattern};
pub use security::{build_security_headers, security_headers_middleware};
