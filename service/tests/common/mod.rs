//! Common test utilities for integration tests.
//!
//! - [`app_builder::TestAppBuilder`] - Build test Axum apps that mirror main.rs wiring
//! - [`send`] / [`body_json`] - Small request helpers around `oneshot`
//! - [`exchange`] - Send a request and read the whole response, the way a
//!   client that stays connected would
//!
//! # Usage
//!
//! ```ignore
//! use crate::common::app_builder::TestAppBuilder;
//!
//! #[tokio::test]
//! async fn test_with_app() {
//!     let app = TestAppBuilder::new().with_cors(&["http://localhost:5173"]).build();
//!     // Use app.oneshot(...) to send requests
//! }
//! ```

#![allow(dead_code, clippy::expect_used, clippy::missing_panics_doc)]

pub mod app_builder;

use axum::{
    body::{to_bytes, Body},
    http::{Request, Response, StatusCode},
    Router,
};
use tower::ServiceExt;

/// Send one request through a fresh clone of `app`.
pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("response")
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Read a response body as raw bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body")
        .to_vec()
}

/// Send a request and consume the full body. Returns the status.
pub async fn exchange(app: &Router, request: Request<Body>) -> StatusCode {
    let response = send(app, request).await;
    let status = response.status();
    body_bytes(response).await;
    status
}
