#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

pub mod api;
pub mod app;
pub mod build_info;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
