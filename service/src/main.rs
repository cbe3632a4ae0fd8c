#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

use axum::Router;
use clap::Parser;
use marrakech_api::{
    app::{build_app, AppContext},
    build_info::BuildInfo,
    config::Config,
    logging,
};
use std::net::SocketAddr;

/// Marrakech Dunes API server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    // Load and validate configuration first (fail-fast)
    let config = Config::load_from(&args.config).map_err(|e| anyhow::anyhow!("{e}"))?;

    let _log_guard = logging::init(&config.logging);

    // Init banner so container logs clearly show startup
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "marrakech-api starting up"
    );

    let build_info = BuildInfo::from_env();
    tracing::info!(
        version = %build_info.version,
        git_sha = %build_info.git_sha,
        build_time = %build_info.build_time,
        "resolved build metadata"
    );

    // Origin policy must exist before the listener is bound
    let ctx = AppContext::from_config(&config, build_info).map_err(|e| {
        tracing::error!(error = %e, "invalid origin configuration");
        anyhow::anyhow!("{e}")
    })?;

    tracing::info!(
        allowed_origins = ?ctx.policy.allowed_origins(),
        preview_pattern = ?ctx.policy.preview_pattern().map(|p| p.as_str()),
        connect_src = ?ctx.policy.csp_connect_src(),
        "CORS configured"
    );

    if ctx.security_headers.is_some() {
        tracing::info!("Security headers enabled");
    } else {
        tracing::info!("Security headers disabled");
    }

    let app = build_app(&ctx, Router::new());

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
