//! Application entry point for the `codemetal-soilwatch` dashboard.
//!
//! This binary orchestrates the startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Restoring the operator session and loading the device list
//! - Arming the live stream connection
//! - Mounting the view server routes via the `routes` gateway
//! - Serving until Ctrl-C, then disarming the stream before exit
//!
//! # Environment Variables
//! - `REGISTRY_URL`, `STREAM_URL`, `STREAM_KEY` (**required**)
//! - `SOILWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SOILWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config` for the remaining optional variables.
use std::{env, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use soilwatch::{config, routes, Dashboard};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let dashboard = Arc::new(
        Dashboard::new(&cfg)
            .map_err(|e| anyhow::anyhow!("Invalid REGISTRY_URL '{}': {}", cfg.registry_url, e))?,
    );

    if !dashboard.restore_session() {
        tracing::info!("No stored session, mutations disabled until sign-in");
    }

    // The registry may be down at startup; the list can be refreshed later.
    if let Err(e) = dashboard.refresh_devices().await {
        tracing::warn!("Could not load devices from {}: {}", cfg.registry_url, e);
    }

    dashboard.start();

    // Build app from routes gateway
    let app: Router = routes::router(Arc::clone(&dashboard));

    tracing::info!("Listening on {}", cfg.view_addr);
    let listener = tokio::net::TcpListener::bind(cfg.view_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dashboard.shutdown();
    tracing::info!("Shut down cleanly");

    Ok(())
}

// ---

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received, shutting down");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SOILWATCH_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `SOILWATCH_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SOILWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SOILWATCH_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SOILWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!(
            "{level},hyper_util=info,reqwest=info,tungstenite=info,tokio_tungstenite=info"
        ))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
