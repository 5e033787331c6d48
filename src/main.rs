//! Turnstile - Membership Lookup API Server
//!
//! A small HTTP service answering "what is this email's membership status?"
//! backed by:
//! - An in-memory snapshot of the billing provider's customer list,
//!   refreshed in full once it goes stale
//! - Single-flight refresh coordination so concurrent lookups never fan out
//!   into duplicate upstream loads
//! - Prometheus metrics

mod cache;
mod config;
mod error;
mod metrics;
mod model;
mod services;
mod utils;

use crate::cache::MemberDirectory;
use crate::config::Config;
use crate::metrics::{create_metrics, SharedMetrics};
use crate::services::billing::BillingApi;
use crate::utils::ascii::print_startup_banner;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Turnstile - Membership Lookup API
#[derive(Parser, Debug)]
#[command(name = "turnstile")]
#[command(author, version, about = "Membership Lookup API Server", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for upstream API requests
    #[arg(long)]
    debug_requests: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    directory: Arc<MemberDirectory<BillingApi>>,
    metrics: SharedMetrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    print_startup_banner();

    info!("Starting Turnstile v{}", env!("CARGO_PKG_VERSION"));

    // Load config (CLI port overrides env var)
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.debug_requests = args.debug_requests;

    if config.debug_requests {
        info!("Request debugging enabled");
    }

    let metrics = create_metrics();

    let api = BillingApi::new(&config.billing.api_url, &config.billing.api_key);
    let directory = Arc::new(MemberDirectory::new(api, metrics.clone()));

    // Warm the snapshot in the background so the first lookup doesn't pay
    // for the full bulk load. Lookups arriving before it finishes simply
    // wait on the same in-flight refresh.
    {
        let directory = directory.clone();
        tokio::spawn(async move {
            info!("Warming member snapshot");
            directory.ensure_fresh().await;
        });
    }

    let state = AppState {
        directory,
        metrics,
    };

    // Setup Router
    let app = Router::new()
        .route("/members/{email}", get(member_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start Server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        "Listening on http://{} (Lookups: /members/{{email}}, Metrics: /metrics, Health: /health)",
        addr
    );

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        info!("Shutdown signal received, initiating graceful shutdown...");
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Turnstile shutdown complete");
    Ok(())
}

/// Membership lookup endpoint
async fn member_handler(State(state): State<AppState>, Path(email): Path<String>) -> Response {
    match state.directory.lookup(&email).await {
        Some(customer) => (StatusCode::OK, Json(customer)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no membership record for that email",
            })),
        )
            .into_response(),
    }
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.render();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.directory.snapshot().get().await;
    let member_count = snapshot.len();
    let age_secs = snapshot.meta.created_at.elapsed().as_secs();

    let status = if member_count > 0 {
        "healthy"
    } else {
        "degraded"
    };

    let body = serde_json::json!({
        "status": status,
        "members": member_count,
        "snapshot_age_seconds": age_secs,
        "version": env!("CARGO_PKG_VERSION"),
    });

    (
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Set turnstile to the requested level, and optionally enable upstream
    // request debugging
    let filter = if debug_requests {
        EnvFilter::new(format!(
            "turnstile={},turnstile::services::billing::api=debug,tower_http=debug,hyper=warn",
            level
        ))
    } else {
        EnvFilter::new(format!("turnstile={},tower_http=info,hyper=warn", level))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
