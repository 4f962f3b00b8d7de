//! TrialDoc API Gateway
//!
//! The HTTP surface the document assistant UI calls.
//! Handles:
//! - Bearer credential pass-through
//! - Rate limiting of query routes, request deadline and concurrency cap
//! - Routing to the query orchestrator and cache administration
//! - Observability (logging, metrics)

mod handlers;
mod middleware;
mod state;

use anyhow::Context;
use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    BoxError, Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use middleware::rate_limit::{rate_limit_middleware, QueryRateLimit};
use std::future::IntoFuture;
use std::net::SocketAddr;
use tokio::signal;
use tower::{limit::GlobalConcurrencyLimitLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trialdoc_common::{
    config::{AppConfig, ObservabilityConfig},
    errors::AppError,
    metrics,
};

pub use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (.env, config files, APP__ environment)
    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting TrialDoc API Gateway v{}", trialdoc_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .add_global_label("service", &config.observability.service_name)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                metrics::PROVIDER_BUCKETS,
            )
            .context("Invalid histogram buckets")?
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(port = config.observability.metrics_port, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let shutdown_timeout = config.shutdown_timeout();
    let state = AppState::from_config(config).context("Failed to construct provider clients")?;
    let shutdown = state.shutdown.clone();

    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight queries end as cancelled instead of holding shutdown open
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .into_future();
    let drain_deadline = async move {
        shutdown.cancelled().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(timeout_secs = shutdown_timeout.as_secs(), "Shutdown timeout elapsed, closing remaining connections");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Whole-request deadline and concurrency cap shared by every route
    let load_shed = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(GlobalConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests));

    // Query routes, rate limited when enabled
    let mut query_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route("/query/fallback", post(handlers::query::query_fallback))
        .route("/query/llm", post(handlers::query::query_llm));
    if let Some(limit) = QueryRateLimit::from_config(&state.config.rate_limit) {
        query_routes = query_routes.route_layer(from_fn_with_state(limit, rate_limit_middleware));
    }

    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/providers", get(handlers::health::providers))

        // PDF highlighting
        .route("/documents/highlighted-pdf", get(handlers::pdf::highlighted_pdf))

        // Source-ID cache administration
        .route(
            "/sources",
            get(handlers::sources::list_sources).delete(handlers::sources::clear_sources),
        )
        .route("/sources/{document_id}", delete(handlers::sources::remove_source))
        .merge(query_routes);

    // Compose the app
    Router::new()
        .nest("/v2", api_routes)
        .layer(load_shed)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Map timeout and limiter failures to API errors
async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::Cancelled.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, format!("Unhandled middleware error: {}", err)).into_response()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
