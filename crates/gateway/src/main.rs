//! AstroRAG API Gateway
//!
//! Thin HTTP surface over the answer pipeline.
//! Handles:
//! - Request routing and body decoding
//! - Request timeouts and bounded concurrent answers
//! - Observability (JSON logs, Prometheus metrics, request ids)

mod handlers;

use astrorag_common::{config::AppConfig, metrics};
use astrorag_context::AnswerPipeline;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<AnswerPipeline>,
    /// Bounds concurrent pipeline runs
    pub permits: Arc<Semaphore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config);
    info!("Starting AstroRAG API Gateway v{}", astrorag_common::VERSION);

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    match PrometheusBuilder::new().with_http_listener(metrics_addr).install() {
        Ok(()) => info!(addr = %metrics_addr, "Prometheus exporter listening"),
        Err(e) => warn!(error = %e, "Prometheus exporter not installed"),
    }
    metrics::register_metrics();

    let pipeline = AnswerPipeline::bootstrap(&config).await.map_err(|e| {
        error!(error = %e, "Failed to bootstrap the answer pipeline");
        e
    })?;

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
        permits: Arc::new(Semaphore::new(config.server.max_concurrent_requests.max(1))),
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/answer", post(handlers::answer::answer));

    let middleware = ServiceBuilder::new()
        .layer(request_id)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors)
        .layer(propagate_id);

    Router::new()
        .nest("/v1", api_routes)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(middleware)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
