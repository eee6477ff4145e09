use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use wardrobe_jobs::{
    app_state::AppState,
    config::AppConfig,
    db,
    producer::Producer,
    routes,
    services::queue::RedisBroker,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing wardrobe-jobs API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("ai_jobs_submitted_total", "Total AI jobs submitted");
    metrics::describe_counter!("ai_jobs_succeeded_total", "Total AI jobs that succeeded");
    metrics::describe_counter!(
        "ai_jobs_review_total",
        "Total AI jobs routed to human review"
    );
    metrics::describe_counter!("ai_jobs_failed_total", "Total AI jobs that failed terminally");
    metrics::describe_counter!("ai_jobs_retried_total", "Total AI job retry re-queues");
    metrics::describe_histogram!(
        "ai_job_processing_seconds",
        "Time to process one AI job attempt"
    );
    metrics::describe_gauge!(
        "ai_jobs_queue_depth",
        "Current number of jobs ready for delivery"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job broker
    tracing::info!("Connecting to Redis job broker");
    let broker = Arc::new(RedisBroker::new(&config.redis_url).expect("Failed to initialize broker"));

    let store = Arc::new(db::PgJobStore::new(db_pool.clone()));
    let producer = Arc::new(Producer::new(
        store,
        broker.clone(),
        config.default_max_attempts,
    ));

    // Create shared application state
    let state = AppState::new(db_pool, broker, producer);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::submit_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job))
        .route(
            "/api/v1/jobs/{job_id}/review",
            post(routes::jobs::resolve_review),
        )
        .route(
            "/api/v1/subjects/{kind}/{id}/jobs",
            get(routes::jobs::list_jobs_for_subject),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting wardrobe-jobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
