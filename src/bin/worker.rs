use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use wardrobe_jobs::{
    config::AppConfig,
    db::{self, PgCatalog, PgJobStore},
    producer::Producer,
    services::{ai::GatewayClient, queue::RedisBroker, retry::RetryPolicy},
    worker::{ReviewPolicy, WorkerPool, WorkerPoolConfig},
};

// Sweep cadence for lost-work reconciliation; the cutoff itself tracks
// the lease visibility timeout.
const RECONCILE_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting wardrobe-jobs worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize collaborators
    tracing::info!("Initializing services");
    let store = Arc::new(PgJobStore::new(db_pool.clone()));
    let catalog = Arc::new(PgCatalog::new(db_pool));
    let broker = Arc::new(RedisBroker::new(&config.redis_url).expect("Failed to initialize broker"));
    let model = Arc::new(
        GatewayClient::new(&config.ai_endpoint, &config.ai_api_token, &config.ai_model)
            .expect("Failed to initialize AI client"),
    );

    let retry = RetryPolicy {
        base: Duration::from_millis(config.retry_base_ms),
        cap: Duration::from_millis(config.retry_max_delay_ms),
    };
    let review = ReviewPolicy::with_default_threshold(config.review_threshold);
    let pool_config = WorkerPoolConfig {
        concurrency: config.worker_concurrency,
        handler_timeout: Duration::from_secs(config.handler_timeout_secs),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
    };

    let pool = Arc::new(WorkerPool::new(
        store.clone(),
        broker.clone(),
        catalog,
        model,
        retry,
        review,
        pool_config,
    ));

    // Periodic sweep for work the queue lost track of (worker crashes,
    // enqueue failures at submit time).
    let producer = Producer::new(store, broker, config.default_max_attempts);
    let stall_cutoff = Duration::from_secs(config.visibility_timeout_secs * 2);
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(RECONCILE_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            match producer.reconcile(stall_cutoff).await {
                Ok(report) if report.recovered_running + report.requeued_stale > 0 => {
                    tracing::info!(
                        recovered_running = report.recovered_running,
                        requeued_stale = report.requeued_stale,
                        "Reconciliation sweep re-delivered lost work"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Reconciliation sweep failed"),
            }
        }
    });

    tracing::info!(
        concurrency = config.worker_concurrency,
        "Worker ready, starting job processing loops"
    );

    pool.run().await;
}
