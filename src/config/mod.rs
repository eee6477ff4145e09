use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Base URL of the AI model gateway
    pub ai_endpoint: String,

    /// API token for the AI model gateway
    pub ai_api_token: String,

    /// Model identifier sent with every request, recorded on job results
    #[serde(default = "default_ai_model")]
    pub ai_model: String,

    /// Number of concurrent worker slots
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Deadline for a single handler execution, in seconds
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Default attempt ceiling for submitted jobs
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,

    /// Base retry backoff delay, in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Retry backoff cap, in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Confidence below which a successful result is routed to human review
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,

    /// Worker poll interval when the queue is empty, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue lease visibility timeout, in seconds
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_ai_model() -> String {
    "wardrobe-vision-1".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_handler_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> i32 {
    3
}

fn default_retry_base_ms() -> u64 {
    2000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000
}

fn default_review_threshold() -> f64 {
    0.6
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
