use sqlx::PgPool;
use std::sync::Arc;

use crate::producer::Producer;
use crate::services::queue::JobBroker;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub broker: Arc<dyn JobBroker>,
    pub producer: Arc<Producer>,
}

impl AppState {
    pub fn new(db: PgPool, broker: Arc<dyn JobBroker>, producer: Arc<Producer>) -> Self {
        Self {
            db,
            broker,
            producer,
        }
    }
}
