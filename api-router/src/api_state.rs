use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use job_queue::JobQueue;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub queue: JobQueue,
}

impl ApiState {
    pub fn new(db: Arc<SurrealDbClient>, config: &AppConfig, queue: JobQueue) -> Self {
        Self {
            db,
            config: config.clone(),
            queue,
        }
    }
}
