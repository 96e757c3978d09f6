use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, types::user::User},
    utils::config::{get_config, AppConfig},
};
use job_queue::{FileProcessor, JobQueue, WorkerStatus};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;

    if let Some(api_key) = &config.bootstrap_api_key {
        let user = User::ensure_with_api_key("admin", api_key, &db).await?;
        info!(user_id = %user.id, "Bootstrap user ready");
    }

    // The queue degrades to in-memory mode instead of failing startup.
    let queue = build_queue(&config, Arc::clone(&db)).await;
    let worker = queue.init_worker().await;
    if matches!(worker, WorkerStatus::Uninitialized) {
        warn!("Starting without a job consumer");
    }

    let api_state = ApiState::new(db, &config, queue);
    let app = build_app(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let WorkerStatus::Registered(handle) = worker {
        info!(worker_id = %handle.worker_id(), "Stopping job worker");
        handle.shutdown().await;
    }

    Ok(())
}

fn build_app(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state)
}

async fn build_queue(config: &AppConfig, db: Arc<SurrealDbClient>) -> JobQueue {
    let processor = Arc::new(FileProcessor::new(db, &config.data_dir));
    let queue = JobQueue::connect(config, processor).await;
    info!(mode = queue.mode().as_str(), "Job queue ready");

    queue.on_completed(|job, result| {
        info!(
            job_id = %job.id,
            file_id = result.file_id,
            "File processing completed"
        );
    });
    queue.on_failed(|job, error| {
        error!(
            job_id = %job.id,
            file_id = job.payload.file_id,
            %error,
            "File processing failed"
        );
    });

    queue
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
