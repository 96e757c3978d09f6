pub mod broker;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::JobError,
    events::{JobEvent, JobEvents},
    facade::{QueueBackend, QueueMode, WorkerStatus},
    job::{settle, FileJobPayload, Job, JobHandler},
};

pub use broker::{BrokerSettings, JobBroker, RedisBroker, Reservation};

/// How long a single reserve call may block waiting for work. Also bounds how
/// long shutdown waits for an idle consumer.
const RESERVE_BLOCK: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Queue backed by an external broker. Jobs survive restarts of this process and
/// completion events are raised locally by the consumer that ran the job.
pub struct DurableQueue {
    broker: Arc<dyn JobBroker>,
    name: String,
    handler: Arc<dyn JobHandler>,
    events: JobEvents,
    worker_started: AtomicBool,
}

impl DurableQueue {
    /// Connects to Redis and verifies the broker answers before returning.
    pub async fn connect(
        settings: &BrokerSettings,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, JobError> {
        let broker = RedisBroker::connect(settings).await?;
        Self::with_broker(Arc::new(broker), &settings.queue_name, handler).await
    }

    pub async fn with_broker(
        broker: Arc<dyn JobBroker>,
        name: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, JobError> {
        broker.ping().await.map_err(unavailable)?;

        Ok(Self {
            broker,
            name: name.to_string(),
            handler,
            events: JobEvents::new(),
            worker_started: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn unavailable(err: JobError) -> JobError {
    match err {
        JobError::BrokerUnavailable(_) => err,
        other => JobError::BrokerUnavailable(other.to_string()),
    }
}

#[async_trait]
impl QueueBackend for DurableQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Durable
    }

    fn events(&self) -> &JobEvents {
        &self.events
    }

    async fn enqueue(&self, name: &str, payload: FileJobPayload) -> Result<Job, JobError> {
        let job = self.broker.add(name, &payload).await?;
        info!(queue = %self.name, job_id = %job.id, file_id = job.payload.file_id, "added job to broker");
        Ok(job)
    }

    /// Registers the single consumer for this queue.
    async fn init_worker(&self) -> Result<WorkerStatus, JobError> {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            return Err(JobError::WorkerInit(format!(
                "a consumer is already registered for queue {}",
                self.name
            )));
        }

        if let Err(err) = self.broker.ping().await {
            self.worker_started.store(false, Ordering::SeqCst);
            return Err(JobError::WorkerInit(err.to_string()));
        }

        let consumer = Consumer {
            worker_id: format!("queue-worker-{}", Uuid::new_v4()),
            queue: self.name.clone(),
            broker: Arc::clone(&self.broker),
            handler: Arc::clone(&self.handler),
            events: self.events.clone(),
        };
        let worker_id = consumer.worker_id.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let join = tokio::spawn(consumer.run(Arc::clone(&stop)));

        Ok(WorkerStatus::Registered(WorkerHandle {
            worker_id,
            stop,
            join,
        }))
    }
}

/// Handle to a running broker consumer. Dropping it leaves the consumer running.
pub struct WorkerHandle {
    worker_id: String,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Stops reserving new jobs and waits for the reserve or job in flight to settle.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(err) = self.join.await {
            error!(worker_id = %self.worker_id, error = %err, "worker task ended abnormally");
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

struct Consumer {
    worker_id: String,
    queue: String,
    broker: Arc<dyn JobBroker>,
    handler: Arc<dyn JobHandler>,
    events: JobEvents,
}

impl Consumer {
    async fn run(self, stop: Arc<AtomicBool>) {
        let worker_id = self.worker_id.as_str();
        info!(%worker_id, queue = %self.queue, "durable worker started");

        // A reserve is never cancelled once started: the broker has already moved
        // the id to `active` by the time it returns.
        while !stop.load(Ordering::SeqCst) {
            match self.broker.reserve(RESERVE_BLOCK).await {
                Ok(Some(Reservation::Job(job))) => self.dispatch(job).await,
                Ok(Some(Reservation::Unreadable { id, reason })) => {
                    self.reject(&id, &reason).await;
                }
                Ok(None) => tokio::task::yield_now().await,
                Err(err) => {
                    error!(%worker_id, error = %err, "failed to reserve job");
                    warn!("Backing off for 1s after broker error");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }

        info!(%worker_id, queue = %self.queue, "durable worker stopped");
    }

    async fn dispatch(&self, mut job: Job) {
        let worker_id = self.worker_id.as_str();
        if let Err(err) = job.start_processing() {
            warn!(%worker_id, job_id = %job.id, error = %err, "skipping job");
            return;
        }
        info!(%worker_id, job_id = %job.id, file_id = job.payload.file_id, "processing job");

        let event = match settle(self.handler.as_ref(), &mut job).await {
            Ok(event) => event,
            Err(err) => {
                error!(%worker_id, job_id = %job.id, error = %err, "could not settle job");
                return;
            }
        };

        let reported = match &event {
            JobEvent::Completed { job, result } => {
                info!(%worker_id, job_id = %job.id, "job completed");
                self.broker.complete(job, result).await
            }
            JobEvent::Failed { job, error } => {
                error!(%worker_id, job_id = %job.id, %error, "job failed");
                self.broker.fail(job, error).await
            }
        };
        if let Err(err) = reported {
            error!(%worker_id, job_id = %job.id, error = %err, "failed to report job outcome to broker");
        }

        self.events.emit(&event);
    }

    async fn reject(&self, id: &str, reason: &str) {
        let worker_id = self.worker_id.as_str();
        error!(%worker_id, job_id = %id, %reason, "discarding unreadable job");
        if let Err(err) = self.broker.reject(id, reason).await {
            error!(%worker_id, job_id = %id, error = %err, "failed to move unreadable job to failed");
        }
    }
}
