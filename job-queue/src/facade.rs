use std::sync::Arc;

use async_trait::async_trait;
use common::utils::config::AppConfig;
use tracing::{error, info, warn};

use crate::{
    durable::{BrokerSettings, DurableQueue, WorkerHandle},
    error::JobError,
    events::JobEvents,
    executor::ProcessOutcome,
    fallback::FallbackQueue,
    job::{FileJobPayload, Job, JobHandler, PROCESS_FILE_JOB},
};

/// Which backend a [`JobQueue`] ended up with. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Durable,
    Fallback,
}

impl QueueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueMode::Durable => "durable",
            QueueMode::Fallback => "fallback",
        }
    }
}

#[derive(Debug)]
pub enum WorkerStatus {
    /// A broker consumer is running.
    Registered(WorkerHandle),
    /// The fallback queue drains itself.
    HandledInternally,
    /// Registration failed; jobs are still accepted but nothing consumes them.
    Uninitialized,
}

/// Contract shared by the durable and in-memory queues.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn mode(&self) -> QueueMode;

    fn events(&self) -> &JobEvents;

    async fn enqueue(&self, name: &str, payload: FileJobPayload) -> Result<Job, JobError>;

    async fn init_worker(&self) -> Result<WorkerStatus, JobError>;
}

/// Single entry point producers and the process bootstrap use for background work.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
}

impl JobQueue {
    /// Tries the broker first and falls back to the in-memory queue when it cannot
    /// be reached. Never fails.
    pub async fn connect(config: &AppConfig, handler: Arc<dyn JobHandler>) -> Self {
        let settings = BrokerSettings::from_config(config);
        info!(address = %settings.address(), queue = %settings.queue_name, "connecting to job broker");

        let durable = DurableQueue::connect(&settings, Arc::clone(&handler)).await;
        Self::select(durable, &config.queue_name, handler)
    }

    pub fn select(
        durable: Result<DurableQueue, JobError>,
        queue_name: &str,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        match durable {
            Ok(queue) => {
                info!(queue = %queue.name(), "using durable job queue");
                Self::from_backend(Arc::new(queue))
            }
            Err(err) => {
                warn!(error = %err, "job broker unavailable, falling back to in-memory queue");
                Self::fallback(queue_name, handler)
            }
        }
    }

    pub fn fallback(queue_name: &str, handler: Arc<dyn JobHandler>) -> Self {
        Self::from_backend(Arc::new(FallbackQueue::new(queue_name, handler)))
    }

    pub fn from_backend(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub fn mode(&self) -> QueueMode {
        self.backend.mode()
    }

    pub fn events(&self) -> &JobEvents {
        self.backend.events()
    }

    /// Submits a `processFile` job. Errors are logged and handed back to the caller.
    pub async fn enqueue(&self, payload: FileJobPayload) -> Result<Job, JobError> {
        let file_id = payload.file_id;
        match self.backend.enqueue(PROCESS_FILE_JOB, payload).await {
            Ok(job) => {
                info!(job_id = %job.id, file_id, mode = self.mode().as_str(), "job queued");
                Ok(job)
            }
            Err(err) => {
                error!(file_id, error = %err, "failed to queue job");
                Err(err)
            }
        }
    }

    /// Starts consumption. Failures are logged and reported as
    /// [`WorkerStatus::Uninitialized`] so startup can continue.
    pub async fn init_worker(&self) -> WorkerStatus {
        match self.backend.init_worker().await {
            Ok(status) => {
                info!(mode = self.mode().as_str(), "job worker initialized");
                status
            }
            Err(err) => {
                error!(error = %err, "failed to initialize job worker");
                warn!("jobs will be accepted but not processed until a worker is running");
                WorkerStatus::Uninitialized
            }
        }
    }

    pub fn on_completed<F>(&self, listener: F)
    where
        F: Fn(&Job, &ProcessOutcome) + Send + Sync + 'static,
    {
        self.events().on_completed(listener);
    }

    pub fn on_failed<F>(&self, listener: F)
    where
        F: Fn(&Job, &str) + Send + Sync + 'static,
    {
        self.events().on_failed(listener);
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("mode", &self.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        events::JobEvent,
        job::JobStatus,
        test_support::{event_channel, next_event, payload, RecordingHandler},
    };

    struct BrokenWorkerBackend {
        events: JobEvents,
    }

    #[async_trait]
    impl QueueBackend for BrokenWorkerBackend {
        fn mode(&self) -> QueueMode {
            QueueMode::Durable
        }

        fn events(&self) -> &JobEvents {
            &self.events
        }

        async fn enqueue(&self, _name: &str, _payload: FileJobPayload) -> Result<Job, JobError> {
            Err(JobError::Broker("write refused".into()))
        }

        async fn init_worker(&self) -> Result<WorkerStatus, JobError> {
            Err(JobError::WorkerInit("consumer rejected".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_broker_selects_fallback() {
        let queue = JobQueue::select(
            Err(JobError::BrokerUnavailable("connection refused".into())),
            "fileProcessing",
            Arc::new(RecordingHandler::default()),
        );
        assert_eq!(queue.mode(), QueueMode::Fallback);

        let completed = Arc::new(Mutex::new(Vec::new()));
        {
            let completed = Arc::clone(&completed);
            queue.on_completed(move |job, result| {
                completed
                    .lock()
                    .expect("lock")
                    .push((job.id.clone(), result.file_id));
            });
        }
        let mut rx = event_channel(queue.events());

        let job = queue.enqueue(payload(42)).await.expect("enqueue");
        assert_eq!(job.name, PROCESS_FILE_JOB);
        assert_eq!(job.status, JobStatus::Queued);

        let event = next_event(&mut rx).await;
        assert!(matches!(event, JobEvent::Completed { .. }));
        assert_eq!(*completed.lock().expect("lock"), vec![(job.id, 42)]);
    }

    #[tokio::test]
    async fn test_fallback_init_worker_is_handled_internally() {
        let queue = JobQueue::fallback("fileProcessing", Arc::new(RecordingHandler::default()));

        assert!(matches!(
            queue.init_worker().await,
            WorkerStatus::HandledInternally
        ));
    }

    #[tokio::test]
    async fn test_worker_init_failure_is_not_fatal() {
        let queue = JobQueue::from_backend(Arc::new(BrokenWorkerBackend {
            events: JobEvents::new(),
        }));

        assert!(matches!(queue.init_worker().await, WorkerStatus::Uninitialized));
    }

    #[tokio::test]
    async fn test_enqueue_errors_reach_the_caller() {
        let queue = JobQueue::from_backend(Arc::new(BrokenWorkerBackend {
            events: JobEvents::new(),
        }));

        let result = queue.enqueue(payload(1)).await;

        assert!(matches!(result, Err(JobError::Broker(_))));
    }

    #[tokio::test]
    async fn test_failed_listener_sees_error_message() {
        let queue = JobQueue::fallback("fileProcessing", Arc::new(RecordingHandler::default()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        {
            let failures = Arc::clone(&failures);
            queue.on_failed(move |job, error| {
                failures
                    .lock()
                    .expect("lock")
                    .push((job.payload.file_id, error.to_string()));
            });
        }
        let mut rx = event_channel(queue.events());

        queue.enqueue(payload(-5)).await.expect("enqueue");
        next_event(&mut rx).await;

        assert_eq!(
            *failures.lock().expect("lock"),
            vec![(-5, "File not found".to_string())]
        );
    }
}
