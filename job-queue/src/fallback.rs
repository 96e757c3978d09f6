use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::JobError,
    events::{JobEvent, JobEvents},
    facade::{QueueBackend, QueueMode, WorkerStatus},
    job::{settle, FileJobPayload, Job, JobHandler},
};

/// In-process, single-consumer FIFO queue used when the broker cannot be reached.
///
/// Contents live only in memory and are lost on restart. A consumer task is started
/// by the first enqueue that finds no active consumer; it drains the queue one job at
/// a time, yields between jobs, and exits once the queue is empty.
#[derive(Clone)]
pub struct FallbackQueue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<DrainState>,
    handler: Arc<dyn JobHandler>,
    events: JobEvents,
}

#[derive(Default)]
struct DrainState {
    jobs: VecDeque<Job>,
    draining: bool,
}

impl FallbackQueue {
    pub fn new(name: &str, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(DrainState::default()),
                handler,
                events: JobEvents::new(),
            }),
        }
    }

    pub fn events(&self) -> &JobEvents {
        &self.inner.events
    }

    /// Appends a job and returns immediately; processing happens on the drain task.
    pub async fn add(&self, name: &str, payload: FileJobPayload) -> Job {
        let job = Job::new(next_job_id(), name, payload);

        let start_consumer = {
            let mut state = self.inner.state.lock().await;
            state.jobs.push_back(job.clone());
            !std::mem::replace(&mut state.draining, true)
        };

        info!(
            queue = %self.inner.name,
            job_id = %job.id,
            file_id = job.payload.file_id,
            "added job to in-memory queue"
        );

        if start_consumer {
            tokio::spawn(Arc::clone(&self.inner).drain());
        }

        job
    }

    /// Jobs still waiting for the consumer, head first.
    pub async fn pending_jobs(&self) -> Vec<Job> {
        self.inner.state.lock().await.jobs.iter().cloned().collect()
    }

    pub async fn is_draining(&self) -> bool {
        self.inner.state.lock().await.draining
    }
}

impl Inner {
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                let next = state.jobs.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };

            let Some(job) = next else {
                return;
            };

            self.run(job).await;
            tokio::task::yield_now().await;
        }
    }

    async fn run(&self, mut job: Job) {
        if let Err(err) = job.start_processing() {
            warn!(queue = %self.name, job_id = %job.id, error = %err, "skipping job");
            return;
        }
        info!(queue = %self.name, job_id = %job.id, "processing job from in-memory queue");

        match settle(self.handler.as_ref(), &mut job).await {
            Ok(event) => {
                match &event {
                    JobEvent::Completed { job, .. } => {
                        info!(queue = %self.name, job_id = %job.id, "job completed");
                    }
                    JobEvent::Failed { job, error } => {
                        error!(queue = %self.name, job_id = %job.id, %error, "job failed");
                    }
                }
                self.events.emit(&event);
            }
            Err(err) => {
                error!(queue = %self.name, job_id = %job.id, error = %err, "could not settle job");
            }
        }
    }
}

/// `job_<unix millis>_<random>`; the random part keeps same-millisecond ids apart.
fn next_job_id() -> String {
    format!(
        "job_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

#[async_trait]
impl QueueBackend for FallbackQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Fallback
    }

    fn events(&self) -> &JobEvents {
        &self.inner.events
    }

    async fn enqueue(&self, name: &str, payload: FileJobPayload) -> Result<Job, JobError> {
        Ok(self.add(name, payload).await)
    }

    /// The queue drains itself, so there is nothing to register.
    async fn init_worker(&self) -> Result<WorkerStatus, JobError> {
        Ok(WorkerStatus::HandledInternally)
    }
}
