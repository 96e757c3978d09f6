use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use tracing::error;

use crate::{executor::ProcessOutcome, job::Job};

/// Terminal notification for a job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Completed { job: Job, result: ProcessOutcome },
    Failed { job: Job, error: String },
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Completed { job, .. } | JobEvent::Failed { job, .. } => job,
        }
    }
}

type Listener = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// Observer list owned by a queue. Listeners run in registration order, in process,
/// best effort.
#[derive(Clone, Default)]
pub struct JobEvents {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl JobEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn on_completed<F>(&self, listener: F)
    where
        F: Fn(&Job, &ProcessOutcome) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let JobEvent::Completed { job, result } = event {
                listener(job, result);
            }
        });
    }

    pub fn on_failed<F>(&self, listener: F)
    where
        F: Fn(&Job, &str) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let JobEvent::Failed { job, error } = event {
                listener(job, error);
            }
        });
    }

    /// Delivers `event` to every listener. A panicking listener is logged and skipped
    /// so it cannot take the consumer that emitted the event down with it.
    pub fn emit(&self, event: &JobEvent) {
        // Snapshot so a listener may subscribe further listeners without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (idx, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    job_id = %event.job().id,
                    listener = idx,
                    "job event listener panicked"
                );
            }
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for JobEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEvents")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
