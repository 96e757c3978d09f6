use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use state_machines::state_machine;

use crate::{error::JobError, events::JobEvent, executor::ProcessOutcome};

/// The only task type the queue knows how to run.
pub const PROCESS_FILE_JOB: &str = "processFile";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileJobPayload {
    pub file_id: i64,
    pub file_path: String,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum JobTransition {
    StartProcessing,
    Succeed,
    Fail,
}

impl JobTransition {
    fn as_str(&self) -> &'static str {
        match self {
            JobTransition::StartProcessing => "start_processing",
            JobTransition::Succeed => "succeed",
            JobTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Queued,
        states: [Queued, Processing, Completed, Failed],
        events {
            start_processing {
                transition: { from: Queued, to: Processing }
            }
            succeed {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn queued() -> JobLifecycleMachine<(), Queued> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn processing() -> JobLifecycleMachine<(), Processing> {
        queued()
            .start_processing()
            .expect("start_processing transition from Queued should exist")
    }
}

fn invalid_transition(state: JobStatus, event: JobTransition) -> JobError {
    JobError::InvalidTransition(format!("{} -> {}", state.as_str(), event.as_str()))
}

fn compute_next_state(state: JobStatus, event: JobTransition) -> Result<JobStatus, JobError> {
    use lifecycle::*;
    match (state, event) {
        (JobStatus::Queued, JobTransition::StartProcessing) => queued()
            .start_processing()
            .map(|_| JobStatus::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Processing, JobTransition::Succeed) => processing()
            .succeed()
            .map(|_| JobStatus::Completed)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Processing, JobTransition::Fail) => processing()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

/// One unit of asynchronous work describing a file to process.
///
/// A job is mutated only by the consumer that dequeued it; its terminal state is
/// observed through [`JobEvent`]s rather than by reading the queue back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub payload: FileJobPayload,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: String, name: &str, payload: FileJobPayload) -> Self {
        Self {
            id,
            name: name.to_string(),
            payload,
            status: JobStatus::Queued,
            enqueued_at: Utc::now(),
            result: None,
            error: None,
        }
    }

    pub fn start_processing(&mut self) -> Result<(), JobError> {
        self.status = compute_next_state(self.status, JobTransition::StartProcessing)?;
        Ok(())
    }

    pub fn complete(&mut self, result: ProcessOutcome) -> Result<(), JobError> {
        self.status = compute_next_state(self.status, JobTransition::Succeed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: String, result: Option<ProcessOutcome>) -> Result<(), JobError> {
        self.status = compute_next_state(self.status, JobTransition::Fail)?;
        self.error = Some(error);
        self.result = result;
        Ok(())
    }
}

/// Seam between queue machinery and the work a job performs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &FileJobPayload) -> ProcessOutcome;
}

/// Runs `handler` for a job that is already `processing` and settles it into a
/// terminal state. A panicking handler only fails its own job.
pub(crate) async fn settle(handler: &dyn JobHandler, job: &mut Job) -> Result<JobEvent, JobError> {
    let outcome = AssertUnwindSafe(handler.handle(&job.payload))
        .catch_unwind()
        .await;

    match outcome {
        Ok(result) if result.success => {
            job.complete(result.clone())?;
            Ok(JobEvent::Completed {
                job: job.clone(),
                result,
            })
        }
        Ok(result) => {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "processing failed".to_string());
            job.fail(error.clone(), Some(result))?;
            Ok(JobEvent::Failed {
                job: job.clone(),
                error,
            })
        }
        Err(panic) => {
            let error = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .map_or_else(
                    || "job handler panicked".to_string(),
                    |msg| format!("job handler panicked: {msg}"),
                );
            job.fail(error.clone(), None)?;
            Ok(JobEvent::Failed {
                job: job.clone(),
                error,
            })
        }
    }
}
