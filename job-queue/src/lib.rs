#![allow(clippy::missing_docs_in_private_items)]

pub mod durable;
pub mod error;
pub mod events;
pub mod executor;
pub mod facade;
pub mod fallback;
pub mod job;

#[cfg(test)]
mod test_support;

pub use error::JobError;
pub use events::{JobEvent, JobEvents};
pub use executor::{ExtractedData, FileProcessor, ProcessOutcome};
pub use facade::{JobQueue, QueueBackend, QueueMode, WorkerStatus};
pub use job::{FileJobPayload, Job, JobHandler, JobStatus, PROCESS_FILE_JOB};
