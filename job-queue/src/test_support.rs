use std::sync::Mutex;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::file_record::{FileRecord, FileStatus, FileStatusStore},
};
use tokio::sync::mpsc;

use crate::{
    events::{JobEvent, JobEvents},
    executor::{ExtractedData, ProcessOutcome},
    job::{FileJobPayload, JobHandler},
};

pub(crate) type StatusWrite = (i64, FileStatus, Option<String>);

/// Status store that remembers every write and can be told to reject some statuses.
#[derive(Default)]
pub(crate) struct RecordingStore {
    writes: Mutex<Vec<StatusWrite>>,
    fail_on: Vec<FileStatus>,
}

impl RecordingStore {
    pub(crate) fn failing_on(statuses: &[FileStatus]) -> Self {
        Self {
            writes: Mutex::default(),
            fail_on: statuses.to_vec(),
        }
    }

    pub(crate) fn writes(&self) -> Vec<StatusWrite> {
        self.writes.lock().expect("writes lock").clone()
    }
}

#[async_trait]
impl FileStatusStore for RecordingStore {
    async fn update_status(
        &self,
        file_id: i64,
        status: FileStatus,
        extracted_data: Option<String>,
    ) -> Result<FileRecord, AppError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((file_id, status, extracted_data.clone()));

        if self.fail_on.contains(&status) {
            return Err(AppError::InternalError("database unavailable".into()));
        }

        let mut record = FileRecord::new(
            file_id,
            "user".into(),
            "file.txt".into(),
            "uploads/file.txt".into(),
            None,
            None,
        );
        record.status = status;
        record.extracted_data = extracted_data;
        Ok(record)
    }
}

/// Handler that records the order it sees payloads in. Negative file ids fail.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    seen: Mutex<Vec<i64>>,
}

impl RecordingHandler {
    pub(crate) fn seen(&self) -> Vec<i64> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, payload: &FileJobPayload) -> ProcessOutcome {
        self.seen.lock().expect("seen lock").push(payload.file_id);
        tokio::task::yield_now().await;

        if payload.file_id < 0 {
            ProcessOutcome::failed(payload.file_id, "File not found".into())
        } else {
            ProcessOutcome::processed(payload.file_id, ExtractedData::from_bytes(b"hello"))
        }
    }
}

pub(crate) fn payload(file_id: i64) -> FileJobPayload {
    FileJobPayload {
        file_id,
        file_path: format!("uploads/{file_id}.txt"),
    }
}

/// Forwards every emitted event into a channel the test can await.
pub(crate) fn event_channel(events: &JobEvents) -> mpsc::UnboundedReceiver<JobEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    events.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for job event")
        .expect("event channel closed")
}

