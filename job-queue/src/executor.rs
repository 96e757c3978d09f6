//! File-processing task run for every `processFile` job.
//!
//! The whole file is read into memory before hashing. Inputs are bounded by the
//! upload size limit (5 MiB by default); this is not meant for streaming or very
//! large files.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use common::storage::types::file_record::{FileStatus, FileStatusStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::{
    error::JobError,
    job::{FileJobPayload, JobHandler},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    pub hash: String,
    pub size_in_bytes: u64,
    pub processed_at: String,
}

impl ExtractedData {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);

        Self {
            hash: format!("{digest:x}"),
            size_in_bytes: bytes.len() as u64,
            processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub success: bool,
    pub file_id: i64,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<ExtractedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    pub fn processed(file_id: i64, extracted_data: ExtractedData) -> Self {
        Self {
            success: true,
            file_id,
            status: FileStatus::Processed,
            extracted_data: Some(extracted_data),
            error: None,
        }
    }

    pub fn failed(file_id: i64, error: String) -> Self {
        Self {
            success: false,
            file_id,
            status: FileStatus::Failed,
            extracted_data: None,
            error: Some(error),
        }
    }
}

/// Hashes and sizes an uploaded file, reporting each status change to the store.
///
/// No retries happen here; a failed outcome is final for this invocation.
pub struct FileProcessor {
    store: Arc<dyn FileStatusStore>,
    base_dir: PathBuf,
}

impl FileProcessor {
    /// `base_dir` anchors relative `filePath`s; absolute paths are used as-is.
    /// A relative `base_dir` is pinned to the working directory at construction.
    pub fn new(store: Arc<dyn FileStatusStore>, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            store,
            base_dir: std::path::absolute(&base_dir).unwrap_or(base_dir),
        }
    }

    pub fn resolve_path(&self, file_path: &str) -> PathBuf {
        self.base_dir.join(file_path)
    }

    pub async fn process(&self, payload: &FileJobPayload) -> ProcessOutcome {
        let file_id = payload.file_id;

        match self.try_process(payload).await {
            Ok(extracted_data) => {
                info!(file_id, hash = %extracted_data.hash, "file processed");
                ProcessOutcome::processed(file_id, extracted_data)
            }
            Err(err) => {
                error!(file_id, error = %err, "error processing file");
                let message = err.to_string();
                self.record_failure(file_id, &message).await;
                ProcessOutcome::failed(file_id, message)
            }
        }
    }

    async fn try_process(&self, payload: &FileJobPayload) -> Result<ExtractedData, JobError> {
        let file_id = payload.file_id;
        self.store
            .update_status(file_id, FileStatus::Processing, None)
            .await?;

        let path = self.resolve_path(&payload.file_path);
        debug!(file_id, path = %path.display(), "reading file");
        let bytes = read_file(&path).await?;

        let extracted_data = tokio::task::spawn_blocking(move || ExtractedData::from_bytes(&bytes))
            .await
            .map_err(|e| JobError::Processing(e.to_string()))?;

        let serialized = serde_json::to_string(&extracted_data)?;
        self.store
            .update_status(file_id, FileStatus::Processed, Some(serialized))
            .await?;

        Ok(extracted_data)
    }

    /// The failure write must never escape; the job is failed either way.
    async fn record_failure(&self, file_id: i64, message: &str) {
        let detail = json!({ "error": message }).to_string();

        if let Err(err) = self
            .store
            .update_status(file_id, FileStatus::Failed, Some(detail))
            .await
        {
            error!(file_id, error = %err, "failed to persist failed status");
        }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, JobError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => JobError::FileNotFound(path.display().to_string()),
        _ => JobError::Processing(format!("failed to read {}: {e}", path.display())),
    })
}

#[async_trait]
impl JobHandler for FileProcessor {
    async fn handle(&self, payload: &FileJobPayload) -> ProcessOutcome {
        self.process(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingStore;
    use common::storage::{db::SurrealDbClient, types::file_record::FileRecord};
    use tempfile::TempDir;
    use uuid::Uuid;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    async fn write_upload(dir: &TempDir, name: &str, contents: &[u8]) -> String {
        let uploads = dir.path().join("uploads");
        tokio::fs::create_dir_all(&uploads).await.expect("mkdir");
        tokio::fs::write(uploads.join(name), contents)
            .await
            .expect("write");
        format!("uploads/{name}")
    }

    #[tokio::test]
    async fn test_hashes_known_content() {
        let dir = TempDir::new().expect("tempdir");
        let file_path = write_upload(&dir, "42-test.txt", b"hello").await;
        let store = Arc::new(RecordingStore::default());
        let processor = FileProcessor::new(store.clone(), dir.path());

        let outcome = processor
            .process(&FileJobPayload {
                file_id: 42,
                file_path,
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.status, FileStatus::Processed);
        let data = outcome.extracted_data.expect("extracted data");
        assert_eq!(data.hash, HELLO_SHA256);
        assert_eq!(data.size_in_bytes, 5);
        assert!(chrono::DateTime::parse_from_rfc3339(&data.processed_at).is_ok());

        let writes = store.writes();
        assert_eq!(
            writes.iter().map(|w| w.1).collect::<Vec<_>>(),
            vec![FileStatus::Processing, FileStatus::Processed]
        );
        let stored: ExtractedData =
            serde_json::from_str(writes[1].2.as_deref().expect("payload")).expect("json");
        assert_eq!(stored.hash, HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_missing_file_fails_and_persists_failed() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(RecordingStore::default());
        let processor = FileProcessor::new(store.clone(), dir.path());

        let outcome = processor
            .process(&FileJobPayload {
                file_id: 7,
                file_path: "uploads/does-not-exist.txt".into(),
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.status, FileStatus::Failed);
        assert!(outcome.extracted_data.is_none());
        assert!(outcome.error.expect("error").contains("not found"));

        let statuses: Vec<_> = store.writes().iter().map(|w| w.1).collect();
        assert_eq!(statuses, vec![FileStatus::Processing, FileStatus::Failed]);
        assert!(!statuses.contains(&FileStatus::Processed));
    }

    #[tokio::test]
    async fn test_processing_write_failure_fails_the_job() {
        let dir = TempDir::new().expect("tempdir");
        let file_path = write_upload(&dir, "1-a.txt", b"abc").await;
        let store = Arc::new(RecordingStore::failing_on(&[FileStatus::Processing]));
        let processor = FileProcessor::new(store.clone(), dir.path());

        let outcome = processor
            .process(&FileJobPayload {
                file_id: 1,
                file_path,
            })
            .await;

        assert!(!outcome.success);
        let last = store.writes().last().cloned().expect("writes");
        assert_eq!(last.1, FileStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_status_write_failure_still_reports_failure() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(RecordingStore::failing_on(&[FileStatus::Failed]));
        let processor = FileProcessor::new(store.clone(), dir.path());

        let outcome = processor
            .process(&FileJobPayload {
                file_id: 3,
                file_path: "missing.bin".into(),
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.status, FileStatus::Failed);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_persisted_status_converges_in_database() {
        let dir = TempDir::new().expect("tempdir");
        let file_path = write_upload(&dir, "42-test.txt", b"hello").await;
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let record = FileRecord::new(
            42,
            "user".into(),
            "test.txt".into(),
            file_path.clone(),
            Some("t".into()),
            None,
        );
        db.store_item(record).await.expect("store");

        let processor = FileProcessor::new(db.clone(), dir.path());
        let ok = processor
            .process(&FileJobPayload {
                file_id: 42,
                file_path,
            })
            .await;
        assert!(ok.success);

        let stored = FileRecord::get_by_file_id(42, &db)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, FileStatus::Processed);
        let data: ExtractedData =
            serde_json::from_str(stored.extracted_data.as_deref().expect("data")).expect("json");
        assert_eq!(data.hash, HELLO_SHA256);
        assert_eq!(data.size_in_bytes, 5);
    }

    #[test]
    fn test_absolute_paths_are_not_rebased() {
        let processor = FileProcessor::new(Arc::new(RecordingStore::default()), "/srv/app");

        assert_eq!(
            processor.resolve_path("uploads/a.txt"),
            PathBuf::from("/srv/app/uploads/a.txt")
        );
        assert_eq!(processor.resolve_path("/tmp/a.txt"), PathBuf::from("/tmp/a.txt"));
    }

    #[test]
    fn test_relative_base_dir_resolves_to_absolute_paths() {
        let processor = FileProcessor::new(Arc::new(RecordingStore::default()), "./data");
        let cwd = std::env::current_dir().expect("cwd");

        let resolved = processor.resolve_path("uploads/a.txt");

        assert!(resolved.is_absolute());
        assert!(resolved.starts_with(&cwd));
        assert!(resolved.ends_with("data/uploads/a.txt"));
    }
}
