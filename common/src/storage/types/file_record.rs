use async_trait::async_trait;
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Processed | FileStatus::Failed)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence seam used by the background processor to report progress on a file.
///
/// Writes for the same `(file_id, status)` pair are expected to be idempotent.
#[async_trait]
pub trait FileStatusStore: Send + Sync {
    async fn update_status(
        &self,
        file_id: i64,
        status: FileStatus,
        extracted_data: Option<String>,
    ) -> Result<FileRecord, AppError>;
}

stored_object!(FileRecord, "file", {
    file_id: i64,
    user_id: String,
    original_filename: String,
    storage_path: String,
    title: Option<String>,
    description: Option<String>,
    status: FileStatus,
    extracted_data: Option<String>,
    #[serde(default)]
    error_detail: Option<String>
});

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone)]
pub struct FilePage {
    pub files: Vec<FileRecord>,
    pub pagination: Pagination,
}

#[derive(Deserialize)]
struct SequenceValue {
    value: i64,
}

#[derive(Deserialize)]
struct CountResult {
    total: u64,
}

impl FileRecord {
    pub fn new(
        file_id: i64,
        user_id: String,
        original_filename: String,
        storage_path: String,
        title: Option<String>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: file_id.to_string(),
            created_at: now,
            updated_at: now,
            file_id,
            user_id,
            original_filename,
            storage_path,
            title,
            description,
            status: FileStatus::Uploaded,
            extracted_data: None,
            error_detail: None,
        }
    }

    /// Allocates the next integer file id from a monotonically increasing sequence record.
    pub async fn next_file_id(db: &SurrealDbClient) -> Result<i64, AppError> {
        let mut result = db
            .client
            .query("UPSERT type::thing('sequence', $name) SET value += 1 RETURN value")
            .bind(("name", Self::table_name()))
            .await?;

        let next: Option<SequenceValue> = result.take(0)?;
        next.map(|s| s.value)
            .ok_or_else(|| AppError::InternalError("File id sequence returned nothing".into()))
    }

    pub async fn create_and_add_to_db(
        user_id: String,
        original_filename: String,
        storage_path: String,
        title: Option<String>,
        description: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<FileRecord, AppError> {
        let file_id = Self::next_file_id(db).await?;
        let record = Self::new(
            file_id,
            user_id,
            original_filename,
            storage_path,
            title,
            description,
        );

        db.store_item(record.clone()).await?;
        Ok(record)
    }

    pub async fn get_by_file_id(
        file_id: i64,
        db: &SurrealDbClient,
    ) -> Result<Option<FileRecord>, AppError> {
        Ok(db.get_item::<FileRecord>(&file_id.to_string()).await?)
    }

    pub async fn find_by_user(
        user_id: &str,
        page: u64,
        limit: u64,
        db: &SurrealDbClient,
    ) -> Result<FilePage, AppError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let start = page.saturating_sub(1).saturating_mul(limit);

        let mut result = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                 ORDER BY created_at DESC
                 LIMIT $limit START $start;
                 SELECT count() AS total FROM type::table($table)
                 WHERE user_id = $user_id
                 GROUP ALL;",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", limit))
            .bind(("start", start))
            .await?;

        let files: Vec<FileRecord> = result.take(0)?;
        let count: Option<CountResult> = result.take(1)?;
        let total = count.map_or(0, |c| c.total);

        Ok(FilePage {
            files,
            pagination: Pagination {
                total,
                page,
                limit,
                total_pages: total.div_ceil(limit),
            },
        })
    }

    /// Writes a status transition. A `failed` write keeps its payload in `error_detail`
    /// so `extracted_data` is only ever populated for `processed` files.
    pub async fn update_status(
        file_id: i64,
        status: FileStatus,
        extracted_data: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<FileRecord, AppError> {
        let (extracted_data, error_detail) = match status {
            FileStatus::Processed => (extracted_data, None),
            FileStatus::Failed => (None, extracted_data),
            FileStatus::Uploaded | FileStatus::Processing => (None, None),
        };

        const UPDATE_STATUS_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $status,
                extracted_data = $extracted_data,
                error_detail = $error_detail,
                updated_at = $now
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(UPDATE_STATUS_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", file_id.to_string()))
            .bind(("status", status.as_str()))
            .bind(("extracted_data", extracted_data))
            .bind(("error_detail", error_detail))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<FileRecord> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("File {file_id} not found")))
    }
}

#[async_trait]
impl FileStatusStore for SurrealDbClient {
    async fn update_status(
        &self,
        file_id: i64,
        status: FileStatus,
        extracted_data: Option<String>,
    ) -> Result<FileRecord, AppError> {
        FileRecord::update_status(file_id, status, extracted_data, self).await
    }
}
