use std::path::Path as FsPath;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use chrono::Utc;
use common::{
    error::AppError,
    storage::types::{
        file_record::{FileRecord, FileStatus},
        user::User,
    },
    utils::upload_limits::validate_upload,
};
use job_queue::FileJobPayload;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

/// Directory under `data_dir` that uploads land in; also the prefix of stored paths.
const UPLOADS_DIR: &str = "uploads";
const DEFAULT_PAGE_SIZE: u64 = 10;

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    // Size is enforced against the configured limit after the body is received.
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// File as returned to API clients. Stored JSON columns are parsed back into JSON.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: i64,
    pub original_filename: String,
    pub storage_path: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FileRecord> for FileSummary {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.file_id,
            original_filename: record.original_filename,
            storage_path: record.storage_path,
            title: record.title,
            description: record.description,
            status: record.status,
            extracted_data: record.extracted_data.map(parse_stored_json),
            error: record.error_detail.map(parse_stored_json),
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

fn parse_stored_json(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

pub async fn upload_file(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_size = input
        .file
        .contents
        .as_file()
        .metadata()
        .map_err(AppError::from)?
        .len();
    let file_size = usize::try_from(file_size).unwrap_or(usize::MAX);

    info!(
        user_id = %user.id,
        file_size,
        has_title = input.title.is_some(),
        has_description = input.description.is_some(),
        "Received file upload"
    );

    validate_upload(
        &state.config,
        file_size,
        input.title.as_deref(),
        input.description.as_deref(),
    )?;

    let original_filename = input
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "upload".to_string());
    let stored_name = format!(
        "{}-{}-{}",
        user.id,
        Utc::now().timestamp_millis(),
        sanitize_file_name(&original_filename)
    );

    let uploads_dir = FsPath::new(&state.config.data_dir).join(UPLOADS_DIR);
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .map_err(AppError::from)?;
    tokio::fs::copy(input.file.contents.path(), uploads_dir.join(&stored_name))
        .await
        .map_err(AppError::from)?;

    let record = FileRecord::create_and_add_to_db(
        user.id.clone(),
        original_filename,
        format!("{UPLOADS_DIR}/{stored_name}"),
        input.title,
        input.description,
        &state.db,
    )
    .await?;

    let job_id = if state.config.enqueue_on_upload {
        let payload = FileJobPayload {
            file_id: record.file_id,
            file_path: record.storage_path.clone(),
        };
        match state.queue.enqueue(payload).await {
            Ok(job) => Some(job.id),
            Err(err) => {
                // The upload is kept; the file stays `uploaded` until it is resubmitted.
                warn!(file_id = record.file_id, error = %err, "file stored but not queued");
                None
            }
        }
    } else {
        None
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "File uploaded successfully",
            "file": FileSummary::from(record),
            "jobId": job_id,
        })),
    ))
}

pub async fn get_file(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(file_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let record = FileRecord::get_by_file_id(file_id, &state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("File {file_id} not found")))?;

    if record.user_id != user.id {
        return Err(ApiError::Forbidden(
            "You do not have access to this file".to_string(),
        ));
    }

    Ok(Json(FileSummary::from(record)))
}

pub async fn list_files(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = FileRecord::find_by_user(
        &user.id,
        params.page.unwrap_or(1),
        params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        &state.db,
    )
    .await?;

    let files: Vec<FileSummary> = page.files.into_iter().map(FileSummary::from).collect();

    Ok(Json(json!({
        "files": files,
        "pagination": page.pagination,
    })))
}

/// Replaces everything but ASCII alphanumerics and `_` in the stem; the extension
/// is kept as given.
fn sanitize_file_name(file_name: &str) -> String {
    let base = FsPath::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");

    let (stem, ext) = match base.rfind('.') {
        Some(idx) if idx > 0 => base.split_at(idx),
        _ => (base, ""),
    };

    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();

    format!("{stem}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report 2024.pdf"), "report_2024.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("no-extension"), "no_extension");
        assert_eq!(sanitize_file_name(".env"), "_env");
        assert_eq!(sanitize_file_name("weird.t/x t"), "x_t");
    }

    #[test]
    fn test_summary_parses_stored_json() {
        let mut record = FileRecord::new(
            3,
            "user".into(),
            "a.txt".into(),
            "uploads/a.txt".into(),
            Some("title".into()),
            None,
        );
        record.status = FileStatus::Processed;
        record.extracted_data = Some(r#"{"hash":"abc","sizeInBytes":3}"#.into());
        record.error_detail = Some("plain text".into());

        let summary = FileSummary::from(record);
        let json = serde_json::to_value(&summary).expect("serialize");

        assert_eq!(json["id"], 3);
        assert_eq!(json["status"], "processed");
        assert_eq!(json["extractedData"]["sizeInBytes"], 3);
        assert_eq!(json["error"], "plain text");
        assert_eq!(json["storagePath"], "uploads/a.txt");
    }
}
