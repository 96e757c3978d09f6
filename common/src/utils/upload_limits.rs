use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadValidationError {
    PayloadTooLarge(String),
    BadRequest(String),
}

/// Checks an upload against configured limits before anything is persisted
/// or enqueued.
pub fn validate_upload(
    config: &AppConfig,
    file_size: usize,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<(), UploadValidationError> {
    let has_title = title.is_some_and(|t| !t.trim().is_empty());
    let has_description = description.is_some_and(|d| !d.trim().is_empty());

    if !has_title && !has_description {
        return Err(UploadValidationError::BadRequest(
            "Title and description are required".to_string(),
        ));
    }

    if file_size > config.max_upload_bytes {
        return Err(UploadValidationError::PayloadTooLarge(format!(
            "File is too large. Maximum allowed is {} bytes",
            config.max_upload_bytes
        )));
    }

    Ok(())
}
