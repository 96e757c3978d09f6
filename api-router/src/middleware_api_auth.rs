use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use common::storage::types::user::User;
use tracing::debug;

use crate::{api_state::ApiState, error::ApiError};

const API_KEY_HEADER: &str = "X-API-Key";

/// Resolves the caller from an API key and makes the `User` available to handlers.
pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(api_key) = api_key_from_headers(request.headers()) else {
        debug!(path = %request.uri().path(), "request without api key");
        return Err(unauthenticated());
    };

    let user = User::find_by_api_key(&api_key, &state.db)
        .await?
        .ok_or_else(unauthenticated)?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn unauthenticated() -> ApiError {
    ApiError::Unauthorized("You have to be authenticated".to_string())
}

/// `X-API-Key` wins over `Authorization: Bearer <key>`.
fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header(API_KEY_HEADER)
        .or_else(|| {
            header("Authorization")
                .and_then(|auth| auth.strip_prefix("Bearer "))
                .map(str::trim)
        })
        .filter(|key| !key.is_empty())
        .map(String::from)
}
