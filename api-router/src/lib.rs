use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    files::{get_file, list_files, upload_file},
    liveness::live,
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Room for multipart framing and text fields on top of the file itself, so a file
/// just over the limit still reaches the size check and gets a proper 413.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let body_limit = app_state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route(
            "/files",
            get(list_files)
                .post(upload_file)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/files/{id}", get(get_file))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
