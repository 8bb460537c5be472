//! HTTP routes over [`GeorefService`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::Mode;
use crate::control_points::ControlPointInput;
use crate::error::GeorefError;
use crate::project::ProjectInput;
use crate::service::GeorefService;

/// Uploads larger than this are rejected before decoding
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GeorefService>,
    pub mode: Mode,
    /// Cancelled on shutdown; running georeference jobs stop at the next
    /// pyramid level
    pub shutdown: CancellationToken,
}

/// Error body returned to clients
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<GeorefError> for ApiError {
    fn from(e: GeorefError) -> Self {
        let status = if e.is_not_found() {
            StatusCode::NOT_FOUND
        } else if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            error!(error = %e, "Request failed");
        }
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the router with CORS and request tracing
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/", get(welcome))
        .route("/serverInfo", get(server_info))
        .route("/project", axum::routing::post(create_project))
        .route(
            "/project/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route(
            "/project/:id/point",
            get(list_points).post(add_point).delete(delete_points),
        )
        .route(
            "/project/:id/point/:pid",
            get(get_point).put(update_point).delete(delete_point),
        )
        .route(
            "/project/:id/image",
            get(get_image)
                .post(upload_image)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/project/:id/image/geo", get(get_georeferenced))
        .route("/project/:id/georef", get(georeference))
        .route("/project/:id/georef/coordinates", get(coordinates))
        .route("/project/:id/tiles/:z/:x/:tile", get(tile))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn welcome(State(state): State<AppState>) -> Json<serde_json::Value> {
    let message = match state.mode {
        Mode::Production => {
            "Welcome to the georeferencing API, currently this is only intended for use by the img2map application."
        }
        Mode::Development => "Welcome to the georeferencing API.",
    };
    Json(json!({ "message": message }))
}

async fn server_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status())
}

// ----------------------------------------------------------------------
// Projects
// ----------------------------------------------------------------------

async fn create_project(
    State(state): State<AppState>,
    Json(input): Json<ProjectInput>,
) -> ApiResult<impl IntoResponse> {
    let project = state.service.create_project(input)?;
    Ok(Json(json!({ "id": project.id })))
}

async fn get_project(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.project(id)?))
}

async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(input): Json<ProjectInput>,
) -> ApiResult<impl IntoResponse> {
    state.service.update_project(id, input)?;
    Ok(Json(json!({ "ProjectID": id })))
}

fn accepted(message: &'static str) -> Response {
    (
        StatusCode::ACCEPTED,
        [(header::CONTENT_TYPE, "text/plain")],
        message,
    )
        .into_response()
}

async fn delete_project(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    state.service.delete_project(id)?;
    Ok(accepted("Deletion request of project accepted"))
}

// ----------------------------------------------------------------------
// Points
// ----------------------------------------------------------------------

/// Body of a point request; type errors are malformed points, not 422s
fn point_input(body: Result<Json<ControlPointInput>, JsonRejection>) -> Result<ControlPointInput, GeorefError> {
    body.map(|Json(input)| input)
        .map_err(|rejection| GeorefError::MalformedPoint(rejection.body_text()))
}

async fn add_point(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Result<Json<ControlPointInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let point = state.service.add_point(id, point_input(body)?)?;
    Ok(Json(json!({
        "Project": { "id": id },
        "Point": { "id": point.seq, "inProjectId": point.seq },
    })))
}

async fn list_points(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.points(id)?))
}

async fn delete_points(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    state.service.remove_points(id)?;
    Ok(accepted("Deletion request of points accepted"))
}

async fn get_point(
    State(state): State<AppState>,
    Path((id, pid)): Path<(u64, u32)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.point(id, pid)?))
}

async fn update_point(
    State(state): State<AppState>,
    Path((id, pid)): Path<(u64, u32)>,
    body: Result<Json<ControlPointInput>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let point = state.service.update_point(id, pid, point_input(body)?)?;
    Ok(Json(json!({ "Project": { "id": id }, "Point": { "id": point.seq } })))
}

async fn delete_point(
    State(state): State<AppState>,
    Path((id, pid)): Path<(u64, u32)>,
) -> ApiResult<Response> {
    state.service.remove_point(id, pid)?;
    Ok(accepted("Deletion request of point accepted"))
}

// ----------------------------------------------------------------------
// Images and georeferencing
// ----------------------------------------------------------------------

async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    state.service.upload_image(id, body).await?;
    Ok(Json(json!({ "status": "Image uploaded" })))
}

async fn get_image(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    let bytes = state.service.image(id).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

fn tiff_attachment(bytes: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/tiff"),
            (header::CONTENT_DISPOSITION, "attachment; filename=georeferenced.tiff"),
        ],
        bytes,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct GeorefQuery {
    crs: Option<String>,
}

async fn georeference(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<GeorefQuery>,
) -> ApiResult<Response> {
    let bytes = state
        .service
        .georeference(id, query.crs.as_deref(), state.shutdown.child_token())
        .await?;
    Ok(tiff_attachment(bytes))
}

async fn get_georeferenced(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Response> {
    let bytes = state.service.georeferenced_container(id).await?;
    Ok(tiff_attachment(bytes))
}

async fn coordinates(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<impl IntoResponse> {
    let bounds = state.service.bounds(id).await?;
    Ok(Json(bounds.to_wnes()))
}

/// Parse the `{y}.png` path segment
fn parse_tile_name(name: &str) -> Option<u32> {
    name.strip_suffix(".png")?.parse().ok()
}

async fn tile(
    State(state): State<AppState>,
    Path((id, z, x, tile)): Path<(u64, u32, u32, String)>,
) -> ApiResult<Response> {
    let y = parse_tile_name(&tile).ok_or_else(|| ApiError::bad_request(format!("invalid tile name '{tile}'")))?;
    let png = state.service.tile(id, z, x, y).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
