//! JSON API for a single-page frontend: uploads live on disk and are looked up by
//! the name they were uploaded with.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, rejection::JsonRejection},
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::auth::{self, AuthState};
use crate::config::Settings;
use crate::error::SheetError;
use crate::http::{log_requests, read_upload};
use crate::query::{self, PageQuery, SortDirection};
use crate::uploads::UploadDir;

pub struct ApiState {
    uploads: UploadDir,
    page_size: usize,
}

impl ApiState {
    pub fn new(settings: &Settings) -> std::io::Result<Self> {
        Ok(ApiState {
            uploads: UploadDir::open(&settings.data_dir, settings.allowed_extensions.clone())?,
            page_size: settings.page_size,
        })
    }

    pub fn uploads(&self) -> &UploadDir {
        &self.uploads
    }
}

/// Start the API server.
///
/// # Arguments
/// * `settings` - Resolved server settings
/// * `static_dir` - Directory of the built frontend, served for unknown paths
/// * `auth` - Session gate for every API route, or `None` to leave them open
pub async fn run(
    settings: Settings,
    static_dir: PathBuf,
    auth: Option<AuthState>,
) -> Result<(), Box<dyn Error>> {
    let state = Arc::new(ApiState::new(&settings)?);
    let upload_limit = settings.upload_limit_bytes;

    let app = router(state, static_dir, upload_limit, auth);

    let listener = TcpListener::bind(settings.bind_addr.as_str()).await?;
    log::info!("API listening on {}", settings.public_url);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(
    state: Arc<ApiState>,
    static_dir: PathBuf,
    upload_limit: usize,
    auth: Option<AuthState>,
) -> Router {
    let mut api = Router::new()
        .route("/upload", post(upload))
        .route("/data", get(data))
        .route("/filter", get(filter))
        .route("/clear", post(clear));

    if let Some(auth) = &auth {
        api = api.route_layer(middleware::from_fn_with_state(
            auth.clone(),
            auth::require_session,
        ));
    }

    let mut app = api
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
        .fallback_service(ServeDir::new(static_dir));

    if let Some(auth) = auth {
        app = app.merge(auth::routes(auth));
    }

    app.layer(CorsLayer::permissive())
        .layer(middleware::from_fn(log_requests))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One page of rows in the shape the frontend table expects.
#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub data: Vec<Map<String, Value>>,
    pub headers: Vec<String>,
    pub total_rows: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataParams {
    #[serde(default)]
    filename: String,
    page: Option<String>,
    #[serde(default)]
    sort_column: String,
    sort_direction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    column: String,
    #[serde(default)]
    query: String,
    page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    filename: String,
}

// 0-based; anything unparseable reads as the first page.
fn page_index(page: Option<&str>) -> usize {
    page.and_then(|p| p.trim().parse().ok()).unwrap_or(0)
}

async fn upload(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> Result<Json<MessageResponse>, SheetError> {
    let (filename, bytes) = read_upload(multipart).await?;

    let worker = Arc::clone(&state);
    let stored_as = filename.clone();
    tokio::task::spawn_blocking(move || worker.uploads.store(&stored_as, &bytes)).await??;

    Ok(Json(MessageResponse {
        message: "File uploaded successfully".to_string(),
        filename: Some(filename),
    }))
}

async fn data(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<DataParams>,
) -> Result<Json<PageResponse>, SheetError> {
    let request = PageQuery::new(page_index(params.page.as_deref()), state.page_size).sorted_by(
        &params.sort_column,
        params
            .sort_direction
            .as_deref()
            .map(SortDirection::parse)
            .unwrap_or_default(),
    );
    page_of(state, params.filename, request).await
}

async fn filter(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<FilterParams>,
) -> Result<Json<PageResponse>, SheetError> {
    if params.filename.is_empty() {
        return Err(SheetError::bad_request("Missing filename"));
    }
    if params.column.is_empty() {
        return Err(SheetError::InvalidColumn(params.column));
    }
    let request = PageQuery::new(page_index(params.page.as_deref()), state.page_size)
        .filtered_by(&params.column, &params.query);
    page_of(state, params.filename, request).await
}

async fn clear(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, SheetError> {
    let Json(request) = payload.map_err(|e| SheetError::bad_request(e.body_text()))?;
    let worker = Arc::clone(&state);
    tokio::task::spawn_blocking(move || worker.uploads.remove(&request.filename)).await??;

    Ok(Json(MessageResponse {
        message: "File cleared successfully".to_string(),
        filename: None,
    }))
}

/// Parse the stored file and run `request` over it off the async runtime.
async fn page_of(
    state: Arc<ApiState>,
    filename: String,
    request: PageQuery,
) -> Result<Json<PageResponse>, SheetError> {
    tokio::task::spawn_blocking(move || {
        let dataset = state.uploads.open_dataset(&filename)?;
        let result = query::query(&dataset, &request)?;
        Ok::<_, SheetError>(Json(PageResponse {
            data: result.records(&dataset),
            headers: result.headers,
            total_rows: result.total_rows,
        }))
    })
    .await?
}
