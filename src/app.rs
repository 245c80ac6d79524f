//! Server-rendered portal: Google sign-in, one in-memory dataset, HTML table view.

use axum::{
    Extension, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::auth::{
    self, AuthGate, AuthState, CurrentSession, GoogleProvider, OAuthConfig, OnUnauthenticated,
    Session, ViewPrefs,
};
use crate::config::Settings;
use crate::dataset::Dataset;
use crate::error::SheetError;
use crate::http::{log_requests, read_upload};
use crate::ingest;
use crate::loader::{self, SUPPORTED_EXTENSIONS};
use crate::query::{self, PageQuery, PageResult, SortDirection};
use crate::store::DatasetStore;

/// File stem of the persisted dataset; every upload is stored as `data.<ext>`.
pub const DATASET_STEM: &str = "data";

pub struct AppState {
    store: DatasetStore,
    data_dir: PathBuf,
    allowed: Vec<String>,
    page_size: usize,
    upload_limit: usize,
    templates: Handlebars<'static>,
    gate: Arc<AuthGate>,
    // Held across persist + swap so `data.<ext>` always matches the in-memory dataset.
    write_lock: Mutex<()>,
}

impl AppState {
    /// Prepare the data directory, templates and the dataset left by a previous run.
    pub fn new(settings: &Settings, gate: Arc<AuthGate>) -> Result<Self, Box<dyn Error>> {
        fs::create_dir_all(&settings.data_dir)?;

        let mut templates = Handlebars::new();
        templates.register_template_string("index", include_str!("../templates/index.hbs"))?;

        let store = DatasetStore::new();
        if let Some(path) = stored_dataset_path(&settings.data_dir) {
            match loader::load_path(&path) {
                Ok(dataset) => {
                    log::info!(
                        "loaded {} ({} rows)",
                        path.display(),
                        dataset.row_count()
                    );
                    store.replace(dataset);
                }
                Err(e) => log::warn!("ignoring unreadable {}: {}", path.display(), e),
            }
        }

        Ok(AppState {
            store,
            data_dir: settings.data_dir.clone(),
            allowed: settings.allowed_extensions.clone(),
            page_size: settings.page_size,
            upload_limit: settings.upload_limit_bytes,
            templates,
            gate,
            write_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }
}

/// Start the portal and serve until the process is stopped.
pub async fn run(settings: Settings, oauth: OAuthConfig) -> Result<(), Box<dyn Error>> {
    let gate = Arc::new(AuthGate::new(Arc::new(GoogleProvider::new(oauth))));
    let auth = AuthState {
        gate: Arc::clone(&gate),
        key: auth::signing_key(settings.secret_key.as_deref()),
        on_unauthenticated: OnUnauthenticated::Redirect,
    };
    let state = Arc::new(AppState::new(&settings, gate)?);

    let app = router(state, auth);

    let listener = TcpListener::bind(settings.bind_addr.as_str()).await?;
    log::info!("Listening on {}", settings.public_url);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Every dataset route sits behind the session gate; the sign-in routes do not.
pub fn router(state: Arc<AppState>, auth: AuthState) -> Router {
    let limit = state.upload_limit;
    let protected = Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/clear", post(clear))
        .route_layer(middleware::from_fn_with_state(
            auth.clone(),
            auth::require_session,
        ))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state);

    Router::new()
        .merge(protected)
        .merge(auth::routes(auth))
        .layer(middleware::from_fn(log_requests))
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexParams {
    page: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    filter_column: Option<String>,
    filter_query: Option<String>,
}

impl IndexParams {
    // 1-based; junk or zero falls back to the first page.
    fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1)
    }

    fn has_view(&self) -> bool {
        self.sort_by.is_some()
            || self.sort_order.is_some()
            || self.filter_column.is_some()
            || self.filter_query.is_some()
    }

    fn view(&self) -> ViewPrefs {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        ViewPrefs {
            sort_by: non_empty(&self.sort_by),
            sort_order: self
                .sort_order
                .as_deref()
                .map(SortDirection::parse)
                .unwrap_or_default(),
            filter_column: non_empty(&self.filter_column),
            filter_query: non_empty(&self.filter_query),
        }
    }
}

fn page_query(view: &ViewPrefs, page: usize, page_size: usize) -> PageQuery {
    let request = PageQuery::new(page.saturating_sub(1), page_size)
        .sorted_by(view.sort_by.as_deref().unwrap_or(""), view.sort_order);
    // The filter form always submits its column; without a term there is no filter.
    match (&view.filter_column, &view.filter_query) {
        (Some(column), Some(term)) => request.filtered_by(column, term),
        _ => request,
    }
}

async fn index(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
    Query(params): Query<IndexParams>,
) -> Response {
    let view = if params.has_view() {
        let view = params.view();
        state.gate.remember_view(&current.id, view.clone());
        view
    } else {
        current.session.view.clone().unwrap_or_default()
    };
    let page = params.page();

    let snapshot = state.store.current();
    let request = page_query(&view, page, state.page_size);
    let worker = Arc::clone(&snapshot);
    let outcome = tokio::task::spawn_blocking(move || query::query(&worker, &request))
        .await
        .map_err(SheetError::from)
        .and_then(|r| r);

    match outcome {
        Ok(result) => render(&state, &current.session, &snapshot, &view, &result, None),
        Err(e) => {
            // A remembered view can outlive the columns it names; forget it.
            state.gate.remember_view(&current.id, ViewPrefs::default());
            render_failure(&state, &current.session, e)
        }
    }
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
    multipart: Multipart,
) -> Response {
    match replace_from_upload(&state, multipart).await {
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => {
            log::warn!("upload rejected: {}", e);
            render_failure(&state, &current.session, e)
        }
    }
}

async fn clear(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentSession>,
) -> Response {
    let worker = Arc::clone(&state);
    let outcome = tokio::task::spawn_blocking(move || {
        let _guard = worker.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        remove_stored_dataset(&worker.data_dir)?;
        worker.store.clear();
        Ok::<_, SheetError>(())
    })
    .await
    .map_err(SheetError::from)
    .and_then(|r| r);

    match outcome {
        Ok(()) => {
            log::info!("dataset cleared");
            Redirect::to("/").into_response()
        }
        Err(e) => render_failure(&state, &current.session, e),
    }
}

/// Parse the upload, persist it under the fixed name, then swap it in.
///
/// Parsing happens first so a bad file leaves the current dataset untouched.
async fn replace_from_upload(
    state: &Arc<AppState>,
    multipart: Multipart,
) -> Result<String, SheetError> {
    let (name, bytes) = read_upload(multipart).await?;
    let worker = Arc::clone(state);

    let filename = tokio::task::spawn_blocking(move || {
        let ingested = ingest::ingest(&name, &bytes, &worker.allowed)?;
        let _guard = worker.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = persist_upload(&worker.data_dir, &ingested.extension, &bytes)?;
        log::info!(
            "dataset replaced from {} ({} rows, stored at {})",
            ingested.filename,
            ingested.dataset.row_count(),
            path.display()
        );
        worker.store.replace(ingested.dataset);
        Ok::<_, SheetError>(ingested.filename)
    })
    .await??;

    Ok(filename)
}

/// Write `bytes` as `data.<ext>`, removing any earlier `data.*` file.
pub fn persist_upload(dir: &Path, ext: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    remove_stored_dataset(dir)?;
    let path = dir.join(format!("{}.{}", DATASET_STEM, ext));
    fs::write(&path, bytes)?;
    Ok(path)
}

fn remove_stored_dataset(dir: &Path) -> std::io::Result<()> {
    while let Some(path) = stored_dataset_path(dir) {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn stored_dataset_path(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path.file_stem().and_then(|s| s.to_str()) == Some(DATASET_STEM)
                && loader::extension_of(path)
                    .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
                    .unwrap_or(false)
        })
}

#[derive(Serialize)]
struct HeaderView {
    name: String,
    sort_url: String,
    arrow: &'static str,
}

#[derive(Serialize)]
struct ColumnOption {
    name: String,
    selected: bool,
}

/// Everything the `index` template reads.
#[derive(Serialize)]
struct PageView {
    email: Option<String>,
    error: Option<String>,
    accept: String,
    has_data: bool,
    headers: Vec<HeaderView>,
    columns: Vec<ColumnOption>,
    rows: Vec<Vec<String>>,
    page: usize,
    page_count: usize,
    total: usize,
    per_page: usize,
    first_row: usize,
    last_row: usize,
    prev_url: Option<String>,
    next_url: Option<String>,
    sort_by: Option<String>,
    sort_order: &'static str,
    filter_query: Option<String>,
}

fn view_url(view: &ViewPrefs, page: usize) -> String {
    let mut url = format!("/?page={}", page);
    if let Some(column) = &view.sort_by {
        url.push_str(&format!(
            "&sort_by={}&sort_order={}",
            urlencoding::encode(column),
            view.sort_order.as_str()
        ));
    }
    if let (Some(column), Some(term)) = (&view.filter_column, &view.filter_query) {
        url.push_str(&format!(
            "&filter_column={}&filter_query={}",
            urlencoding::encode(column),
            urlencoding::encode(term)
        ));
    }
    url
}

impl PageView {
    fn build(
        state: &AppState,
        session: &Session,
        dataset: &Dataset,
        view: &ViewPrefs,
        result: &PageResult,
        error: Option<String>,
    ) -> Self {
        let page = result.page + 1;
        let page_count = result.page_count().max(1);
        let offset = result.page * result.page_size;

        let headers = dataset
            .headers()
            .iter()
            .map(|name| {
                let active = view.sort_by.as_deref() == Some(name.as_str());
                let next = ViewPrefs {
                    sort_by: Some(name.clone()),
                    sort_order: if active {
                        view.sort_order.flipped()
                    } else {
                        SortDirection::Asc
                    },
                    ..view.clone()
                };
                HeaderView {
                    name: name.clone(),
                    sort_url: view_url(&next, 1),
                    arrow: match (active, view.sort_order) {
                        (false, _) => "",
                        (true, SortDirection::Asc) => "\u{25b2}",
                        (true, SortDirection::Desc) => "\u{25bc}",
                    },
                }
            })
            .collect();

        let columns = dataset
            .headers()
            .iter()
            .map(|name| ColumnOption {
                name: name.clone(),
                selected: view.filter_column.as_deref() == Some(name.as_str()),
            })
            .collect();

        let rows = result
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(col, value)| dataset.cell_text(col, value))
                    .collect()
            })
            .collect();

        PageView {
            email: session.email.clone(),
            error,
            accept: state
                .allowed
                .iter()
                .map(|ext| format!(".{}", ext))
                .collect::<Vec<_>>()
                .join(","),
            has_data: !dataset.headers().is_empty(),
            headers,
            columns,
            rows,
            page,
            page_count,
            total: result.total_rows,
            per_page: result.page_size,
            first_row: if result.rows.is_empty() { 0 } else { offset + 1 },
            last_row: offset + result.rows.len(),
            prev_url: (page > 1).then(|| view_url(view, page - 1)),
            next_url: (page < page_count).then(|| view_url(view, page + 1)),
            sort_by: view.sort_by.clone(),
            sort_order: view.sort_order.as_str(),
            filter_query: view.filter_query.clone(),
        }
    }
}

fn render(
    state: &AppState,
    session: &Session,
    dataset: &Dataset,
    view: &ViewPrefs,
    result: &PageResult,
    error: Option<(StatusCode, String)>,
) -> Response {
    let (status, message) = match error {
        Some((status, message)) => (status, Some(message)),
        None => (StatusCode::OK, None),
    };
    let page = PageView::build(state, session, dataset, view, result, message);

    match state.templates.render("index", &page) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            log::error!("template rendering failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

/// The first page of the current dataset with `err` shown above it.
fn render_failure(state: &AppState, session: &Session, err: SheetError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let snapshot = state.store.current();
    let view = ViewPrefs::default();
    match query::query(&snapshot, &page_query(&view, 1, state.page_size)) {
        Ok(result) => render(
            state,
            session,
            &snapshot,
            &view,
            &result,
            Some((status, err.to_string())),
        ),
        Err(_) => (status, err.to_string()).into_response(),
    }
}
