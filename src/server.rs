//! HTTP surface of the census store.
//!
//! Every handler moves its store call onto the blocking pool; the store does
//! synchronous file IO and holds a std mutex while writing.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, Instrument};

use crate::access::{Caller, CALLER_HEADER};
use crate::error::{StoreError, StoreResult};
use crate::export::{EXPORT_FILE_NAME, XLSX_CONTENT_TYPE};
use crate::hierarchy::HierarchyKey;
use crate::query::QueryParams;
use crate::store::CensusStore;
use crate::table::Record;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CensusStore>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<CensusStore>, max_body_bytes: usize) -> Self {
        Self {
            store,
            max_body_bytes,
        }
    }

    fn caller(&self, headers: &HeaderMap) -> Caller {
        let email = headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok());
        self.store.access().resolve(email)
    }
}

/// Error returned by handlers, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Store(e) => match e {
                StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                StoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
                StoreError::BackingStoreUnavailable { .. }
                | StoreError::SchemaMismatch(_)
                | StoreError::PersistFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.code(),
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::NotFound(m) | Self::Internal(m) => f.write_str(m),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{}", self);
        } else {
            debug!(code = self.code(), "{}", self);
        }
        let body = Json(json!({"error": {"code": self.code(), "message": self.to_string()}}));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
        .map_err(ApiError::from)
}

#[derive(Debug, Deserialize)]
pub struct RecordBatch {
    #[serde(default)]
    pub datos: Vec<Record>,
}

#[derive(Debug, Deserialize)]
pub struct KeyCheck {
    #[serde(default)]
    pub cedulas: Vec<String>,
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> ApiResult<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::Store(StoreError::InvalidRequest(format!(
                "missing query parameter: {name}"
            )))
        })
}

fn household_key(params: &HashMap<String, String>) -> ApiResult<HierarchyKey> {
    Ok(HierarchyKey::new(
        required(params, "comunidad")?,
        required(params, "torre")?,
        required(params, "casa")?,
    ))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn columns(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let store = state.store.clone();
    Ok(Json(blocking(move || store.columns()).await?))
}

async fn records(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let params = QueryParams::from_wire(&params);
    let store = state.store.clone();
    Ok(Json(blocking(move || store.query(&params)).await?))
}

async fn update_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<RecordBatch>,
) -> ApiResult<impl IntoResponse> {
    let caller = state.caller(&headers);
    let store = state.store.clone();
    Ok(Json(
        blocking(move || store.upsert(&caller, &batch.datos)).await?,
    ))
}

async fn bulk_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<RecordBatch>,
) -> ApiResult<impl IntoResponse> {
    let caller = state.caller(&headers);
    let store = state.store.clone();
    let rows: Vec<_> = batch.datos.into_iter().map(|r| r.fields).collect();
    Ok(Json(blocking(move || store.import(&caller, &rows)).await?))
}

async fn add_household(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<RecordBatch>,
) -> ApiResult<impl IntoResponse> {
    let caller = state.caller(&headers);
    let store = state.store.clone();
    let rows = blocking(move || store.add_household(&caller, &batch.datos)).await?;
    Ok(Json(json!({ "appended": rows })))
}

async fn delete_row(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(target): Json<Record>,
) -> ApiResult<impl IntoResponse> {
    let row = target.row.ok_or_else(|| {
        ApiError::Store(StoreError::InvalidRequest(
            "__row must be a row number".to_string(),
        ))
    })?;
    let caller = state.caller(&headers);
    let store = state.store.clone();
    Ok(Json(blocking(move || store.delete_row(&caller, row)).await?))
}

async fn check_keys(
    State(state): State<AppState>,
    Json(check): Json<KeyCheck>,
) -> ApiResult<impl IntoResponse> {
    let store = state.store.clone();
    Ok(Json(
        blocking(move || store.existing_keys(&check.cedulas)).await?,
    ))
}

async fn person_by_key(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let key = required(&params, "cedula")?.to_string();
    let store = state.store.clone();
    let lookup = key.clone();
    match blocking(move || store.find_by_key(&lookup)).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("no person with cedula {key}"))),
    }
}

async fn tree(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let store = state.store.clone();
    Ok(Json(blocking(move || store.tree()).await?))
}

async fn occupants(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let key = household_key(&params)?;
    let store = state.store.clone();
    Ok(Json(blocking(move || store.occupants(&key)).await?))
}

async fn household(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let key = household_key(&params)?;
    let store = state.store.clone();
    Ok(Json(blocking(move || store.household(&key)).await?))
}

async fn export_workbook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let params = QueryParams::from_wire(&params);
    let store = state.store.clone();
    let bytes = blocking(move || store.export_workbook(&params)).await?;
    let disposition = format!("attachment; filename={EXPORT_FILE_NAME}");
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

async fn export_report(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let params = QueryParams::from_wire(&params);
    let store = state.store.clone();
    let report = blocking(move || store.printable_report(&params)).await?;
    Ok(Html(report.render_html()))
}

async fn history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.history())
}

async fn request_tracing(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let span = tracing::info_span!("http.request", method = %method, path = %path);

    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "request finished"
        )
    });
    response
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/excel/columns", get(columns))
        .route("/api/excel", get(records))
        .route("/api/update-excel", post(update_records))
        .route("/api/bulk-import", post(bulk_import))
        .route("/api/add-household", post(add_household))
        .route("/api/delete-row", post(delete_row))
        .route("/api/check-cedulas", post(check_keys))
        .route("/api/get-person-by-cedula", get(person_by_key))
        .route("/api/tree-data", get(tree))
        .route("/api/get-people", get(occupants))
        .route("/api/get-household-details", get(household))
        .route("/api/excel/export", get(export_workbook))
        .route("/api/report/export", get(export_report))
        .route("/api/history", get(history))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(from_fn(request_tracing))
        .with_state(state)
}
