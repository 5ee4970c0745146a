use crate::error::FilterError;
use crate::filters::{FilterController, FilterEntry, ListFlags, ModifyOutcome};
use anyhow::{Context, Result};
use axum::{
    extract::{Json as AxumJson, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tracing::warn;

struct ApiState {
    controller: Arc<FilterController>,
    refresh_sender: Sender<()>,
}

pub fn router(controller: Arc<FilterController>, refresh_sender: Sender<()>) -> Router {
    let state = Arc::new(ApiState {
        controller,
        refresh_sender,
    });

    Router::new()
        .route("/api/filters", get(list_filters))
        .route("/api/filters/add", post(add_filter))
        .route("/api/filters/remove", post(remove_filter))
        .route("/api/filters/set", post(set_filter))
        .route("/api/filters/refresh", post(trigger_refresh))
        .with_state(state)
}

pub async fn start_api_server(
    controller: Arc<FilterController>,
    refresh_sender: Sender<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = router(controller, refresh_sender);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API server to {}", addr))?;
    tracing::info!("API Server listening on http://{}", addr);
    axum::serve(listener, app).await.context("API server failed")
}

pub struct ApiError(FilterError);

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FilterError::DuplicateUrl(_) => StatusCode::CONFLICT,
            FilterError::NotFound(_) => StatusCode::NOT_FOUND,
            FilterError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            FilterError::FetchTimeout { .. } | FilterError::FetchTransport { .. } => {
                StatusCode::BAD_GATEWAY
            }
            FilterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FilterError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Deserialize, Default)]
struct ListQuery {
    #[serde(default)]
    enabled_only: bool,
}

async fn list_filters(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let flags = if query.enabled_only {
        ListFlags::ENABLED_ONLY
    } else {
        ListFlags::empty()
    };
    Json(state.controller.list(flags))
}

#[derive(Deserialize)]
struct AddRequest {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

async fn add_filter(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<AddRequest>,
) -> Result<Json<FilterEntry>, ApiError> {
    let name = payload.name.as_deref().unwrap_or(&payload.url);
    let entry = state
        .controller
        .add_with(&payload.url, name, payload.enabled)
        .await?;
    Ok(Json(entry))
}

#[derive(Deserialize)]
struct RemoveRequest {
    url: String,
}

async fn remove_filter(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<RemoveRequest>,
) -> Result<Json<FilterEntry>, ApiError> {
    let removed = state
        .controller
        .delete(&payload.url)?
        .ok_or(FilterError::NotFound(payload.url))?;
    reclaim(&state.controller, &removed).await;
    Ok(Json(removed))
}

#[derive(Deserialize)]
struct SetRequest {
    url: String,
    data: FilterData,
}

#[derive(Deserialize)]
struct FilterData {
    url: String,
    name: String,
    enabled: bool,
}

#[derive(Serialize)]
struct SetResponse {
    status: &'static str,
    filter: Option<FilterEntry>,
}

async fn set_filter(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<SetRequest>,
) -> Result<Json<SetResponse>, ApiError> {
    let data = payload.data;
    let outcome = state
        .controller
        .modify(&payload.url, data.enabled, &data.name, &data.url)
        .await?;

    if let ModifyOutcome::ChangedUrl { superseded } = &outcome {
        reclaim(&state.controller, superseded).await;
    }

    Ok(Json(SetResponse {
        status: outcome.as_str(),
        filter: state.controller.find(&data.url),
    }))
}

async fn trigger_refresh(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let _ = state.refresh_sender.try_send(());
    Json(serde_json::json!({ "status": "refresh_triggered" }))
}

async fn reclaim(controller: &FilterController, entry: &FilterEntry) {
    if let Err(e) = controller.reclaim(entry).await {
        warn!("Failed to reclaim {}: {}", entry.path.display(), e);
    }
}
