//! HTTP server: dashboard page, message submission, JSON API and health.

use crate::app::App;
use crate::auth;
use crate::config::{self, Config};
use crate::events::{EventPublisher, RunLog};
use crate::store::{MessageStore, StoreError};
use crate::submit::{self, SubmitError};
use crate::web::page;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for request handlers.
#[derive(Clone)]
pub struct WebState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub events: Arc<dyn EventPublisher>,
    pub runs: Arc<RunLog>,
    /// Whether `auth.devUserId` may stand in for a missing identity header (loopback only).
    pub allow_dev_user: bool,
}

impl WebState {
    pub fn from_app(app: &App) -> Self {
        Self {
            config: app.config.clone(),
            store: app.store.clone(),
            events: app.events.clone(),
            runs: app.runs.clone(),
            allow_dev_user: config::is_loopback_bind(&app.config.server.bind),
        }
    }

    fn caller(&self, headers: &HeaderMap) -> Option<String> {
        auth::caller_identity(headers, &self.config.auth, self.allow_dev_user)
    }
}

/// Handler error mapped to a status code and `{ "error": ... }` body.
#[derive(Debug)]
enum ApiError {
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Unauthorized => ApiError::Unauthorized(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => {
                log::warn!("request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct MessageForm {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CreateMessageRequest {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsParams {
    limit: Option<usize>,
    event_id: Option<String>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/messages", post(submit_form))
        .route("/api/messages", get(list_messages).post(submit_json))
        .route("/api/messages/latest", get(latest_message))
        .route("/api/messages/:id", get(get_message))
        .route("/api/runs", get(list_runs))
        .route("/health", get(health_http))
        .with_state(state)
}

/// Run the server; binds to config.server.bind:config.server.port.
/// Refuses a non-loopback bind while `auth.devUserId` is set.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_server(config: Config, config_path: PathBuf) -> Result<()> {
    let bind = config.server.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config.auth.dev_user_id.is_some() {
        anyhow::bail!(
            "refusing to bind to {} with auth.devUserId set (dev identity is for loopback only)",
            bind
        );
    }
    let port = config.server.port;
    let app = App::open(config, &config_path).await?;
    let state = WebState::from_app(&app);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("server listening on {}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited")?;

    let App {
        events, dispatcher, ..
    } = app;
    drop(events);
    if tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, dispatcher)
        .await
        .is_err()
    {
        log::warn!("event dispatcher did not stop within {:?}", DISPATCHER_DRAIN_TIMEOUT);
    }
    log::info!("server stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET / renders the latest message and the form.
async fn dashboard(
    State(state): State<WebState>,
    headers: HeaderMap,
) -> Result<Html<String>, ApiError> {
    let latest = state.store.find_latest().await?;
    let user = state.caller(&headers);
    Ok(Html(page::render_dashboard(latest.as_ref(), user.as_deref())))
}

/// POST /messages (form) stores the message and redirects back to the dashboard.
async fn submit_form(
    State(state): State<WebState>,
    headers: HeaderMap,
    Form(form): Form<MessageForm>,
) -> Response {
    let user = state.caller(&headers).unwrap_or_default();
    match submit::create_message(
        state.store.as_ref(),
        state.events.as_ref(),
        &form.message,
        &user,
    )
    .await
    {
        Ok(_) => Redirect::to("/").into_response(),
        Err(SubmitError::Unauthorized) => (
            StatusCode::UNAUTHORIZED,
            Html(format!(
                "<p>{}</p><p><a href=\"/\">Back</a></p>",
                page::escape_html(&SubmitError::Unauthorized.to_string())
            )),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/messages `{ "text": ... }` → 201 with the stored message.
async fn submit_json(
    State(state): State<WebState>,
    headers: HeaderMap,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<crate::message::Message>), ApiError> {
    let user = state.caller(&headers).unwrap_or_default();
    let message = submit::create_message(
        state.store.as_ref(),
        state.events.as_ref(),
        &req.text,
        &user,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<WebState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let messages = state.store.list_recent(clamp_limit(params.limit)).await?;
    Ok(Json(json!({ "messages": messages })))
}

/// GET /api/messages/latest → `{ "message": <message or null> }`.
async fn latest_message(State(state): State<WebState>) -> Result<Json<serde_json::Value>, ApiError> {
    let latest = state.store.find_latest().await?;
    Ok(Json(json!({ "message": latest })))
}

async fn get_message(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> Result<Json<crate::message::Message>, ApiError> {
    state
        .store
        .find_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("message {} not found", id)))
}

/// GET /api/runs recent workflow runs, newest first; `eventId` filters to one event.
async fn list_runs(
    State(state): State<WebState>,
    Query(params): Query<RunsParams>,
) -> Json<serde_json::Value> {
    let runs = match params.event_id {
        Some(id) => state.runs.for_event(&id).await,
        None => state.runs.recent(clamp_limit(params.limit)).await,
    };
    Json(json!({ "runs": runs }))
}

/// GET /health returns a simple health JSON (for probes).
async fn health_http(State(state): State<WebState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.config.server.port,
    }))
}
