pub mod log_feed;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::config::{BotMode, ModeHandle};
use crate::handlers::BotRunner;
use crate::services::LogSink;
pub use log_feed::LogFeed;

#[derive(Clone)]
pub struct DashboardState {
    pub runner: Arc<BotRunner>,
    pub mode: ModeHandle,
    pub logger: LogSink,
    pub feed: Arc<LogFeed>,
    pub admin_token: String,
}

#[derive(Deserialize)]
pub struct AuthQuery {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
pub struct ModeRequest {
    mode: BotMode,
}

/// Control panel: bot lifecycle, mode switch and the live log terminal.
pub fn create_dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(dashboard_page))
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/bot/start", post(start_bot))
        .route("/api/bot/stop", post(stop_bot))
        .route("/api/mode", post(set_mode))
        .route("/api/logs", get(get_logs))
        .route("/api/logs/stream", get(stream_logs))
        .with_state(state)
}

/// Verify admin token
fn verify_token(query: &AuthQuery, admin_token: &str) -> Result<(), StatusCode> {
    if query.token == admin_token {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// The page itself carries no data; it reads `?token=` and passes it on.
async fn dashboard_page() -> Html<&'static str> {
    Html(include_str!("../static/dashboard.html"))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_status(
    Query(query): Query<AuthQuery>,
    State(state): State<DashboardState>,
) -> Result<impl IntoResponse, StatusCode> {
    verify_token(&query, &state.admin_token)?;
    Ok(Json(state.runner.state()))
}

async fn start_bot(
    Query(query): Query<AuthQuery>,
    State(state): State<DashboardState>,
) -> Result<Response, StatusCode> {
    verify_token(&query, &state.admin_token)?;

    match state.runner.start().await {
        Ok(()) => Ok(Json(state.runner.state()).into_response()),
        Err(e) => {
            log::error!("Failed to start bot from dashboard: {:#}", e);
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("{:#}", e) })),
            )
                .into_response())
        }
    }
}

async fn stop_bot(
    Query(query): Query<AuthQuery>,
    State(state): State<DashboardState>,
) -> Result<impl IntoResponse, StatusCode> {
    verify_token(&query, &state.admin_token)?;

    state.runner.stop().await.map_err(|e| {
        log::error!("Failed to stop bot: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(state.runner.state()))
}

async fn set_mode(
    Query(query): Query<AuthQuery>,
    State(state): State<DashboardState>,
    Json(request): Json<ModeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    verify_token(&query, &state.admin_token)?;

    state.mode.set_mode(request.mode);
    state
        .logger
        .info(format!("Switched to {} mode", request.mode));

    Ok(Json(state.runner.state()))
}

async fn get_logs(
    Query(query): Query<AuthQuery>,
    State(state): State<DashboardState>,
) -> Result<impl IntoResponse, StatusCode> {
    verify_token(&query, &state.admin_token)?;
    Ok(Json(state.feed.recent()))
}

async fn stream_logs(
    Query(query): Query<AuthQuery>,
    State(state): State<DashboardState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    verify_token(&query, &state.admin_token)?;

    // Lagged receivers skip what they missed instead of closing the stream.
    let stream = BroadcastStream::new(state.feed.subscribe()).filter_map(|entry| {
        let entry = entry.ok()?;
        Event::default().event("log").json_data(entry).ok().map(Ok)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
