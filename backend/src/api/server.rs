//! HTTP server exposing the run engine.
//!
//! # API Endpoints
//!
//! | Method | Path          | Description                                  |
//! |--------|---------------|----------------------------------------------|
//! | GET    | `/health`     | Health check                                 |
//! | GET    | `/api/status` | Current status                               |
//! | POST   | `/api/run`    | Start a run (409 while one is active)        |
//! | POST   | `/api/answer` | Answer or decline a question                 |
//! | POST   | `/api/ignore` | Decline every question of the current run    |
//! | POST   | `/api/cancel` | Cancel the current run                       |
//! | GET    | `/api/events` | SSE stream of status changes and questions   |
//! | GET    | `/api/logs`   | SSE stream of log entries                    |

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::logs::LOG_BROADCASTER;
use super::types::{error_response, status_code, AcceptedResponse, AnswerRequest, StatusResponse};
use crate::error::RunError;
use crate::runner::{EngineHandle, Event as EngineEvent, RunSettings};

type ApiResult = Result<Json<AcceptedResponse>, (StatusCode, Json<Value>)>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

/// Routes of the control surface, without binding a socket.
pub fn router(engine: EngineHandle) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/run", post(start_run))
        .route("/api/answer", post(answer))
        .route("/api/ignore", post(ignore_all))
        .route("/api/cancel", post(cancel))
        .route("/api/events", get(sse_events))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Start the HTTP server
pub async fn start_server(port: u16, engine: EngineHandle) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(engine);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Rebate engine listening on http://localhost:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn reject(error: RunError) -> (StatusCode, Json<Value>) {
    warn!("Request rejected: {}", error);
    let code = StatusCode::from_u16(status_code(&error)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(error_response(&error.to_string())))
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rebate-engine",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.engine.is_running(),
        status: state.engine.status(),
        questions: state.engine.pending(),
    })
}

async fn start_run(State(state): State<AppState>, Json(settings): Json<RunSettings>) -> ApiResult {
    info!(directory = %settings.directory.display(), year = settings.year, quarter = %settings.quarter, "Run requested");
    state.engine.start(settings).map_err(reject)?;
    Ok(Json(AcceptedResponse::new("run")))
}

async fn answer(State(state): State<AppState>, Json(request): Json<AnswerRequest>) -> ApiResult {
    state.engine.answer(request.hash, request.answer).map_err(reject)?;
    Ok(Json(AcceptedResponse::new("answer")))
}

async fn ignore_all(State(state): State<AppState>) -> ApiResult {
    state.engine.ignore_all().map_err(reject)?;
    Ok(Json(AcceptedResponse::new("ignore")))
}

async fn cancel(State(state): State<AppState>) -> ApiResult {
    state.engine.cancel().map_err(reject)?;
    Ok(Json(AcceptedResponse::new("cancel")))
}

fn sse_event(event: &EngineEvent) -> Option<Event> {
    let name = match event {
        EngineEvent::Status { .. } => "status",
        EngineEvent::Question { .. } => "question",
    };
    let json = serde_json::to_string(event).ok()?;
    Some(Event::default().event(name).data(json))
}

/// Current status followed by every unanswered question.
fn snapshot_events(engine: &EngineHandle) -> Vec<EngineEvent> {
    let mut events = vec![EngineEvent::Status {
        status: engine.status(),
    }];
    events.extend(engine.pending().into_iter().map(|question| EngineEvent::Question { question }));
    events
}

/// SSE endpoint for status changes and questions.
///
/// Starts with the current status and the unanswered questions; a question
/// published while subscribing may be sent twice.
async fn sse_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.subscribe();
    let snapshot = snapshot_events(&state.engine);

    let updates = BroadcastStream::new(rx).filter_map(|result| result.ok());
    let stream = tokio_stream::iter(snapshot)
        .chain(updates)
        .filter_map(|event| sse_event(&event).map(Ok));

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
