//! The HTTP interface of the assistant.
//!
//! A client creates a session, posts user messages to it and listens to its
//! event stream. When the stream announces a `tool_call`, the client renders
//! the tool and posts the result back, which resumes the turn.

mod error;
mod sse;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use novus_core::tool::{FrontendResult, ToolSpec};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::session::{Session, SessionEvent, Sessions};

type ApiResult<T> = Result<T, ApiError>;

/// Creates the router serving every endpoint.
pub fn router(sessions: Arc<Sessions>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", delete(delete_session))
        .route("/api/sessions/:id/messages", post(post_message))
        .route("/api/sessions/:id/events", get(stream_events))
        .route("/api/sessions/:id/tool-results", post(post_tool_result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(sessions)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSession {
    session_id: String,
}

#[derive(Deserialize)]
struct UserMessage {
    content: String,
}

fn find_session(sessions: &Sessions, id: &str) -> ApiResult<Arc<Session>> {
    sessions
        .get(id)
        .ok_or_else(|| ApiError::SessionNotFound(id.to_owned()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_tools(State(sessions): State<Arc<Sessions>>) -> Json<Vec<ToolSpec>> {
    Json(sessions.tools())
}

async fn create_session(
    State(sessions): State<Arc<Sessions>>,
) -> (StatusCode, Json<CreatedSession>) {
    let session = sessions.create();
    let created = CreatedSession {
        session_id: session.id().to_owned(),
    };
    (StatusCode::CREATED, Json(created))
}

async fn delete_session(
    State(sessions): State<Arc<Sessions>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    sessions
        .remove(&id)
        .ok_or(ApiError::SessionNotFound(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_message(
    State(sessions): State<Arc<Sessions>>,
    Path(id): Path<String>,
    body: Result<Json<UserMessage>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let session = find_session(&sessions, &id)?;
    session.touch();
    let Json(message) = body?;
    let content = message.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("`content` must not be empty".to_owned()));
    }

    session
        .agent()
        .enqueue_user_input(content)
        .map_err(|_| ApiError::SessionEnded(id))?;
    Ok(StatusCode::ACCEPTED)
}

/// Streams the session's events.
///
/// The stream opens with the current stage and every call still waiting for
/// the client, so a reconnecting client can pick up where it left off. A call
/// announced while the stream opens may be seen twice, clients key calls by
/// `callId`.
async fn stream_events(
    State(sessions): State<Arc<Sessions>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = find_session(&sessions, &id)?;
    let events_rx = session.subscribe();

    let agent = session.agent();
    let stage = agent
        .stage()
        .await
        .map_err(|_| ApiError::SessionEnded(id))?;
    let mut snapshot = vec![SessionEvent::Stage { stage }];
    snapshot.extend(
        agent
            .pending_tool_calls()
            .into_iter()
            .map(SessionEvent::ToolCall),
    );

    Ok(sse::event_stream(snapshot, events_rx))
}

async fn post_tool_result(
    State(sessions): State<Arc<Sessions>>,
    Path(id): Path<String>,
    body: Result<Json<FrontendResult>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let session = find_session(&sessions, &id)?;
    session.touch();
    let Json(result) = body?;

    let call_id = result.call_id.clone();
    session.agent().resolve_tool_call(result)?;
    debug!("session {id}: resolved deferred call {call_id}");
    Ok(StatusCode::NO_CONTENT)
}
