//! Route table and request handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use crate::models::task::TaskStatus;
use crate::orchestrator::engine::AutomationEngine;
use crate::AppError;

use super::webhook::InboundEvent;

const WEBHOOK_REPLY: &str = "<Response></Response>";
const DEFAULT_LIST_LIMIT: u32 = 100;

/// Build the application router.
pub fn router(engine: Arc<AutomationEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/assign", post(assign))
        .route("/tasks/:id/handoff", post(start_handoff))
        .route("/tasks/:id/greeting", post(register_greeting))
        .route("/tasks/:id/activity", post(mark_activity))
        .route("/tasks/:id/close", post(close_task))
        .route("/tasks/twilio/inbound", post(inbound_webhook))
        .with_state(engine)
}

async fn health() -> &'static str {
    "ok"
}

/// Map a domain error onto an HTTP response.
fn error_response(err: &AppError) -> Response {
    let status = match err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string()).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    customer_name: String,
    customer_contact: String,
}

async fn create_task(
    State(engine): State<Arc<AutomationEngine>>,
    Json(request): Json<CreateTaskRequest>,
) -> Response {
    match engine
        .create_task(&request.customer_name, &request.customer_contact)
        .await
    {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<u32>,
}

async fn list_tasks(
    State(engine): State<Arc<AutomationEngine>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match TaskStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("unknown status '{raw}'"),
                )
                    .into_response();
            }
        },
    };
    match engine
        .list_tasks(status, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await
    {
        Ok(tasks) => Json(tasks).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_task(
    State(engine): State<Arc<AutomationEngine>>,
    Path(task_id): Path<String>,
) -> Response {
    match engine.get_task(&task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    operator_id: String,
    operator_name: String,
}

async fn assign(
    State(engine): State<Arc<AutomationEngine>>,
    Path(task_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Response {
    match engine
        .assign(&task_id, &request.operator_id, &request.operator_name)
        .await
    {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct HandoffRequest {
    operator_id: String,
    operator_name: String,
    #[serde(default = "default_send_greeting")]
    send_greeting: bool,
}

fn default_send_greeting() -> bool {
    true
}

async fn start_handoff(
    State(engine): State<Arc<AutomationEngine>>,
    Path(task_id): Path<String>,
    Json(request): Json<HandoffRequest>,
) -> Response {
    match engine
        .start_handoff(
            &task_id,
            &request.operator_id,
            &request.operator_name,
            request.send_greeting,
        )
        .await
    {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn register_greeting(
    State(engine): State<Arc<AutomationEngine>>,
    Path(task_id): Path<String>,
) -> Response {
    match engine.register_greeting(&task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn mark_activity(
    State(engine): State<Arc<AutomationEngine>>,
    Path(task_id): Path<String>,
) -> Response {
    match engine.mark_activity(&task_id).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct CloseRequest {
    #[serde(default)]
    reason: String,
}

async fn close_task(
    State(engine): State<Arc<AutomationEngine>>,
    Path(task_id): Path<String>,
    Json(request): Json<CloseRequest>,
) -> Response {
    match engine.close_task(&task_id, &request.reason).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Inbound provider webhook.
///
/// Always answers `200 OK` with an empty TwiML document, whatever
/// happens internally — a non-2xx answer would put the provider into a
/// delivery retry loop.
async fn inbound_webhook(
    State(engine): State<Arc<AutomationEngine>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let event = InboundEvent::parse(content_type, &body);
    debug!(?event, "inbound webhook");

    if let Some(conversation_sid) = event.conversation_sid.as_deref() {
        engine
            .mark_activity_by_conversation(conversation_sid, event.author.as_deref())
            .await;
    } else if let Some(from) = event.from.as_deref() {
        engine.mark_activity_by_contact(from).await;
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        WEBHOOK_REPLY,
    )
        .into_response()
}
