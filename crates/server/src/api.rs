//! Chat and approval endpoints.
//!
//! - `POST /chat`: submit a user message; creates the session on first use
//! - `POST /approve`: approve a session suspended before the gate
//!
//! Both require the configured key in the `X-API-Key` header.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{FromRequestParts, MatchedPath, State},
    http::{request::Parts, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use freightdesk_agent::{TurnResponse, WorkflowRuntime};
use freightdesk_core::domain::session::SessionId;
use freightdesk_core::errors::{ApplicationError, InterfaceError};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<WorkflowRuntime>,
    api_key: SecretString,
}

impl ApiState {
    pub fn new(runtime: Arc<WorkflowRuntime>, api_key: SecretString) -> Self {
        Self { runtime, api_key }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: Option<String>,
    /// Seeds the quote key on a new session.
    pub quote_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
    pub is_paused: bool,
    pub current_node: Option<String>,
    pub extracted_data: Map<String, Value>,
    pub missing_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl From<TurnResponse> for ChatResponse {
    fn from(turn: TurnResponse) -> Self {
        Self {
            thread_id: turn.session_id.0,
            response: turn.response,
            is_paused: turn.is_paused,
            current_node: turn.current_node.map(|node| node.as_str().to_owned()),
            extracted_data: turn.extracted_data,
            missing_fields: turn.missing_fields,
            payload: turn.payload,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status,
            body: ErrorBody { detail: detail.into(), correlation_id: correlation_id.to_owned() },
        }
    }

    fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Could not validate credentials", "unassigned")
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let (status, detail) = match &error {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, message.clone())
            }
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, error.user_message().to_owned())
            }
            InterfaceError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, error.user_message().to_owned())
            }
        };
        Self::new(status, detail, error.correlation_id())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Rejects the request with 403 unless `X-API-Key` matches the configured key.
pub struct RequireApiKey;

impl FromRequestParts<ApiState> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let provided = parts.headers.get(API_KEY_HEADER).and_then(|value| value.to_str().ok());
        match provided {
            Some(key) if keys_match(key, state.api_key.expose_secret()) => Ok(Self),
            Some(_) => {
                warn!(event_name = "api.auth.rejected", reason = "invalid_key", "invalid API key");
                Err(ApiError::forbidden())
            }
            None => {
                warn!(event_name = "api.auth.rejected", reason = "missing_key", "missing API key");
                Err(ApiError::forbidden())
            }
        }
    }
}

/// Constant-time over the key bytes; only the length can short-circuit.
fn keys_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/approve", post(approve))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn chat(
    State(state): State<ApiState>,
    _auth: RequireApiKey,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = request_id(&headers);
    if request.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "message must not be empty",
            &correlation_id,
        ));
    }

    let session_id = request
        .thread_id
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .map(SessionId)
        .unwrap_or_else(generated_session_id);

    let turn = state
        .runtime
        .submit_message(&session_id, &request.message, request.quote_id.as_deref(), &correlation_id)
        .await
        .map_err(|error| interface_error(error.into(), &correlation_id))?;

    info!(
        event_name = "api.chat.completed",
        correlation_id = %correlation_id,
        session_id = %turn.session_id,
        is_paused = turn.is_paused,
        "chat turn completed"
    );
    Ok(Json(turn.into()))
}

pub async fn approve(
    State(state): State<ApiState>,
    _auth: RequireApiKey,
    headers: HeaderMap,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = request_id(&headers);
    let session_id = SessionId(request.thread_id.trim().to_owned());

    let turn = state
        .runtime
        .approve(&session_id, &correlation_id)
        .await
        .map_err(|error| interface_error(error.into(), &correlation_id))?;

    info!(
        event_name = "api.approve.completed",
        correlation_id = %correlation_id,
        session_id = %turn.session_id,
        "approval processed"
    );
    Ok(Json(turn.into()))
}

fn interface_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    if error.is_gate_state_error() {
        info!(event_name = "api.approve.not_at_gate", correlation_id, error = %error, "approval rejected");
    } else {
        warn!(event_name = "api.request.failed", correlation_id, error = %error, "request failed");
    }
    error.into_interface(correlation_id).into()
}

fn generated_session_id() -> SessionId {
    SessionId(format!("session_{}", Utc::now().timestamp()))
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Logs each request and echoes its request id. A generated id is written
/// back into the request so handlers see the same value.
async fn log_requests(mut request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let request_id = request_id(request.headers());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
        event_name = "api.request.received",
        correlation_id = %request_id,
        method = %method,
        path = %path,
        "incoming request"
    );

    let mut response = next.run(request).await;

    info!(
        event_name = "api.request.completed",
        correlation_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
