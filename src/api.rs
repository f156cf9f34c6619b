//! HTTP serving layer.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
};
use http::StatusCode;
use serde_json::json;

use crate::agent::LinkedInAgent;
use crate::error::{ErrorKind, ErrorRecord};
use crate::pipeline::FetchResult;

/// Builds the router over a shared agent.
pub fn create_router(agent: Arc<LinkedInAgent>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/startup-info", get(startup_info_handler))
        .route("/api/status", get(status_handler))
        .route("/api/queue", get(queue_handler))
        .route("/api/profile/:identifier", get(profile_handler))
        .with_state(agent)
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "message": "LinkedIn agent API",
        "version": crate::VERSION,
        "endpoints": {
            "profile": "/api/profile/{identifier}",
            "health": "/api/health",
            "startup_info": "/api/startup-info",
            "status": "/api/status",
            "queue": "/api/queue"
        }
    }))
}

/// Liveness only; does not look at the session.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn startup_info_handler(State(agent): State<Arc<LinkedInAgent>>) -> impl IntoResponse {
    Json(agent.startup_info())
}

async fn status_handler(State(agent): State<Arc<LinkedInAgent>>) -> impl IntoResponse {
    Json(json!({
        "agent": agent.status(),
        "session": agent.session_state(),
    }))
}

async fn queue_handler(State(agent): State<Arc<LinkedInAgent>>) -> impl IntoResponse {
    Json(agent.queue_status())
}

async fn profile_handler(
    State(agent): State<Arc<LinkedInAgent>>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    match agent.fetch_profile(&identifier).await {
        FetchResult::Success(record) => Ok(Json(record).into_response()),
        FetchResult::Failure(error) => Err(ApiError(error)),
    }
}

/// Error response carrying the classified record.
#[derive(Debug)]
pub struct ApiError(pub ErrorRecord);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Upstream | ErrorKind::DataFormat => StatusCode::BAD_GATEWAY,
            ErrorKind::ServiceUnavailable
            | ErrorKind::AuthChallenge
            | ErrorKind::AuthFailure
            | ErrorKind::SessionExpired => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> String {
        match self.0.kind() {
            ErrorKind::ServiceUnavailable | ErrorKind::AuthChallenge | ErrorKind::AuthFailure => {
                format!("LinkedIn service unavailable: {}", self.0.message())
            }
            _ => self.0.message().to_string(),
        }
    }
}

impl From<ErrorRecord> for ApiError {
    fn from(record: ErrorRecord) -> Self {
        Self(record)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "detail": self.detail(),
            "kind": self.0.kind(),
            "cause": self.0.cause(),
        }));
        (status, body).into_response()
    }
}
