//! Gateway module - HTTP front end for the execution engine
//!
//! ```text
//! POST /api/v1/execute       run code, returns ExecutionResult
//! GET  /api/v1/audit         audit entries for ?user_id= (admin bearer token)
//! GET  /api/v1/audit/all     every audit entry (admin bearer token)
//! GET  /api/v1/sandboxes     live sandboxes, optionally ?user_id=
//! GET  /api/v1/health        liveness and live sandbox count
//! ```

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::audit::AuditLogEntry;
use crate::core::{ExecutionRequest, ExecutionResult};
use crate::error::Error;
use crate::orchestrator::ExecutionOrchestrator;
use crate::sandbox::SandboxInfo;

// ---- App State ----

/// Shared state of the gateway
#[derive(Clone)]
pub struct GatewayState {
    orchestrator: Arc<ExecutionOrchestrator>,
    admin_token: Option<Arc<SecretString>>,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>, admin_token: Option<SecretString>) -> Self {
        GatewayState {
            orchestrator,
            admin_token: admin_token.map(Arc::new),
        }
    }

    pub fn orchestrator(&self) -> &Arc<ExecutionOrchestrator> {
        &self.orchestrator
    }

    /// Whether the request carries `Authorization: Bearer <admin token>`.
    /// Always false when no admin token is configured.
    fn is_admin(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.admin_token else {
            return false;
        };

        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected.expose_secret())
    }

    /// Audit entries hold submitted source, so reading them is privileged
    fn require_admin(&self, headers: &HeaderMap) -> Result<(), AppError> {
        if self.is_admin(headers) {
            return Ok(());
        }
        warn!("Rejected unauthenticated audit log request");
        Err(Error::Unauthorized("Admin token required".to_string()).into())
    }
}

// ---- Error Handling ----

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

// ---- Response Types ----

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub live_sandboxes: usize,
}

// ---- Query Params ----

#[derive(Deserialize)]
struct AuditQuery {
    user_id: String,
}

#[derive(Deserialize)]
struct SandboxQuery {
    user_id: Option<String>,
}

// ---- Handlers ----

async fn execute(
    State(state): State<GatewayState>,
    Json(request): Json<ExecutionRequest>,
) -> Json<ExecutionResult> {
    Json(state.orchestrator.execute(request).await)
}

async fn user_audit(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    state.require_admin(&headers)?;
    Ok(Json(state.orchestrator.user_audit_logs(&params.user_id).await))
}

async fn all_audit(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    state.require_admin(&headers)?;
    Ok(Json(state.orchestrator.all_audit_logs().await))
}

async fn list_sandboxes(
    State(state): State<GatewayState>,
    Query(params): Query<SandboxQuery>,
) -> Json<Vec<SandboxInfo>> {
    Json(
        state
            .orchestrator
            .manager()
            .list(params.user_id.as_deref())
            .await,
    )
}

async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        live_sandboxes: state.orchestrator.manager().live_count().await,
    })
}

// ---- Router ----

/// Build the gateway router
pub fn build_router(state: GatewayState) -> Router {
    let api = Router::new()
        .route("/execute", post(execute))
        .route("/audit", get(user_audit))
        .route("/audit/all", get(all_audit))
        .route("/sandboxes", get(list_sandboxes))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
