//! Axum router and all HTTP handlers for armor-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers only extract, delegate to the orchestrator and
//! shape the response.

use std::sync::Arc;

use armor_reconcile::ArmorError;
use armor_schemas::{PolicyRequest, RuleRequest};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    api_types::{ErrorResponse, PreconfiguredQuery},
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/internal/isalive", get(is_alive))
        .route("/internal/isready", get(is_ready))
        .route(
            "/projects/:project/policies",
            get(list_policies).post(create_policy),
        )
        .route(
            "/projects/:project/policies/:policy",
            get(get_policy).patch(update_policy).delete(delete_policy),
        )
        .route("/projects/:project/policies/:policy/rules", post(create_rule))
        .route(
            "/projects/:project/policies/:policy/rules/:priority",
            get(get_rule).patch(update_rule).delete(delete_rule),
        )
        .route(
            "/projects/:project/policies/:policy/backendServices/:backend",
            post(attach_backend),
        )
        .route(
            "/projects/:project/preConfiguredRules",
            get(list_preconfigured_rules),
        )
        .route(
            "/projects/:project/backendServices",
            get(list_backend_services),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Classified error rendered as `{status, error-message}`; 404 has no body.
#[derive(Debug)]
pub struct ApiError(pub ArmorError);

impl From<ArmorError> for ApiError {
    fn from(e: ArmorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.0.message() {
            None => status.into_response(),
            Some(msg) => (
                status,
                Json(ErrorResponse {
                    status: status.as_u16(),
                    error_message: msg.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

fn respond<T: Serialize>(status: StatusCode, out: Result<T, ArmorError>) -> Response {
    match out {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

fn respond_empty(out: Result<(), ArmorError>) -> Response {
    match out {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Decode a JSON request body. Empty or malformed bodies are 400.
fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(ArmorError::Validation(format!("decode request body: {e}"))))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub(crate) async fn is_alive() -> &'static str {
    "alive"
}

pub(crate) async fn is_ready(State(st): State<Arc<AppState>>) -> Response {
    if st.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

pub(crate) async fn list_policies(
    State(st): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Response {
    respond(StatusCode::OK, st.orchestrator.list_policies(&project).await)
}

pub(crate) async fn get_policy(
    State(st): State<Arc<AppState>>,
    Path((project, policy)): Path<(String, String)>,
) -> Response {
    respond(
        StatusCode::OK,
        st.orchestrator.get_policy(&project, &policy).await,
    )
}

pub(crate) async fn create_policy(
    State(st): State<Arc<AppState>>,
    Path(project): Path<String>,
    body: Bytes,
) -> Response {
    let req: PolicyRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    respond(
        StatusCode::CREATED,
        st.orchestrator.create_policy(&project, req).await,
    )
}

pub(crate) async fn update_policy(
    State(st): State<Arc<AppState>>,
    Path((project, policy)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let req: PolicyRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    respond(
        StatusCode::OK,
        st.orchestrator.update_policy(&project, &policy, req).await,
    )
}

pub(crate) async fn delete_policy(
    State(st): State<Arc<AppState>>,
    Path((project, policy)): Path<(String, String)>,
) -> Response {
    respond_empty(st.orchestrator.delete_policy(&project, &policy).await)
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

pub(crate) async fn create_rule(
    State(st): State<Arc<AppState>>,
    Path((project, policy)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let req: RuleRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    respond(
        StatusCode::CREATED,
        st.orchestrator.create_rule(&project, &policy, req).await,
    )
}

pub(crate) async fn get_rule(
    State(st): State<Arc<AppState>>,
    Path((project, policy, priority)): Path<(String, String, String)>,
) -> Response {
    respond(
        StatusCode::OK,
        st.orchestrator.get_rule(&project, &policy, &priority).await,
    )
}

pub(crate) async fn update_rule(
    State(st): State<Arc<AppState>>,
    Path((project, policy, priority)): Path<(String, String, String)>,
    body: Bytes,
) -> Response {
    let req: RuleRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    respond(
        StatusCode::OK,
        st.orchestrator
            .update_rule(&project, &policy, &priority, req)
            .await,
    )
}

pub(crate) async fn delete_rule(
    State(st): State<Arc<AppState>>,
    Path((project, policy, priority)): Path<(String, String, String)>,
) -> Response {
    respond_empty(
        st.orchestrator
            .delete_rule(&project, &policy, &priority)
            .await,
    )
}

// ---------------------------------------------------------------------------
// Preconfigured rules and backend services
// ---------------------------------------------------------------------------

pub(crate) async fn list_preconfigured_rules(
    State(st): State<Arc<AppState>>,
    Path(project): Path<String>,
    Query(q): Query<PreconfiguredQuery>,
) -> Response {
    respond(
        StatusCode::OK,
        st.orchestrator
            .list_preconfigured_rules(&project, &q.rule_type, &q.version)
            .await,
    )
}

pub(crate) async fn attach_backend(
    State(st): State<Arc<AppState>>,
    Path((project, policy, backend)): Path<(String, String, String)>,
) -> Response {
    respond(
        StatusCode::CREATED,
        st.orchestrator
            .attach_backend(&project, &policy, &backend)
            .await,
    )
}

pub(crate) async fn list_backend_services(
    State(st): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        st.orchestrator.list_backend_services(&project).await,
    )
}
