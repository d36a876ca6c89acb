//! REST endpoints over enrollment sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EnrollmentError;
use crate::orchestrator::{EnrollmentDeps, EnrollmentOrchestrator};
use crate::submission::SubmitOutcome;
use crate::supervisor::{Fault, Recovery};
use crate::verification::SendOutcome;
use crate::wizard::IdentityMode;

/// Live enrollment sessions by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<EnrollmentOrchestrator>>>,
    deps: EnrollmentDeps,
}

impl SessionRegistry {
    pub fn new(deps: EnrollmentDeps) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            deps,
        })
    }

    pub async fn create(
        &self,
        mode: IdentityMode,
        pending_token: Option<SecretString>,
    ) -> Result<Arc<EnrollmentOrchestrator>, EnrollmentError> {
        let session = Arc::new(EnrollmentOrchestrator::start(
            mode,
            self.deps.clone(),
            pending_token,
        )?);
        self.sessions
            .write()
            .await
            .insert(session.id(), session.clone());
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<EnrollmentOrchestrator>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Dispose and forget a session.
    pub async fn remove(&self, id: Uuid) -> bool {
        match self.sessions.write().await.remove(&id) {
            Some(session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Dispose every session. Clients start over with a fresh one.
    pub async fn reset(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in &drained {
            session.dispose();
        }
        drained.len()
    }
}

#[async_trait]
impl Recovery for SessionRegistry {
    async fn recover(&self, fault: &Fault) {
        let dropped = self.reset().await;
        warn!(fault = %fault, dropped, "Sessions reset after fault");
    }
}

/// Build the enrollment REST routes.
pub fn enrollment_routes(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/enrollments", post(create_session))
        .route(
            "/api/enrollments/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/enrollments/{id}/fields", patch(update_fields))
        .route("/api/enrollments/{id}/next", post(next_step))
        .route("/api/enrollments/{id}/prev", post(prev_step))
        .route("/api/enrollments/{id}/undo", post(undo_edit))
        .route("/api/enrollments/{id}/sms/send", post(send_sms))
        .route("/api/enrollments/{id}/sms/resend", post(resend_sms))
        .route("/api/enrollments/{id}/sms/verify", post(verify_sms))
        .route("/api/enrollments/{id}/submit", post(submit))
        .with_state(registry)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "enrollment-orchestrator"
    }))
}

fn error_status(err: &EnrollmentError) -> StatusCode {
    match err {
        EnrollmentError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EnrollmentError::InvalidState { .. } | EnrollmentError::Disposed => StatusCode::CONFLICT,
        EnrollmentError::Network { .. } => StatusCode::BAD_GATEWAY,
        EnrollmentError::Client { .. } | EnrollmentError::Verification { .. } => {
            StatusCode::BAD_REQUEST
        }
        EnrollmentError::Store(_) | EnrollmentError::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Enrollment session not found"})),
    )
        .into_response()
}

/// Resolve the `{id}` path segment to a live session.
async fn lookup(
    registry: &SessionRegistry,
    id: &str,
) -> Result<Arc<EnrollmentOrchestrator>, Response> {
    let Ok(id) = Uuid::parse_str(id) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid session ID"})),
        )
            .into_response());
    };
    registry.get(id).await.ok_or_else(not_found)
}

/// Error body carrying the current view so the client can render inline
/// field errors and the banner.
async fn failure(session: &EnrollmentOrchestrator, err: EnrollmentError) -> Response {
    let view = session.view().await;
    (
        error_status(&err),
        Json(serde_json::json!({
            "error": err.user_message(),
            "field": err.field(),
            "view": view,
        })),
    )
        .into_response()
}

async fn respond<T>(session: &EnrollmentOrchestrator, result: Result<T, EnrollmentError>) -> Response {
    match result {
        Ok(_) => Json(session.view().await).into_response(),
        Err(e) => failure(session, e).await,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(default = "default_mode")]
    mode: IdentityMode,
    pending_identity_token: Option<String>,
}

fn default_mode() -> IdentityMode {
    IdentityMode::Password
}

async fn create_session(
    State(registry): State<Arc<SessionRegistry>>,
    body: Option<Json<CreateRequest>>,
) -> Response {
    let (mode, token) = match body {
        Some(Json(req)) => (req.mode, req.pending_identity_token.map(SecretString::from)),
        None => (IdentityMode::Password, None),
    };

    match registry.create(mode, token).await {
        Ok(session) => {
            info!(session = %session.id(), %mode, "Session created via API");
            (StatusCode::CREATED, Json(session.view().await)).into_response()
        }
        Err(e) => (
            error_status(&e),
            Json(serde_json::json!({"error": e.user_message()})),
        )
            .into_response(),
    }
}

async fn get_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    match lookup(&registry, &id).await {
        Ok(session) => Json(session.view().await).into_response(),
        Err(resp) => resp,
    }
}

async fn delete_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    registry.remove(session.id()).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn update_fields(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Map<String, serde_json::Value>>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let result = session.update_json(&body).await;
    respond(&session, result).await
}

async fn next_step(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let result = session.next().await;
    respond(&session, result).await
}

async fn prev_step(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let result = session.prev().await;
    respond(&session, result).await
}

async fn undo_edit(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let result = session.undo().await;
    respond(&session, result).await
}

fn send_outcome_name(outcome: SendOutcome) -> &'static str {
    match outcome {
        SendOutcome::Sent => "sent",
        SendOutcome::Ignored => "ignored",
    }
}

async fn send_sms(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match session.send_code().await {
        Ok(outcome) => Json(serde_json::json!({
            "outcome": send_outcome_name(outcome),
            "view": session.view().await,
        }))
        .into_response(),
        Err(e) => failure(&session, e).await,
    }
}

async fn resend_sms(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match session.resend_code().await {
        Ok(outcome) => Json(serde_json::json!({
            "outcome": send_outcome_name(outcome),
            "view": session.view().await,
        }))
        .into_response(),
        Err(e) => failure(&session, e).await,
    }
}

#[derive(Deserialize)]
struct VerifyRequest {
    code: String,
}

async fn verify_sms(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    Json(body): Json<VerifyRequest>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let result = session.verify_code(body.code.trim()).await;
    respond(&session, result).await
}

async fn submit(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Response {
    let session = match lookup(&registry, &id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match session.submit().await {
        Ok(SubmitOutcome::HandedOff(receipt)) => Json(serde_json::json!({
            "outcome": "handed_off",
            "receipt": receipt,
            "view": session.view().await,
        }))
        .into_response(),
        Ok(SubmitOutcome::AlreadyInFlight) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "outcome": "already_in_flight",
                "error": "A submission is already in progress",
            })),
        )
            .into_response(),
        Err(e) => failure(&session, e).await,
    }
}
