//! API endpoints for forcing checks and stopping enforcement.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};

use crate::supervisor::SupervisorError;
use crate::verify::CheckKind;

use super::routes::AppState;
use super::types::{CheckNowResponse, MessageResponse};

/// Create the check-now API routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/morning", post(check_morning))
        .route("/evening", post(check_evening))
        .route("/morning-images", post(check_morning_images))
        .route("/workout", post(check_workout))
}

async fn check_morning(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CheckNowResponse>, (StatusCode, String)> {
    check_now(&state, CheckKind::Existence, "Morning task check completed").await
}

async fn check_evening(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CheckNowResponse>, (StatusCode, String)> {
    check_now(&state, CheckKind::Completion, "Evening task check completed").await
}

async fn check_morning_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CheckNowResponse>, (StatusCode, String)> {
    check_now(&state, CheckKind::EvidencePresence, "Morning images check completed").await
}

async fn check_workout(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CheckNowResponse>, (StatusCode, String)> {
    check_now(&state, CheckKind::EvidenceAggregate, "Workout check completed").await
}

pub(crate) async fn check_now(
    state: &AppState,
    kind: CheckKind,
    message: &str,
) -> Result<Json<CheckNowResponse>, (StatusCode, String)> {
    tracing::info!(check = %kind, "Manual check requested");
    match state.supervisor.run(kind).await {
        // Enforcement keeps running after the response is sent
        Ok(run) => Ok(Json(CheckNowResponse {
            message: message.to_string(),
            result: run.report,
        })),
        Err(e @ SupervisorError::Busy(_)) => Err((StatusCode::CONFLICT, e.to_string())),
    }
}

/// POST /enforcement/cancel
pub(crate) async fn cancel_enforcement(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.supervisor.cancel_enforcement();
    Json(MessageResponse::new("In-flight enforcement cancelled"))
}
