//! API endpoints for trigger schedules.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};

use crate::scheduler::{ScheduleConfig, ScheduleError, Slot};

use super::routes::AppState;
use super::types::{MessageResponse, ScheduleResponse};

/// Create the schedule API routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_schedule))
        .route("/morning", post(update_morning))
        .route("/evening", post(update_evening))
}

/// GET /schedule
async fn get_schedule(State(state): State<Arc<AppState>>) -> Json<ScheduleResponse> {
    Json(state.scheduler.current().await.into())
}

/// POST /schedule/morning
async fn update_morning(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ScheduleConfig>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    update_slot(&state, Slot::Morning, config).await
}

/// POST /schedule/evening
async fn update_evening(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ScheduleConfig>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    update_slot(&state, Slot::Evening, config).await
}

pub(crate) async fn update_slot(
    state: &AppState,
    slot: Slot,
    config: ScheduleConfig,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    match state.scheduler.update(slot, config).await {
        Ok(()) => Ok(Json(MessageResponse::new(format!(
            "{} check schedule updated to {}",
            capitalized(slot),
            config
        )))),
        Err(e @ ScheduleError::InvalidTime { .. }) => {
            tracing::warn!(slot = %slot, "Invalid schedule time provided: {}", e);
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

fn capitalized(slot: Slot) -> &'static str {
    match slot {
        Slot::Morning => "Morning",
        Slot::Evening => "Evening",
    }
}
