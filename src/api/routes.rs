//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::supervisor::Supervisor;
use crate::util::SystemClock;

use super::checks;
use super::schedule;
use super::types::StatusResponse;

/// Shared application state.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub scheduler: Arc<Scheduler>,
}

/// Build the router over existing state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .nest("/schedule", schedule::routes())
        .nest("/check-now", checks::routes())
        .route("/enforcement/cancel", post(checks::cancel_enforcement))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the triggers and the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let supervisor = Arc::new(Supervisor::from_config(&config)?);

    let scheduler = Arc::new(Scheduler::new(
        Arc::new(SystemClock::new(config.timezone)),
        supervisor.trigger_handler(),
        config.morning_schedule,
        config.evening_schedule,
    ));
    scheduler.start().await?;

    let state = Arc::new(AppState {
        supervisor,
        scheduler,
    });
    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT, then stop triggers and in-flight enforcement.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping triggers");
    state.scheduler.shutdown().await;
    state.supervisor.cancel_enforcement();
}

async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Task Supervisor Agent is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::http::StatusCode;
    use futures::FutureExt;

    use super::*;
    use crate::enforcement::{AddressPool, EnforcementDispatcher, RetryPolicy};
    use crate::ledger::fake::FlakyLedger;
    use crate::llm::fake::ScriptedModel;
    use crate::messaging::fake::FakeChannel;
    use crate::notes::fake::FakeNotes;
    use crate::notes::Block;
    use crate::scheduler::{ScheduleConfig, Slot, TriggerHandler};
    use crate::util::fixed_clock;
    use crate::verify::{CheckKind, Outcome, VerificationEngine};

    fn state() -> AppState {
        let notes = FakeNotes::default().with("page-may", vec![Block::toggle("d20", "20/05/2025")]);
        let engine = VerificationEngine::new(
            Arc::new(notes),
            Arc::new(FakeChannel::default()),
            Arc::new(ScriptedModel::default()),
            Arc::new(fixed_clock(2025, 5, 21, 23)),
            HashMap::from([("05/2025".to_string(), "page-may".to_string())]),
        );
        let pool = AddressPool::new(vec!["0x00000000000000000000000000000000000000a1".to_string()])
            .unwrap();
        let dispatcher = EnforcementDispatcher::new(Arc::new(FlakyLedger::failing(u32::MAX)), pool, 0.01)
            .with_retry(RetryPolicy {
                delay: Duration::from_secs(3600),
                max_attempts: None,
            });

        let noop: TriggerHandler = Arc::new(|_: CheckKind| async {}.boxed());
        AppState {
            supervisor: Arc::new(Supervisor::new(engine, dispatcher)),
            scheduler: Arc::new(Scheduler::new(
                Arc::new(fixed_clock(2025, 5, 21, 23)),
                noop,
                ScheduleConfig::new(7, 0, 0),
                ScheduleConfig::new(23, 59, 59),
            )),
        }
    }

    #[tokio::test]
    async fn invalid_schedule_is_bad_request() {
        let state = state();
        let (status, detail) = schedule::update_slot(&state, Slot::Morning, ScheduleConfig::new(24, 0, 0))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(detail.contains("24:00:00"));
        assert_eq!(state.scheduler.current().await.morning, ScheduleConfig::new(7, 0, 0));

        let Json(ok) = schedule::update_slot(&state, Slot::Evening, ScheduleConfig::new(22, 30, 0))
            .await
            .unwrap();
        assert_eq!(ok.message, "Evening check schedule updated to 22:30:00");
        state.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_check_is_conflict() {
        let state = state();
        let Json(first) = checks::check_now(&state, CheckKind::Completion, "Evening task check completed")
            .await
            .unwrap();
        assert_eq!(first.result.verdict.result, Outcome::Fail);
        assert!(first.result.enforcement_started);

        let (status, _) = checks::check_now(&state, CheckKind::Completion, "Evening task check completed")
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);

        state.supervisor.cancel_enforcement();
    }
}
