//! Composition root for check runs.
//!
//! A run verifies, logs the verdict, and hands failing verdicts to the
//! enforcement dispatcher in a background task. Each check kind has a guard
//! that stays held until that background task ends, so a stuck retry loop
//! makes later runs of the same check report busy instead of piling up.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::enforcement::{AddressPool, EnforcementDispatcher, EnforcementOutcome};
use crate::ledger::RpcLedger;
use crate::llm::OpenRouterClient;
use crate::messaging::TelegramClient;
use crate::notes::NotionClient;
use crate::scheduler::TriggerHandler;
use crate::util::SystemClock;
use crate::verify::{CheckKind, CheckVerdict, VerificationEngine, WorkoutRule};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0} check is already running")]
    Busy(CheckKind),
}

/// What a run reported back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub run_id: Uuid,
    pub check: CheckKind,
    pub verdict: CheckVerdict,
    /// Whether a punishment run was started in the background
    pub enforcement_started: bool,
}

pub struct CheckRun {
    pub report: CheckReport,
    pub enforcement: Option<JoinHandle<EnforcementOutcome>>,
}

pub struct Supervisor {
    engine: Arc<VerificationEngine>,
    dispatcher: Arc<EnforcementDispatcher>,
    guards: HashMap<CheckKind, Arc<Mutex<()>>>,
    cancel: std::sync::Mutex<CancellationToken>,
}

impl Supervisor {
    pub fn new(engine: VerificationEngine, dispatcher: EnforcementDispatcher) -> Self {
        let guards = CheckKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            engine: Arc::new(engine),
            dispatcher: Arc::new(dispatcher),
            guards,
            cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Wire the production clients from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let clock = Arc::new(SystemClock::new(config.timezone));
        let engine = VerificationEngine::new(
            Arc::new(NotionClient::new(config.notion_api_key.clone())),
            Arc::new(TelegramClient::new(config.telegram_bot_token.clone())),
            Arc::new(OpenRouterClient::new(
                config.openrouter_api_key.clone(),
                config.vision_model.clone(),
            )),
            clock,
            config.notion_page_ids.clone(),
        )
        .with_outage_policy(config.outage_policy)
        .with_workout_rule(WorkoutRule {
            caption_marker: config.workout_caption_marker.clone(),
            min_distance_km: config.workout_min_distance_km,
        });

        let ledger = RpcLedger::new(&config.ledger)?;
        tracing::info!(
            account = %ledger.address(),
            chain_id = config.ledger.chain_id,
            "Ledger account loaded"
        );
        let pool = AddressPool::load(&config.enforcement.address_pool_path)?;
        let dispatcher =
            EnforcementDispatcher::from_config(Arc::new(ledger), pool, &config.enforcement);

        Ok(Self::new(engine, dispatcher))
    }

    fn guard(&self, kind: CheckKind) -> Arc<Mutex<()>> {
        match self.guards.get(&kind) {
            Some(guard) => Arc::clone(guard),
            // Every kind gets a guard in `new`
            None => Arc::new(Mutex::new(())),
        }
    }

    pub fn is_busy(&self, kind: CheckKind) -> bool {
        self.guard(kind).try_lock().is_err()
    }

    fn enforcement_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.child_token(),
            Err(poisoned) => poisoned.into_inner().child_token(),
        }
    }

    /// Cancel every in-flight enforcement run. Later runs are unaffected.
    pub fn cancel_enforcement(&self) {
        let mut token = match self.cancel.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        token.cancel();
        *token = CancellationToken::new();
        tracing::warn!("In-flight enforcement cancelled by operator");
    }

    /// Run one check and start enforcement if it failed.
    pub async fn run(&self, kind: CheckKind) -> Result<CheckRun, SupervisorError> {
        let guard = self
            .guard(kind)
            .try_lock_owned()
            .map_err(|_| SupervisorError::Busy(kind))?;

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("check", run_id = %run_id, check = %kind);

        let verdict = self.engine.run(kind).instrument(span.clone()).await;
        log_verdict(&span, &verdict);

        let report = CheckReport {
            run_id,
            check: kind,
            verdict: verdict.clone(),
            enforcement_started: verdict.result.is_fail(),
        };

        if !verdict.result.is_fail() {
            self.dispatcher
                .enforce(&verdict, self.enforcement_token())
                .instrument(span)
                .await;
            return Ok(CheckRun {
                report,
                enforcement: None,
            });
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let token = self.enforcement_token();
        let handle = tokio::spawn(
            async move {
                let _guard = guard;
                dispatcher.enforce(&verdict, token).await
            }
            .instrument(span),
        );

        Ok(CheckRun {
            report,
            enforcement: Some(handle),
        })
    }

    /// Trigger callback for the scheduler.
    pub fn trigger_handler(self: &Arc<Self>) -> TriggerHandler {
        let supervisor = Arc::clone(self);
        Arc::new(move |kind: CheckKind| {
            let supervisor = Arc::clone(&supervisor);
            async move {
                if let Err(e) = supervisor.run(kind).await {
                    tracing::warn!(check = %kind, "Skipping scheduled run: {}", e);
                }
            }
            .boxed()
        })
    }
}

fn log_verdict(span: &tracing::Span, verdict: &CheckVerdict) {
    let _entered = span.enter();
    if verdict.check_errored() {
        tracing::error!(
            result = %verdict.result,
            status = ?verdict.status,
            "Check errored: {}",
            verdict.message
        );
    } else if verdict.result.is_fail() {
        tracing::warn!(result = %verdict.result, "Check failed: {}", verdict.message);
    } else {
        tracing::info!(result = %verdict.result, "Check passed: {}", verdict.message);
    }
}
