//! Enforcement: turning a failing verdict into a token transfer.
//!
//! Transfers retry with a fixed delay and a freshly sampled recipient each
//! time, until one lands, the attempt limit is reached, or the run is
//! cancelled. Errors never leave the retry loop; the caller gets an
//! [`EnforcementOutcome`] describing how it ended.

mod pool;

pub use pool::AddressPool;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::EnforcementConfig;
use crate::ledger::{usdc_units, Ledger};
use crate::verify::CheckVerdict;

#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("failed to read address pool {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("address pool is empty")]
    EmptyPool,

    #[error("invalid address in pool: {0}")]
    InvalidAddress(String),
}

/// Fixed-delay retry with an optional attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries until success or cancellation
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// One transfer attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PunishmentAttempt {
    pub address: String,
    pub amount_usdc: f64,
    pub tx_hash: Option<String>,
    pub succeeded: bool,
}

/// How an enforcement run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnforcementOutcome {
    /// Verdict was not a failure
    NotTriggered,
    Sent(PunishmentAttempt),
    /// Enforcement is disabled; the attempt was only logged
    DryRun(PunishmentAttempt),
    Cancelled { attempts: u32 },
    Exhausted { attempts: u32 },
}

pub struct EnforcementDispatcher {
    ledger: Arc<dyn Ledger>,
    pool: AddressPool,
    amount_usdc: f64,
    retry: RetryPolicy,
    enabled: bool,
}

impl EnforcementDispatcher {
    pub fn new(ledger: Arc<dyn Ledger>, pool: AddressPool, amount_usdc: f64) -> Self {
        Self {
            ledger,
            pool,
            amount_usdc,
            retry: RetryPolicy::default(),
            enabled: true,
        }
    }

    pub fn from_config(
        ledger: Arc<dyn Ledger>,
        pool: AddressPool,
        config: &EnforcementConfig,
    ) -> Self {
        Self::new(ledger, pool, config.amount_usdc)
            .with_retry(RetryPolicy {
                delay: config.retry_delay,
                max_attempts: config.max_attempts,
            })
            .with_enabled(config.enabled)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Punish a failing verdict; no-op for anything else.
    ///
    /// Cancellation is observed between attempts and during the retry delay,
    /// never while a transfer is in flight.
    pub async fn enforce(&self, verdict: &CheckVerdict, cancel: CancellationToken) -> EnforcementOutcome {
        if !verdict.result.is_fail() {
            tracing::info!(result = %verdict.result, "No punishment triggered");
            return EnforcementOutcome::NotTriggered;
        }

        let amount = usdc_units(self.amount_usdc);

        if !self.enabled {
            let address = self.pool.sample().to_string();
            tracing::warn!(
                address = %address,
                amount_usdc = self.amount_usdc,
                "Enforcement disabled, punishment not sent"
            );
            return EnforcementOutcome::DryRun(PunishmentAttempt {
                address,
                amount_usdc: self.amount_usdc,
                tx_hash: None,
                succeeded: false,
            });
        }

        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                tracing::error!(attempts, "Enforcement cancelled before punishment landed");
                return EnforcementOutcome::Cancelled { attempts };
            }

            attempts += 1;
            let address = self.pool.sample().to_string();

            match self.ledger.transfer(&address, amount).await {
                Ok(receipt) => {
                    tracing::info!(
                        address = %address,
                        amount_usdc = self.amount_usdc,
                        attempt = attempts,
                        tx_hash = %receipt.tx_hash,
                        "Punishment sent"
                    );
                    return EnforcementOutcome::Sent(PunishmentAttempt {
                        address,
                        amount_usdc: self.amount_usdc,
                        tx_hash: Some(receipt.tx_hash),
                        succeeded: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        address = %address,
                        attempt = attempts,
                        error = %e,
                        "Punishment transfer failed"
                    );
                    self.ledger.reconnect().await;
                }
            }

            if !self.retry.allows(attempts) {
                tracing::error!(attempts, "Enforcement gave up after maximum attempts");
                return EnforcementOutcome::Exhausted { attempts };
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::error!(attempts, "Enforcement cancelled before punishment landed");
                    return EnforcementOutcome::Cancelled { attempts };
                }
                _ = tokio::time::sleep(self.retry.delay) => {}
            }
        }
    }
}
