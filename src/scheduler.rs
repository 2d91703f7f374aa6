//! Daily check triggers.
//!
//! Each trigger is a tokio task that sleeps until the next wall-clock fire
//! time in the configured offset, runs its check, and repeats. The morning
//! slot owns the existence and evidence-presence triggers, the evening slot
//! owns completion and evidence-aggregate. Updating a slot aborts its
//! triggers and spawns replacements.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::util::Clock;
use crate::verify::CheckKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid time {hour:02}:{minute:02}:{second:02}")]
    InvalidTime { hour: u32, minute: u32, second: u32 },
}

/// Wall-clock time of day at which a slot fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
    #[serde(default)]
    pub second: u32,
}

impl ScheduleConfig {
    pub const fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.time().map(|_| ())
    }

    fn time(&self) -> Result<NaiveTime, ScheduleError> {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).ok_or(
            ScheduleError::InvalidTime {
                hour: self.hour,
                minute: self.minute,
                second: self.second,
            },
        )
    }

    /// First fire time strictly after `now`, in `now`'s offset.
    pub fn next_fire(&self, now: DateTime<FixedOffset>) -> Result<DateTime<FixedOffset>, ScheduleError> {
        let offset = *now.offset();
        let local = now.date_naive().and_time(self.time()?);
        let utc = local - Duration::seconds(offset.local_minus_utc() as i64);
        let candidate = DateTime::<FixedOffset>::from_naive_utc_and_offset(utc, offset);
        if candidate > now {
            Ok(candidate)
        } else {
            Ok(candidate + Duration::days(1))
        }
    }
}

impl fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Morning,
    Evening,
}

impl Slot {
    pub fn checks(&self) -> [CheckKind; 2] {
        match self {
            Slot::Morning => [CheckKind::Existence, CheckKind::EvidencePresence],
            Slot::Evening => [CheckKind::Completion, CheckKind::EvidenceAggregate],
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Morning => write!(f, "morning"),
            Slot::Evening => write!(f, "evening"),
        }
    }
}

/// Identity of one registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId {
    pub slot: Slot,
    pub check: CheckKind,
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.slot, self.check)
    }
}

/// Current slot times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleSnapshot {
    pub morning: ScheduleConfig,
    pub evening: ScheduleConfig,
}

/// Callback run when a trigger fires.
pub type TriggerHandler = Arc<dyn Fn(CheckKind) -> BoxFuture<'static, ()> + Send + Sync>;

struct SchedulerState {
    snapshot: ScheduleSnapshot,
    triggers: HashMap<TriggerId, JoinHandle<()>>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    handler: TriggerHandler,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Create a scheduler with the given slot times; no triggers run until
    /// [`Scheduler::start`].
    pub fn new(
        clock: Arc<dyn Clock>,
        handler: TriggerHandler,
        morning: ScheduleConfig,
        evening: ScheduleConfig,
    ) -> Self {
        Self {
            clock,
            handler,
            state: Mutex::new(SchedulerState {
                snapshot: ScheduleSnapshot { morning, evening },
                triggers: HashMap::new(),
            }),
        }
    }

    pub async fn start(&self) -> Result<(), ScheduleError> {
        let snapshot = self.current().await;
        self.update(Slot::Morning, snapshot.morning).await?;
        self.update(Slot::Evening, snapshot.evening).await
    }

    pub async fn current(&self) -> ScheduleSnapshot {
        self.state.lock().await.snapshot
    }

    /// Replace a slot's triggers. Invalid times are rejected before any
    /// trigger is touched.
    pub async fn update(&self, slot: Slot, config: ScheduleConfig) -> Result<(), ScheduleError> {
        config.validate()?;

        let mut state = self.state.lock().await;
        match slot {
            Slot::Morning => state.snapshot.morning = config,
            Slot::Evening => state.snapshot.evening = config,
        }

        for check in slot.checks() {
            let id = TriggerId { slot, check };
            if let Some(previous) = state.triggers.remove(&id) {
                previous.abort();
            }
            let handle = self.spawn_trigger(id, config);
            state.triggers.insert(id, handle);
        }

        tracing::info!(slot = %slot, time = %config, "Scheduled {} checks", slot);
        Ok(())
    }

    pub async fn trigger_ids(&self) -> Vec<TriggerId> {
        self.state.lock().await.triggers.keys().copied().collect()
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (_, handle) in state.triggers.drain() {
            handle.abort();
        }
    }

    fn spawn_trigger(&self, id: TriggerId, config: ScheduleConfig) -> JoinHandle<()> {
        let clock = Arc::clone(&self.clock);
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            // Wall time can lag the monotonic sleep; never fire the same instant twice
            let mut last_fire: Option<DateTime<FixedOffset>> = None;
            loop {
                let now = clock.now();
                let reference = last_fire.map_or(now, |fired| fired.max(now));
                let next = match config.next_fire(reference) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::error!(trigger = %id, error = %e, "Trigger stopped");
                        return;
                    }
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::debug!(trigger = %id, next = %next, "Trigger armed");
                tokio::time::sleep(wait).await;

                tracing::info!(trigger = %id, "Trigger fired");
                last_fire = Some(next);
                handler(id.check).await;
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            for (_, handle) in state.triggers.drain() {
                handle.abort();
            }
        }
    }
}
