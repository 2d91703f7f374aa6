//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::scheduler::{ScheduleConfig, ScheduleSnapshot};
use crate::supervisor::CheckReport;

/// Liveness response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub message: String,
    pub version: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Current trigger times.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleResponse {
    /// `HH:MM:SS` in the configured offset
    pub morning_check_time: String,
    pub evening_check_time: String,
    pub morning: ScheduleConfig,
    pub evening: ScheduleConfig,
}

impl From<ScheduleSnapshot> for ScheduleResponse {
    fn from(snapshot: ScheduleSnapshot) -> Self {
        Self {
            morning_check_time: snapshot.morning.to_string(),
            evening_check_time: snapshot.evening.to_string(),
            morning: snapshot.morning,
            evening: snapshot.evening,
        }
    }
}

/// Result of a forced check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckNowResponse {
    pub message: String,
    pub result: CheckReport,
}
