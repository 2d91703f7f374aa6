//! Verification verdicts and policies.
//!
//! Every check produces a [`CheckVerdict`]. `result` is the one canonical
//! accountability signal and the only thing enforcement looks at; `status`
//! annotates whether the check itself ran cleanly.

mod engine;

pub use engine::{
    ExistenceRule, VerificationEngine, WorkoutRule, DEFAULT_MORNING_RUBRICS,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Accountability outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    pub fn from_bool(passed: bool) -> Self {
        if passed {
            Outcome::Pass
        } else {
            Outcome::Fail
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Outcome::Fail)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "PASS"),
            Outcome::Fail => write!(f, "FAIL"),
        }
    }
}

/// Whether the check itself ran without internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Success,
    Fail,
}

/// Result of one check invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckVerdict {
    pub result: Outcome,
    pub message: String,
    pub status: RunStatus,
}

impl CheckVerdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            result: Outcome::Pass,
            message: message.into(),
            status: RunStatus::Success,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            result: Outcome::Fail,
            message: message.into(),
            status: RunStatus::Success,
        }
    }

    /// The check could not run to completion; `policy` decides the outcome.
    pub fn errored(policy: OutagePolicy, message: impl Into<String>) -> Self {
        Self {
            result: policy.outcome(),
            message: message.into(),
            status: RunStatus::Fail,
        }
    }

    /// The check ran but its evidence was unusable; always a failure.
    pub fn diagnostic(message: impl Into<String>) -> Self {
        Self {
            result: Outcome::Fail,
            message: message.into(),
            status: RunStatus::Fail,
        }
    }

    pub fn check_errored(&self) -> bool {
        self.status == RunStatus::Fail
    }
}

/// What a check reports when its data source is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutagePolicy {
    /// Outage counts as PASS; the user is not penalized for our failure
    #[default]
    Exempt,
    /// Outage counts as FAIL; enforcement runs
    Penalize,
}

impl OutagePolicy {
    pub fn outcome(&self) -> Outcome {
        match self {
            OutagePolicy::Exempt => Outcome::Pass,
            OutagePolicy::Penalize => Outcome::Fail,
        }
    }
}

impl FromStr for OutagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exempt" | "pass" => Ok(OutagePolicy::Exempt),
            "penalize" | "fail" => Ok(OutagePolicy::Penalize),
            other => Err(format!("unknown outage policy '{}'", other)),
        }
    }
}

/// The four scheduled checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Morning: minimum ritual recorded in the outline
    Existence,
    /// Evening: every outline item checked
    Completion,
    /// Morning: required routine photos sent
    EvidencePresence,
    /// Evening: enough workout distance logged
    EvidenceAggregate,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::Existence,
        CheckKind::Completion,
        CheckKind::EvidencePresence,
        CheckKind::EvidenceAggregate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Existence => "existence",
            CheckKind::Completion => "completion",
            CheckKind::EvidencePresence => "evidence_presence",
            CheckKind::EvidenceAggregate => "evidence_aggregate",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
