//! The four check policies.
//!
//! Structural checks walk today's task tree; evidence checks classify
//! today's qualifying photos. Every entry point returns a verdict and never
//! an error: failures to check are folded in through the outage policy.

use std::collections::HashMap;
use std::sync::Arc;

use super::{CheckKind, CheckVerdict, OutagePolicy};
use crate::evidence::{
    classify_against_rubric, extract_workout_facts, qualifying_attachments, EvidenceError,
};
use crate::llm::InferenceClient;
use crate::messaging::MessageSource;
use crate::notes::{extract_today, NoteSource, TaskNode};
use crate::util::{day_label, Clock};

/// Rubrics for the morning routine photos, in the order they must be sent.
pub const DEFAULT_MORNING_RUBRICS: [&str; 4] = [
    "Check if the image depicts a man brushing his teeth. \
     The man should be clearly visible with a toothbrush in his mouth or hand.",
    "Check if the image depicts a man taking a selfie with his laptop visible. \
     Both the man and the laptop should be visible in the frame.",
    "Check if the image depicts a man's legs wearing sport or running shoes.",
    "Check if the image depicts a man taking a shower. \
     The shower and running water should be visible in the frame.",
];

/// Shape the morning outline must have.
#[derive(Debug, Clone)]
pub struct ExistenceRule {
    /// Leaf that must be checked
    pub intention_key: String,
    /// Branch that must hold every `required_misc_keys` leaf
    pub misc_key: String,
    pub required_misc_keys: Vec<String>,
}

impl Default for ExistenceRule {
    fn default() -> Self {
        Self {
            intention_key: "note đầu ngày".to_string(),
            misc_key: "việc linh tinh".to_string(),
            required_misc_keys: vec![
                "no any fucking porn".to_string(),
                "follow pomodoro strictly".to_string(),
            ],
        }
    }
}

impl ExistenceRule {
    /// Evaluate the rule against today's tree.
    pub fn evaluate(&self, tree: &TaskNode) -> CheckVerdict {
        let intention_done = tree
            .child(&self.intention_key)
            .and_then(TaskNode::result)
            .map_or(false, |r| !r.is_fail());
        if !intention_done {
            return CheckVerdict::fail(format!("'{}' is missing or unchecked", self.intention_key));
        }

        let misc = match tree.child(&self.misc_key) {
            Some(node @ TaskNode::Branch { .. }) => node,
            _ => return CheckVerdict::fail(format!("'{}' section is missing", self.misc_key)),
        };

        let missing: Vec<&str> = self
            .required_misc_keys
            .iter()
            .filter(|key| !misc.child(key).map_or(false, TaskNode::is_leaf))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return CheckVerdict::fail(format!(
                "'{}' is missing required items: {}",
                self.misc_key,
                missing.join(", ")
            ));
        }

        CheckVerdict::pass("Tasks found for today.")
    }
}

/// Workout distance requirement.
#[derive(Debug, Clone)]
pub struct WorkoutRule {
    /// Only attachments whose caption carries this marker are considered
    pub caption_marker: String,
    pub min_distance_km: f64,
}

impl Default for WorkoutRule {
    fn default() -> Self {
        Self {
            caption_marker: "#workout".to_string(),
            min_distance_km: 2.5,
        }
    }
}

/// Runs checks against the external sources for the current day.
pub struct VerificationEngine {
    notes: Arc<dyn NoteSource>,
    messages: Arc<dyn MessageSource>,
    model: Arc<dyn InferenceClient>,
    clock: Arc<dyn Clock>,
    page_ids: HashMap<String, String>,
    outage_policy: OutagePolicy,
    existence_rule: ExistenceRule,
    rubrics: Vec<String>,
    workout_rule: WorkoutRule,
}

impl VerificationEngine {
    pub fn new(
        notes: Arc<dyn NoteSource>,
        messages: Arc<dyn MessageSource>,
        model: Arc<dyn InferenceClient>,
        clock: Arc<dyn Clock>,
        page_ids: HashMap<String, String>,
    ) -> Self {
        Self {
            notes,
            messages,
            model,
            clock,
            page_ids,
            outage_policy: OutagePolicy::default(),
            existence_rule: ExistenceRule::default(),
            rubrics: DEFAULT_MORNING_RUBRICS.iter().map(|r| r.to_string()).collect(),
            workout_rule: WorkoutRule::default(),
        }
    }

    pub fn with_outage_policy(mut self, policy: OutagePolicy) -> Self {
        self.outage_policy = policy;
        self
    }

    pub fn with_existence_rule(mut self, rule: ExistenceRule) -> Self {
        self.existence_rule = rule;
        self
    }

    pub fn with_rubrics(mut self, rubrics: Vec<String>) -> Self {
        self.rubrics = rubrics;
        self
    }

    pub fn with_workout_rule(mut self, rule: WorkoutRule) -> Self {
        self.workout_rule = rule;
        self
    }

    pub async fn run(&self, kind: CheckKind) -> CheckVerdict {
        match kind {
            CheckKind::Existence => self.check_existence().await,
            CheckKind::Completion => self.check_completion().await,
            CheckKind::EvidencePresence => self.check_evidence_presence().await,
            CheckKind::EvidenceAggregate => self.check_evidence_aggregate().await,
        }
    }

    /// Morning: the minimum ritual is recorded.
    pub async fn check_existence(&self) -> CheckVerdict {
        let today = self.clock.today();
        match extract_today(self.notes.as_ref(), &self.page_ids, today).await {
            Ok(Some(tree)) => self.existence_rule.evaluate(&tree),
            Ok(None) => CheckVerdict::fail(format!("No section found for {}.", day_label(today))),
            Err(e) => CheckVerdict::errored(
                self.outage_policy,
                format!("Error checking task existence: {}", e),
            ),
        }
    }

    /// Evening: every item of today's tree is done.
    pub async fn check_completion(&self) -> CheckVerdict {
        let today = self.clock.today();
        match extract_today(self.notes.as_ref(), &self.page_ids, today).await {
            Ok(Some(tree)) => {
                let incomplete = tree.failed_paths();
                if incomplete.is_empty() {
                    CheckVerdict::pass("All tasks completed!")
                } else {
                    CheckVerdict::fail(format!(
                        "{} incomplete tasks: {}",
                        incomplete.len(),
                        incomplete.join(", ")
                    ))
                }
            }
            Ok(None) => CheckVerdict::fail(format!(
                "No section found for {}; nothing was completed.",
                day_label(today)
            )),
            Err(e) => CheckVerdict::errored(
                self.outage_policy,
                format!("Error checking task completion: {}", e),
            ),
        }
    }

    /// Morning: the last N qualifying photos match the N rubrics, in order.
    pub async fn check_evidence_presence(&self) -> CheckVerdict {
        let today = self.clock.today();
        let required = self.rubrics.len();

        let items = match qualifying_attachments(
            self.messages.as_ref(),
            today,
            self.clock.offset(),
            |_| true,
        )
        .await
        {
            Ok(items) => items,
            Err(e) => {
                return CheckVerdict::errored(
                    self.outage_policy,
                    format!("Error collecting images: {}", e),
                )
            }
        };

        if items.len() < required {
            return CheckVerdict::fail(format!(
                "Not enough images: {} of {} captured today.",
                items.len(),
                required
            ));
        }

        let mut latest: Vec<_> = items.into_iter().rev().take(required).collect();
        latest.reverse();

        for (index, (item, rubric)) in latest.iter_mut().zip(&self.rubrics).enumerate() {
            match classify_against_rubric(self.model.as_ref(), item, rubric).await {
                Ok(true) => tracing::debug!(image = index + 1, "Image matches its rubric"),
                Ok(false) => {
                    return CheckVerdict::fail(format!(
                        "Invalid image {} of {}: does not match '{}'",
                        index + 1,
                        required,
                        rubric
                    ))
                }
                Err(e) => {
                    return CheckVerdict::errored(
                        self.outage_policy,
                        format!("Error classifying image {}: {}", index + 1, e),
                    )
                }
            }
        }

        CheckVerdict::pass(format!("All {} images are valid.", required))
    }

    /// Evening: today's tagged workouts add up to the minimum distance.
    pub async fn check_evidence_aggregate(&self) -> CheckVerdict {
        let today = self.clock.today();
        let marker = self.workout_rule.caption_marker.as_str();

        let items = match qualifying_attachments(
            self.messages.as_ref(),
            today,
            self.clock.offset(),
            |m| m.is_tagged(marker),
        )
        .await
        {
            Ok(items) => items,
            Err(e) => {
                return CheckVerdict::errored(
                    self.outage_policy,
                    format!("Error collecting workout screenshots: {}", e),
                )
            }
        };

        let mut total_meters: u64 = 0;
        for mut item in items {
            let facts = match extract_workout_facts(self.model.as_ref(), &mut item, today).await {
                Ok(facts) => facts,
                Err(EvidenceError::Unparseable(reason)) => {
                    return CheckVerdict::diagnostic(format!(
                        "Could not read workout in message {}: {}",
                        item.message_id, reason
                    ))
                }
                Err(e) => {
                    return CheckVerdict::errored(
                        self.outage_policy,
                        format!("Error reading workout in message {}: {}", item.message_id, e),
                    )
                }
            };

            if facts.date != today {
                tracing::info!(message_id = item.message_id, date = %facts.date, "Workout is not from today");
                continue;
            }
            match facts.distance.kilometer_meters() {
                Some(meters) => match total_meters.checked_add(meters) {
                    Some(sum) => total_meters = sum,
                    None => {
                        return CheckVerdict::diagnostic(format!(
                            "Workout distance in message {} is implausibly large: {:?}",
                            item.message_id, facts.distance.value
                        ))
                    }
                },
                None => tracing::info!(
                    message_id = item.message_id,
                    unit = ?facts.distance.unit,
                    "Skipping workout distance not in kilometers"
                ),
            }
        }

        let required_meters = (self.workout_rule.min_distance_km * 1000.0).round() as u64;
        let total_km = total_meters as f64 / 1000.0;
        if total_meters >= required_meters {
            CheckVerdict::pass(format!(
                "Workout distance {:.2} km meets {:.2} km.",
                total_km, self.workout_rule.min_distance_km
            ))
        } else {
            CheckVerdict::fail(format!(
                "Workout distance {:.2} km is below {:.2} km.",
                total_km, self.workout_rule.min_distance_km
            ))
        }
    }
}
