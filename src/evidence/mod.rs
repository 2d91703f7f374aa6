//! Photographic evidence: qualification and classification.
//!
//! An attachment qualifies when its embedded capture time falls on today in
//! the configured offset. Qualifying images are then either classified
//! against a natural-language rubric (`true`/`false`) or mined for workout
//! facts, both through the inference client.

mod metadata;
mod workout;

pub use metadata::capture_time;
pub use workout::{
    parse_date, parse_distance, parse_workout, repair_json, Distance, DistanceUnit, WorkoutFacts,
    WORKOUT_SYSTEM_PROMPT, WORKOUT_USER_PROMPT,
};

#[cfg(test)]
pub(crate) use metadata::jpeg_with_capture_time;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::llm::{ImageInput, InferenceClient, InferenceRequest};
use crate::messaging::{Message, MessageSource, MessagingError};

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("{0}")]
    Unparseable(String),
}

/// What the model concluded about one image.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Matches(bool),
    Facts(WorkoutFacts),
}

/// A qualifying attachment, alive for one check invocation.
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub message_id: i64,
    pub captured_at: NaiveDateTime,
    pub image: ImageInput,
    pub classification: Option<Classification>,
}

pub const RUBRIC_SYSTEM_PROMPT: &str = "You are an expert image content analyzer.\n\
Your task is to analyze the provided image and check if it depicts what the user describes.\n\
Respond ONLY with:\n\
\"true\" - if the image content meets the criteria\n\
\"false\" - otherwise";

/// Download today's attachments accepted by `include` and keep those
/// captured today, preserving arrival order.
pub async fn qualifying_attachments<F>(
    source: &dyn MessageSource,
    today: NaiveDate,
    offset: FixedOffset,
    include: F,
) -> Result<Vec<EvidenceItem>, EvidenceError>
where
    F: Fn(&Message) -> bool + Send + Sync,
{
    let messages = source.messages_on(today, offset).await?;
    let mut items = Vec::new();

    for message in messages.iter().filter(|m| include(m)) {
        let Some(ref attachment) = message.attachment else {
            continue;
        };
        let content = source.download(attachment).await?;

        match capture_time(&content) {
            Some(captured_at) if captured_at.date() == today => {
                tracing::debug!(message_id = message.id, captured_at = %captured_at, "Attachment qualifies");
                items.push(EvidenceItem {
                    message_id: message.id,
                    captured_at,
                    image: ImageInput::from_bytes(content),
                    classification: None,
                });
            }
            Some(captured_at) => {
                tracing::info!(
                    message_id = message.id,
                    captured_at = %captured_at,
                    "Ignoring attachment captured on another day"
                );
            }
            None => {
                tracing::info!(message_id = message.id, "Ignoring attachment without capture time");
            }
        }
    }

    Ok(items)
}

/// Interpret a boolean-only model answer; anything but `true` is negative.
pub fn parse_boolean_answer(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("true")
}

/// Classify one image against a rubric.
pub async fn classify_against_rubric(
    model: &dyn InferenceClient,
    item: &mut EvidenceItem,
    rubric: &str,
) -> Result<bool, EvidenceError> {
    let request = InferenceRequest::new(rubric)
        .with_system(RUBRIC_SYSTEM_PROMPT)
        .with_image(item.image.clone());
    let answer = model
        .complete(&request)
        .await
        .map_err(|e| EvidenceError::Inference(e.to_string()))?;

    let matches = parse_boolean_answer(&answer);
    if !matches && !answer.trim().eq_ignore_ascii_case("false") {
        tracing::warn!(answer = %answer.trim(), "Ambiguous classification treated as negative");
    }
    item.classification = Some(Classification::Matches(matches));
    Ok(matches)
}

/// Extract workout facts from one screenshot.
pub async fn extract_workout_facts(
    model: &dyn InferenceClient,
    item: &mut EvidenceItem,
    today: NaiveDate,
) -> Result<WorkoutFacts, EvidenceError> {
    let request = InferenceRequest::new(WORKOUT_USER_PROMPT)
        .with_system(WORKOUT_SYSTEM_PROMPT)
        .with_image(item.image.clone());
    let raw = model
        .complete(&request)
        .await
        .map_err(|e| EvidenceError::Inference(e.to_string()))?;

    let facts = parse_workout(&raw, today)?;
    item.classification = Some(Classification::Facts(facts.clone()));
    Ok(facts)
}
