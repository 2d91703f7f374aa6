//! Workout facts extracted from activity screenshots.
//!
//! The model is asked for JSON but answers loosely: fenced blocks, prose
//! around the object, trailing commas, numbers where strings were asked for.
//! [`repair_json`] turns that into a strict object before anything is parsed.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Deserialize;

use super::EvidenceError;

pub const WORKOUT_SYSTEM_PROMPT: &str = r#"You're an expert in reading information from images.
You will be provided with a screenshot that summarizes a workout. Extract the required information and return it in this JSON format:
{
    "date": <str the date of the workout>,
    "distance": <str the distance of the workout, including the unit>,
    "duration": <str the duration of the workout, in hh:mm:ss format>,
    "velocity": <str the velocity of the workout, including the unit>
}
Respond ONLY with the JSON object, nothing else. Ensure that the JSON object is valid."#;

pub const WORKOUT_USER_PROMPT: &str = "Please extract the information from this image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Kilometers,
    Meters,
    Miles,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    pub value: f64,
    pub unit: DistanceUnit,
}

impl Distance {
    /// Whole meters, for kilometer distances only.
    pub fn kilometer_meters(&self) -> Option<u64> {
        match self.unit {
            DistanceUnit::Kilometers => Some((self.value * 1000.0).round() as u64),
            DistanceUnit::Meters | DistanceUnit::Miles => None,
        }
    }
}

/// Strictly parsed facts of one workout.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutFacts {
    pub date: NaiveDate,
    pub distance: Distance,
    pub duration: Option<String>,
    pub velocity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LooseFacts {
    #[serde(default)]
    date: Option<serde_json::Value>,
    #[serde(default)]
    distance: Option<serde_json::Value>,
    #[serde(default)]
    duration: Option<serde_json::Value>,
    #[serde(default)]
    velocity: Option<serde_json::Value>,
}

fn as_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid regex"))
}

fn distance_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([0-9]+(?:[.,][0-9]+)?)\s*([A-Za-z]+)\.?\s*$").expect("valid regex")
    })
}

/// Repair loosely structured model output into a JSON object.
pub fn repair_json(raw: &str) -> Result<serde_json::Value, EvidenceError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => {
            return Err(EvidenceError::Unparseable(format!(
                "no JSON object in model output: {}",
                raw.trim()
            )))
        }
    };

    let cleaned = body
        .replace(&['\u{201c}', '\u{201d}'][..], "\"")
        .replace(&['\u{2018}', '\u{2019}'][..], "'");
    let cleaned = trailing_comma().replace_all(&cleaned, "$1");

    let value: serde_json::Value = serde_json::from_str(&cleaned)
        .map_err(|e| EvidenceError::Unparseable(format!("invalid JSON ({}): {}", e, body)))?;
    if !value.is_object() {
        return Err(EvidenceError::Unparseable(format!("expected an object: {}", body)));
    }
    Ok(value)
}

/// Parse a distance such as `3.2 km`, `3,2km` or `800 m`.
pub fn parse_distance(text: &str) -> Result<Distance, EvidenceError> {
    let caps = distance_pattern()
        .captures(text)
        .ok_or_else(|| EvidenceError::Unparseable(format!("unparseable distance '{}'", text)))?;

    let value: f64 = caps[1]
        .replace(',', ".")
        .parse()
        .map_err(|_| EvidenceError::Unparseable(format!("unparseable distance '{}'", text)))?;

    let unit = match caps[2].to_lowercase().as_str() {
        "km" | "kms" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => {
            DistanceUnit::Kilometers
        }
        "m" | "meter" | "meters" | "metre" | "metres" => DistanceUnit::Meters,
        "mi" | "mile" | "miles" => DistanceUnit::Miles,
        other => {
            return Err(EvidenceError::Unparseable(format!(
                "unknown distance unit '{}' in '{}'",
                other, text
            )))
        }
    };

    Ok(Distance { value, unit })
}

const DATE_FORMATS: [&str; 10] = [
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%A, %B %d, %Y",
];

/// Parse a workout date. Numeric dates are day-first; `today` resolves
/// relative labels and year-less dates.
pub fn parse_date(text: &str, today: NaiveDate) -> Result<NaiveDate, EvidenceError> {
    let trimmed = text.trim();
    match trimmed.to_lowercase().as_str() {
        "today" | "hôm nay" => return Ok(today),
        "yesterday" | "hôm qua" => {
            return today
                .pred_opt()
                .ok_or_else(|| EvidenceError::Unparseable(format!("unparseable date '{}'", text)))
        }
        _ => {}
    }

    // Screens often append the time of day
    let date_part = trimmed
        .split(" at ")
        .next()
        .unwrap_or(trimmed)
        .trim()
        .trim_end_matches(',');

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Ok(date);
        }
    }

    // Year-less forms such as "May 21" or "21/05"
    let with_year = format!("{} {}", date_part, today.year());
    for format in ["%B %d %Y", "%b %d %Y", "%d/%m %Y", "%d %B %Y", "%d %b %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&with_year, format) {
            return Ok(date);
        }
    }

    Err(EvidenceError::Unparseable(format!("unparseable date '{}'", text)))
}

/// Turn raw model output into strict workout facts.
pub fn parse_workout(raw: &str, today: NaiveDate) -> Result<WorkoutFacts, EvidenceError> {
    let value = repair_json(raw)?;
    let loose: LooseFacts = serde_json::from_value(value)
        .map_err(|e| EvidenceError::Unparseable(format!("unexpected workout shape: {}", e)))?;

    let date_text = as_text(loose.date)
        .ok_or_else(|| EvidenceError::Unparseable("workout has no date".to_string()))?;
    let distance_text = as_text(loose.distance)
        .ok_or_else(|| EvidenceError::Unparseable("workout has no distance".to_string()))?;

    Ok(WorkoutFacts {
        date: parse_date(&date_text, today)?,
        distance: parse_distance(&distance_text)?,
        duration: as_text(loose.duration),
        velocity: as_text(loose.velocity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn may_21() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 21).unwrap()
    }

    #[test]
    fn repairs_fenced_output_with_trailing_comma() {
        let raw = "Sure!\n```json\n{\n  \"date\": \"21/05/2025\",\n  \"distance\": \"3.1 km\",\n}\n```";
        let value = repair_json(raw).unwrap();
        assert_eq!(value["distance"], "3.1 km");
    }

    #[test]
    fn rejects_output_without_object() {
        assert!(matches!(repair_json("I cannot read this image"), Err(EvidenceError::Unparseable(_))));
        assert!(repair_json("{ not json }").is_err());
    }

    #[test]
    fn parses_distances() {
        assert_eq!(
            parse_distance("3,25 km").unwrap(),
            Distance { value: 3.25, unit: DistanceUnit::Kilometers }
        );
        assert_eq!(parse_distance("800 m").unwrap().unit, DistanceUnit::Meters);
        assert_eq!(parse_distance("2 Miles").unwrap().unit, DistanceUnit::Miles);
        assert!(parse_distance("far").is_err());
        assert!(parse_distance("3 furlongs").is_err());
    }

    #[test]
    fn kilometer_meters_only_for_km() {
        let km = Distance { value: 1.2346, unit: DistanceUnit::Kilometers };
        assert_eq!(km.kilometer_meters(), Some(1235));
        let mi = Distance { value: 2.0, unit: DistanceUnit::Miles };
        assert_eq!(mi.kilometer_meters(), None);
    }

    #[test]
    fn parses_common_date_shapes() {
        let today = may_21();
        for text in ["21/05/2025", "2025-05-21", "May 21, 2025", "21 May 2025", "Today", "May 21"] {
            assert_eq!(parse_date(text, today).unwrap(), today, "{}", text);
        }
        assert_eq!(
            parse_date("Wednesday, May 21, 2025 at 6:04 AM", today).unwrap(),
            today
        );
        assert_eq!(parse_date("yesterday", today).unwrap(), today.pred_opt().unwrap());
        assert!(parse_date("sometime", today).is_err());
    }

    #[test]
    fn parse_workout_accepts_numbers_for_strings() {
        let raw = r#"{"date": "21/05/2025", "distance": "2.5 km", "duration": "00:15:00", "velocity": 10}"#;
        let facts = parse_workout(raw, may_21()).unwrap();
        assert_eq!(facts.date, may_21());
        assert_eq!(facts.distance.kilometer_meters(), Some(2500));
        assert_eq!(facts.velocity.as_deref(), Some("10"));
    }

    #[test]
    fn parse_workout_requires_date_and_distance() {
        assert!(parse_workout(r#"{"distance": "3 km"}"#, may_21()).is_err());
        assert!(parse_workout(r#"{"date": "21/05/2025", "distance": null}"#, may_21()).is_err());
    }
}
