//! Shared utility functions used across the codebase.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Source of "now" in the supervisor's timezone.
///
/// Every check resolves "today" through a clock so tests can pin the date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn offset(&self) -> FixedOffset {
        *self.now().offset()
    }
}

/// Wall clock evaluated in a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// `dd/mm/yyyy`, the header format of a day section.
pub fn day_label(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// `mm/yyyy`, the key of the monthly outline page.
pub fn month_key(date: NaiveDate) -> String {
    format!("{:02}/{}", date.month(), date.year())
}

#[cfg(test)]
pub(crate) fn fixed_clock(y: i32, m: u32, d: u32, h: u32) -> FixedClock {
    use chrono::TimeZone;
    let offset = FixedOffset::east_opt(7 * 3600).unwrap();
    FixedClock(offset.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
}
