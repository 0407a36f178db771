use chrono::{FixedOffset, Offset, Utc, Weekday};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ReviewError};
use crate::period::PeriodCalendar;

/// What happens to a completed session whose reviewed count falls below its
/// total again (new notes joined the cohort, or a decision was cleared).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReopenPolicy {
    /// Completion is sticky; remaining notes can still be decided
    #[default]
    KeepCompleted,
    /// Status returns to in-progress and `completed_at` is cleared
    Reopen,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub week_start: Weekday,
    pub utc_offset: FixedOffset,
    pub reopen_policy: ReopenPolicy,
    pub busy_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            week_start: Weekday::Mon,
            utc_offset: Utc.fix(),
            reopen_policy: ReopenPolicy::KeepCompleted,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `REVIEW_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("REVIEW_DB_PATH").filter(|p| !p.trim().is_empty()) {
            config.db_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup("REVIEW_WEEK_START") {
            config.week_start = parse_weekday(&raw).ok_or_else(|| {
                ReviewError::Config(format!("REVIEW_WEEK_START: unknown weekday '{}'", raw))
            })?;
        }

        if let Some(raw) = lookup("REVIEW_UTC_OFFSET_MINUTES") {
            let minutes: i32 = raw.trim().parse().map_err(|_| {
                ReviewError::Config(format!("REVIEW_UTC_OFFSET_MINUTES: not an integer '{}'", raw))
            })?;
            config.utc_offset = minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| {
                    ReviewError::Config(format!("REVIEW_UTC_OFFSET_MINUTES: out of range {}", minutes))
                })?;
        }

        if let Some(raw) = lookup("REVIEW_REOPEN_ON_REVISION") {
            config.reopen_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => ReopenPolicy::Reopen,
                "0" | "false" | "no" => ReopenPolicy::KeepCompleted,
                other => {
                    return Err(ReviewError::Config(format!(
                        "REVIEW_REOPEN_ON_REVISION: expected true/false, got '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(raw) = lookup("REVIEW_BUSY_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                ReviewError::Config(format!("REVIEW_BUSY_TIMEOUT_MS: not an integer '{}'", raw))
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn calendar(&self) -> PeriodCalendar {
        PeriodCalendar::new(self.week_start, self.utc_offset)
    }

    pub fn with_reopen_policy(mut self, policy: ReopenPolicy) -> Self {
        self.reopen_policy = policy;
        self
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }
}

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(format!("{}/.local/share/CurationLayer/notes.db", home))
}

pub fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}
