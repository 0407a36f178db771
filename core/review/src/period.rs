//! Calendar periods for each review cadence.
//!
//! A period key names one concrete week, month or year:
//! `2024-W48`, `2024-11`, `2024`. Keys are parsed back into half-open UTC
//! ranges so that every instant inside a range maps to the same key.
//!
//! Weeks follow ISO-8601 numbering generalised to a configurable first day
//! of the week: the week-year is the year of the week's fourth day, and
//! week 1 is the week containing January 4th.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use curation_layer_schemas::ReviewType;
use regex::Regex;
use std::fmt;
use thiserror::Error;

const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("malformed period key '{0}'")]
    Malformed(String),

    #[error("week {week} out of range for {year} (1..={max})")]
    WeekOutOfRange { year: i32, week: u32, max: u32 },

    #[error("month {0} out of range")]
    MonthOutOfRange(u32),

    #[error("year {0} out of range")]
    YearOutOfRange(i32),
}

/// One calendar instance of a review cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
    Year { year: i32 },
}

impl Period {
    pub fn review_type(&self) -> ReviewType {
        match self {
            Period::Week { .. } => ReviewType::Weekly,
            Period::Month { .. } => ReviewType::Monthly,
            Period::Year { .. } => ReviewType::Yearly,
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Period::Week { year, week } => write!(f, "{:04}-W{:02}", year, week),
            Period::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            Period::Year { year } => write!(f, "{:04}", year),
        }
    }
}

/// Half-open `[start, end)` interval of instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Maps instants to periods and back.
///
/// The UTC offset decides which local calendar day an instant falls on.
#[derive(Debug, Clone)]
pub struct PeriodCalendar {
    week_start: Weekday,
    offset: FixedOffset,
    weekly_pattern: Regex,
    monthly_pattern: Regex,
    yearly_pattern: Regex,
}

impl Default for PeriodCalendar {
    fn default() -> Self {
        Self::new(Weekday::Mon, Utc.fix())
    }
}

impl PeriodCalendar {
    pub fn new(week_start: Weekday, offset: FixedOffset) -> Self {
        Self {
            week_start,
            offset,
            weekly_pattern: Regex::new(r"^(\d{4})-W(\d{2})$").unwrap(),
            monthly_pattern: Regex::new(r"^(\d{4})-(\d{2})$").unwrap(),
            yearly_pattern: Regex::new(r"^(\d{4})$").unwrap(),
        }
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date of an instant
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Period of the given cadence containing `at`
    pub fn period_of(&self, at: DateTime<Utc>, review_type: ReviewType) -> Period {
        let date = self.local_date(at);
        match review_type {
            ReviewType::Weekly => {
                let anchor = self.week_start_of(date) + Duration::days(3);
                Period::Week {
                    year: anchor.year(),
                    week: anchor.ordinal0() / 7 + 1,
                }
            }
            ReviewType::Monthly => Period::Month {
                year: date.year(),
                month: date.month(),
            },
            ReviewType::Yearly => Period::Year { year: date.year() },
        }
    }

    pub fn period_key(&self, at: DateTime<Utc>, review_type: ReviewType) -> String {
        self.period_of(at, review_type).key()
    }

    pub fn current_period(&self, review_type: ReviewType, now: DateTime<Utc>) -> Period {
        self.period_of(now, review_type)
    }

    pub fn current_period_key(&self, review_type: ReviewType, now: DateTime<Utc>) -> String {
        self.period_key(now, review_type)
    }

    /// Parse and validate a key for the given review type
    pub fn parse(&self, key: &str, review_type: ReviewType) -> Result<Period, PeriodError> {
        let key = key.trim();
        let malformed = || PeriodError::Malformed(key.to_string());

        let period = match review_type {
            ReviewType::Weekly => {
                let caps = self.weekly_pattern.captures(key).ok_or_else(malformed)?;
                Period::Week {
                    year: caps[1].parse().map_err(|_| malformed())?,
                    week: caps[2].parse().map_err(|_| malformed())?,
                }
            }
            ReviewType::Monthly => {
                let caps = self.monthly_pattern.captures(key).ok_or_else(malformed)?;
                Period::Month {
                    year: caps[1].parse().map_err(|_| malformed())?,
                    month: caps[2].parse().map_err(|_| malformed())?,
                }
            }
            ReviewType::Yearly => {
                let caps = self.yearly_pattern.captures(key).ok_or_else(malformed)?;
                Period::Year {
                    year: caps[1].parse().map_err(|_| malformed())?,
                }
            }
        };

        self.validate(&period)?;
        Ok(period)
    }

    /// Bounds of a period as UTC instants
    pub fn range(&self, period: &Period) -> Result<PeriodRange, PeriodError> {
        self.validate(period)?;

        let (start, end) = match *period {
            Period::Week { year, week } => {
                let start = self.week_one_start(year) + Duration::weeks(i64::from(week) - 1);
                (start, start + Duration::weeks(1))
            }
            Period::Month { year, month } => {
                let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
                (
                    ymd(year, month, 1).ok_or(PeriodError::MonthOutOfRange(month))?,
                    ymd(next_year, next_month, 1).ok_or(PeriodError::YearOutOfRange(next_year))?,
                )
            }
            Period::Year { year } => (
                ymd(year, 1, 1).ok_or(PeriodError::YearOutOfRange(year))?,
                ymd(year + 1, 1, 1).ok_or(PeriodError::YearOutOfRange(year + 1))?,
            ),
        };

        Ok(PeriodRange {
            start: self.local_midnight(start),
            end: self.local_midnight(end),
        })
    }

    pub fn period_date_range(
        &self,
        key: &str,
        review_type: ReviewType,
    ) -> Result<PeriodRange, PeriodError> {
        let period = self.parse(key, review_type)?;
        self.range(&period)
    }

    /// The period immediately after, or None past the supported years
    pub fn next(&self, period: &Period) -> Option<Period> {
        let next = match *period {
            Period::Week { year, week } => {
                if week < self.weeks_in_year(year)? {
                    Period::Week { year, week: week + 1 }
                } else {
                    Period::Week { year: year + 1, week: 1 }
                }
            }
            Period::Month { year, month } if month == 12 => Period::Month { year: year + 1, month: 1 },
            Period::Month { year, month } => Period::Month { year, month: month + 1 },
            Period::Year { year } => Period::Year { year: year + 1 },
        };
        self.validate(&next).ok().map(|_| next)
    }

    /// The period immediately before, or None before the supported years
    pub fn previous(&self, period: &Period) -> Option<Period> {
        let previous = match *period {
            Period::Week { year, week } if week > 1 => Period::Week { year, week: week - 1 },
            Period::Week { year, .. } => Period::Week {
                year: year - 1,
                week: self.weeks_in_year(year - 1)?,
            },
            Period::Month { year, month } if month == 1 => Period::Month { year: year - 1, month: 12 },
            Period::Month { year, month } => Period::Month { year, month: month - 1 },
            Period::Year { year } => Period::Year { year: year - 1 },
        };
        self.validate(&previous).ok().map(|_| previous)
    }

    /// 52 or 53 depending on the year and the first day of week
    pub fn weeks_in_year(&self, year: i32) -> Option<u32> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return None;
        }
        let this_year = self.week_one_start(year);
        let next_year = self.week_one_start(year + 1);
        Some(((next_year - this_year).num_days() / 7) as u32)
    }

    fn validate(&self, period: &Period) -> Result<(), PeriodError> {
        let year = match *period {
            Period::Week { year, .. } | Period::Month { year, .. } | Period::Year { year } => year,
        };
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(PeriodError::YearOutOfRange(year));
        }

        match *period {
            Period::Week { year, week } => {
                let max = self.weeks_in_year(year).ok_or(PeriodError::YearOutOfRange(year))?;
                if week == 0 || week > max {
                    return Err(PeriodError::WeekOutOfRange { year, week, max });
                }
            }
            Period::Month { month, .. } => {
                if !(1..=12).contains(&month) {
                    return Err(PeriodError::MonthOutOfRange(month));
                }
            }
            Period::Year { .. } => {}
        }
        Ok(())
    }

    fn week_start_of(&self, date: NaiveDate) -> NaiveDate {
        let back = (7 + date.weekday().num_days_from_monday()
            - self.week_start.num_days_from_monday())
            % 7;
        date - Duration::days(i64::from(back))
    }

    fn week_one_start(&self, year: i32) -> NaiveDate {
        // January 4th always lies in week 1
        let jan_fourth = NaiveDate::from_yo_opt(year, 4).unwrap_or(NaiveDate::MIN);
        self.week_start_of(jan_fourth)
    }

    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(self.offset.local_minus_utc()))))
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}
