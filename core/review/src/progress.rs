//! Progress and scheduling queries.
//!
//! These are passive reads: they never create sessions. A period is pending
//! when it lies entirely before the current period, has at least one
//! eligible note and not every eligible note has a decision.

use chrono::{DateTime, Utc};
use curation_layer_schemas::{PendingCounts, ReviewSession, ReviewType, SessionId, SessionStatus};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::database::Database;
use crate::eligibility;
use crate::error::{Result, ReviewError};
use crate::period::{Period, PeriodCalendar};

/// Derived state of one past period
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodProgress {
    pub review_type: ReviewType,
    pub period: Period,
    pub period_key: String,
    pub starts_at: DateTime<Utc>,
    pub eligible: u32,
    pub decided: u32,
    pub session_id: Option<SessionId>,
    pub status: SessionStatus,
}

impl PeriodProgress {
    pub fn fraction(&self) -> f64 {
        if self.eligible == 0 {
            1.0
        } else {
            f64::from(self.decided) / f64::from(self.eligible)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.eligible > 0 && self.decided < self.eligible
    }
}

pub struct ProgressTracker {
    calendar: PeriodCalendar,
}

impl ProgressTracker {
    pub fn new(calendar: PeriodCalendar) -> Self {
        Self { calendar }
    }

    /// `notes_reviewed / total_notes` of a stored session
    pub fn session_progress(&self, db: &Database, session_id: &SessionId) -> Result<f64> {
        let session = db
            .get_session(session_id)?
            .ok_or_else(|| ReviewError::SessionNotFound(session_id.clone()))?;
        Ok(progress_fraction(&session))
    }

    /// True once the period has fully elapsed relative to `now`
    pub fn is_reviewable(&self, period_key: &str, review_type: ReviewType, now: DateTime<Utc>) -> bool {
        let range = match self.calendar.period_date_range(period_key, review_type) {
            Ok(range) => range,
            Err(e) => {
                warn!("Not reviewable, bad {} key '{}': {}", review_type, period_key, e);
                return false;
            }
        };

        match self.current_start(review_type, now) {
            Some(current_start) => range.end <= current_start,
            None => false,
        }
    }

    /// Every past period that still has undecided notes, oldest first
    pub fn backlog(
        &self,
        db: &Database,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<Vec<PeriodProgress>> {
        let current_start = match self.current_start(review_type, now) {
            Some(start) => start,
            None => return Ok(Vec::new()),
        };

        db.read(|db| {
            let cohorts = eligibility::cohorts_before(db, &self.calendar, review_type, current_start)?;
            let sessions: HashMap<String, ReviewSession> = db
                .list_sessions(Some(review_type))?
                .into_iter()
                .map(|session| (session.period_key.clone(), session))
                .collect();

            let mut pending = Vec::new();
            for (period, cohort) in cohorts {
                let starts_at = match self.calendar.range(&period) {
                    Ok(range) => range.start,
                    Err(e) => {
                        warn!("Skipping {} period {}: {}", review_type, period, e);
                        continue;
                    }
                };
                let key = period.key();
                let session = sessions.get(&key);

                let progress = PeriodProgress {
                    review_type,
                    period,
                    period_key: key,
                    starts_at,
                    eligible: cohort.eligible,
                    decided: cohort.decided,
                    session_id: session.map(|s| s.id.clone()),
                    status: session.map(|s| s.status).unwrap_or(SessionStatus::NotStarted),
                };
                if progress.is_pending() {
                    pending.push(progress);
                }
            }

            debug!("{} {} periods pending", pending.len(), review_type);
            Ok(pending)
        })
    }

    pub fn pending_review_count(
        &self,
        db: &Database,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        Ok(self.backlog(db, review_type, now)?.len() as u32)
    }

    pub fn pending_counts(&self, db: &Database, now: DateTime<Utc>) -> Result<PendingCounts> {
        db.read(|db| {
            Ok(PendingCounts {
                weekly: self.pending_review_count(db, ReviewType::Weekly, now)?,
                monthly: self.pending_review_count(db, ReviewType::Monthly, now)?,
                yearly: self.pending_review_count(db, ReviewType::Yearly, now)?,
            })
        })
    }

    /// Oldest pending period of one review type
    pub fn next_actionable_target(
        &self,
        db: &Database,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<Option<PeriodProgress>> {
        Ok(self.backlog(db, review_type, now)?.into_iter().next())
    }

    /// Oldest pending period of any review type; weekly wins ties
    pub fn next_actionable_any(
        &self,
        db: &Database,
        now: DateTime<Utc>,
    ) -> Result<Option<PeriodProgress>> {
        db.read(|db| {
            let mut best: Option<PeriodProgress> = None;
            for review_type in ReviewType::ALL {
                if let Some(candidate) = self.next_actionable_target(db, review_type, now)? {
                    let better = match &best {
                        Some(current) => {
                            (candidate.starts_at, candidate.review_type)
                                < (current.starts_at, current.review_type)
                        }
                        None => true,
                    };
                    if better {
                        best = Some(candidate);
                    }
                }
            }
            Ok(best)
        })
    }

    fn current_start(&self, review_type: ReviewType, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let current = self.calendar.current_period(review_type, now);
        match self.calendar.range(&current) {
            Ok(range) => Some(range.start),
            Err(e) => {
                warn!("No current {} period for {}: {}", review_type, now, e);
                None
            }
        }
    }
}

pub fn progress_fraction(session: &ReviewSession) -> f64 {
    session.progress_fraction()
}
