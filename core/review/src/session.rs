//! Review session lifecycle.
//!
//! A session is created on first start for a `(review_type, period_key)` and
//! resumed on every later start. Decisions are recorded one note at a time;
//! each is a single IMMEDIATE transaction covering the action row, the note's
//! review state and the session counters.

use chrono::{DateTime, Utc};
use curation_layer_schemas::{
    generate_action_id, generate_session_id, Decision, Note, NoteId, ReviewAction,
    ReviewHistoryEntry, ReviewSession, ReviewTier, ReviewType, SessionId, SessionStatus,
};
use tracing::{debug, info, warn};

use crate::config::ReopenPolicy;
use crate::database::{stamp, Database};
use crate::eligibility;
use crate::error::{Result, ReviewError};
use crate::period::{Period, PeriodCalendar, PeriodRange};

pub struct SessionManager {
    calendar: PeriodCalendar,
    reopen_policy: ReopenPolicy,
}

impl SessionManager {
    pub fn new(calendar: PeriodCalendar, reopen_policy: ReopenPolicy) -> Self {
        Self {
            calendar,
            reopen_policy,
        }
    }

    pub fn calendar(&self) -> &PeriodCalendar {
        &self.calendar
    }

    pub fn reopen_policy(&self) -> ReopenPolicy {
        self.reopen_policy
    }

    /// Create the session for a period or resume the existing one.
    ///
    /// On resume the counters are recounted from recorded actions and the
    /// total is refreshed from the current cohort, never dropping below the
    /// reviewed count.
    pub fn start_or_resume(
        &self,
        db: &Database,
        period_key: &str,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        let period = self.calendar.parse(period_key, review_type)?;
        let range = self.calendar.range(&period)?;
        let key = period.key();
        let now = stamp(now);

        db.write(|db| {
            let eligible = eligibility::eligible_count(db, review_type, &period, &range)?;

            match db.find_session(review_type, &key)? {
                Some(mut session) => {
                    let (kept, archived) = db.decision_counts(&session.id)?;
                    if kept != session.notes_kept || archived != session.notes_archived {
                        warn!(
                            "Session {} counters drifted (kept {} -> {}, archived {} -> {}), recounting",
                            session.id, session.notes_kept, kept, session.notes_archived, archived
                        );
                    }
                    session.notes_kept = kept;
                    session.notes_archived = archived;
                    session.notes_reviewed = kept + archived;
                    session.total_notes = eligible.max(session.notes_reviewed);

                    self.settle(&mut session, now);
                    db.update_session(&session)?;

                    debug!(
                        "Resumed {} session {} for {} ({}/{})",
                        review_type, session.id, key, session.notes_reviewed, session.total_notes
                    );
                    Ok(session)
                }
                None => {
                    let session = ReviewSession {
                        id: generate_session_id(),
                        review_type,
                        period_key: key.clone(),
                        status: SessionStatus::InProgress,
                        total_notes: eligible,
                        notes_reviewed: 0,
                        notes_kept: 0,
                        notes_archived: 0,
                        started_at: now,
                        completed_at: None,
                    };
                    db.insert_session(&session)?;

                    info!(
                        "Started {} review {} with {} notes: {}",
                        review_type, key, eligible, session.id
                    );
                    Ok(session)
                }
            }
        })
    }

    /// Record or revise the decision for one note.
    ///
    /// A revision first restores the note to its pre-session snapshot and
    /// backs out the old counter, so only the latest decision is in effect.
    pub fn submit_decision(
        &self,
        db: &Database,
        session_id: &SessionId,
        note_id: &NoteId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        let now = stamp(now);

        db.write(|db| {
            let mut session = db
                .get_session(session_id)?
                .ok_or_else(|| ReviewError::SessionNotFound(session_id.clone()))?;
            let mut note = db
                .get_note(note_id)?
                .ok_or_else(|| ReviewError::InvalidNote(note_id.clone()))?;
            let (period, range) = self.session_range(&session)?;

            let existing = db.get_action(&session.id, &note.id)?;
            if !eligibility::is_candidate(&note, session.review_type, &range, existing.is_some()) {
                return Err(ReviewError::InvalidNote(note.id.clone()));
            }

            match existing {
                Some(mut action) => {
                    let expected = after_decision(action.decision, action.prior_tier);
                    if (note.review_tier, note.archived) != expected {
                        warn!(
                            "Note {} changed since it was decided in session {}, revision restores the snapshot",
                            note.id, session.id
                        );
                    }

                    take_counter(&mut session, action.decision);
                    note.review_tier = action.prior_tier;
                    note.archived = action.prior_archived;

                    action.decision = decision;
                    action.decided_at = now;
                    db.update_action_decision(&action)?;
                }
                None => {
                    if session.is_completed() && session.notes_reviewed >= session.total_notes {
                        return Err(ReviewError::SessionClosed(session.id.clone()));
                    }

                    db.insert_action(&ReviewAction {
                        id: generate_action_id(),
                        session_id: session.id.clone(),
                        note_id: note.id.clone(),
                        decision,
                        decided_at: now,
                        prior_tier: note.review_tier,
                        prior_archived: note.archived,
                    })?;

                    session.notes_reviewed += 1;
                    if session.notes_reviewed > session.total_notes {
                        // Note joined the cohort after the last refresh
                        let eligible =
                            eligibility::eligible_count(db, session.review_type, &period, &range)?;
                        session.total_notes = eligible.max(session.notes_reviewed);
                    }
                }
            }

            match decision {
                Decision::Kept => {
                    note.review_tier = note.review_tier.promoted();
                    note.archived = false;
                    session.notes_kept += 1;
                }
                Decision::Archived => {
                    note.archived = true;
                    session.notes_archived += 1;
                }
            }
            note.last_reviewed_at = Some(now);
            note.updated_at = now;
            db.write_review_state(&note)?;

            self.settle(&mut session, now);
            db.update_session(&session)?;

            debug!(
                "Note {} {} in session {} ({}/{})",
                note.id,
                decision.as_str(),
                session.id,
                session.notes_reviewed,
                session.total_notes
            );
            Ok(session)
        })
    }

    /// Withdraw a decision: restore the snapshot, drop the action and reopen
    /// the session if it no longer has every note decided.
    pub fn clear_decision(
        &self,
        db: &Database,
        session_id: &SessionId,
        note_id: &NoteId,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        let now = stamp(now);

        db.write(|db| {
            let mut session = db
                .get_session(session_id)?
                .ok_or_else(|| ReviewError::SessionNotFound(session_id.clone()))?;
            let action = db
                .get_action(&session.id, note_id)?
                .ok_or_else(|| ReviewError::InvalidNote(note_id.clone()))?;
            let mut note = db
                .get_note(note_id)?
                .ok_or_else(|| ReviewError::InvalidNote(note_id.clone()))?;

            take_counter(&mut session, action.decision);
            session.notes_reviewed = session.notes_kept + session.notes_archived;

            note.review_tier = action.prior_tier;
            note.archived = action.prior_archived;
            note.updated_at = now;
            db.delete_action(&action.id)?;
            db.write_review_state(&note)?;

            if session.is_completed() && session.notes_reviewed < session.total_notes {
                session.status = SessionStatus::InProgress;
                session.completed_at = None;
                info!("Reopened session {} after clearing note {}", session.id, note.id);
            }
            db.update_session(&session)?;

            debug!("Cleared decision for note {} in session {}", note.id, session.id);
            Ok(session)
        })
    }

    /// Current cohort of a session, oldest note first
    pub fn session_notes(&self, db: &Database, session_id: &SessionId) -> Result<Vec<Note>> {
        db.read(|db| {
            let session = db
                .get_session(session_id)?
                .ok_or_else(|| ReviewError::SessionNotFound(session_id.clone()))?;
            let (period, range) = self.session_range(&session)?;
            eligibility::eligible_notes(db, session.review_type, &period, &range)
        })
    }

    pub fn note_history(&self, db: &Database, note_id: &NoteId) -> Result<Vec<ReviewHistoryEntry>> {
        db.read(|db| {
            if db.get_note(note_id)?.is_none() {
                return Err(ReviewError::InvalidNote(note_id.clone()));
            }
            db.note_history(note_id)
        })
    }

    fn session_range(&self, session: &ReviewSession) -> Result<(Period, PeriodRange)> {
        let period = self.calendar.parse(&session.period_key, session.review_type)?;
        let range = self.calendar.range(&period)?;
        Ok((period, range))
    }

    /// Completion trigger, plus the configured reaction to a completed
    /// session falling behind its total again
    fn settle(&self, session: &mut ReviewSession, now: DateTime<Utc>) {
        if session.total_notes > 0 && session.notes_reviewed >= session.total_notes {
            if !session.is_completed() {
                session.status = SessionStatus::Completed;
                session.completed_at = Some(now);
                info!(
                    "Completed {} review {}: {} kept, {} archived",
                    session.review_type, session.period_key, session.notes_kept, session.notes_archived
                );
            }
        } else if session.is_completed() && self.reopen_policy == ReopenPolicy::Reopen {
            session.status = SessionStatus::InProgress;
            session.completed_at = None;
            info!(
                "Reopened session {} ({}/{})",
                session.id, session.notes_reviewed, session.total_notes
            );
        }
    }
}

fn take_counter(session: &mut ReviewSession, decision: Decision) {
    match decision {
        Decision::Kept => session.notes_kept = session.notes_kept.saturating_sub(1),
        Decision::Archived => session.notes_archived = session.notes_archived.saturating_sub(1),
    }
}

/// Tier and archived flag a decision leaves behind from the given snapshot
fn after_decision(decision: Decision, prior_tier: ReviewTier) -> (ReviewTier, bool) {
    match decision {
        Decision::Kept => (prior_tier.promoted(), false),
        Decision::Archived => (prior_tier, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use curation_layer_schemas::NewNote;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, day, 9, 30, 0).unwrap()
    }

    fn setup() -> (Database, SessionManager) {
        (
            Database::open_in_memory().unwrap(),
            SessionManager::new(PeriodCalendar::default(), ReopenPolicy::KeepCompleted),
        )
    }

    #[test]
    fn test_start_creates_then_resumes() {
        let (db, manager) = setup();
        db.create_note(&NewNote::new("one").created_at(at(25))).unwrap();
        db.create_note(&NewNote::new("two").created_at(at(26))).unwrap();

        let first = manager
            .start_or_resume(&db, "2024-W48", ReviewType::Weekly, at(30))
            .unwrap();
        assert_eq!(first.status, SessionStatus::InProgress);
        assert_eq!(first.total_notes, 2);

        let again = manager
            .start_or_resume(&db, "2024-W48", ReviewType::Weekly, at(30))
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(db.list_sessions(None).unwrap().len(), 1);
    }

    #[test]
    fn test_start_rejects_bad_key() {
        let (db, manager) = setup();
        let err = manager
            .start_or_resume(&db, "2024-11", ReviewType::Weekly, at(30))
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidPeriod(_)));
        assert!(db.list_sessions(None).unwrap().is_empty());
    }

    #[test]
    fn test_revision_restores_snapshot() {
        let (db, manager) = setup();
        let note = db.create_note(&NewNote::new("flip").created_at(at(25))).unwrap();
        db.create_note(&NewNote::new("other").created_at(at(26))).unwrap();
        let session = manager
            .start_or_resume(&db, "2024-W48", ReviewType::Weekly, at(30))
            .unwrap();

        manager
            .submit_decision(&db, &session.id, &note.id, Decision::Kept, at(30))
            .unwrap();
        let stored = db.get_note(&note.id).unwrap().unwrap();
        assert_eq!(stored.review_tier, ReviewTier::Weekly);

        let session = manager
            .submit_decision(&db, &session.id, &note.id, Decision::Archived, at(30))
            .unwrap();
        let stored = db.get_note(&note.id).unwrap().unwrap();
        assert_eq!(stored.review_tier, ReviewTier::Daily);
        assert!(stored.archived);
        assert_eq!(
            (session.notes_reviewed, session.notes_kept, session.notes_archived),
            (1, 0, 1)
        );
        assert!(session.counters_consistent());
    }

    #[test]
    fn test_unknown_session_and_foreign_note() {
        let (db, manager) = setup();
        let inside = db.create_note(&NewNote::new("in").created_at(at(25))).unwrap();
        let outside = db.create_note(&NewNote::new("out").created_at(at(4))).unwrap();
        let session = manager
            .start_or_resume(&db, "2024-W48", ReviewType::Weekly, at(30))
            .unwrap();

        let missing = SessionId("rs_missing".to_string());
        assert!(matches!(
            manager.submit_decision(&db, &missing, &inside.id, Decision::Kept, at(30)),
            Err(ReviewError::SessionNotFound(_))
        ));
        assert!(matches!(
            manager.submit_decision(&db, &session.id, &outside.id, Decision::Kept, at(30)),
            Err(ReviewError::InvalidNote(_))
        ));

        let untouched = db.get_note(&outside.id).unwrap().unwrap();
        assert_eq!(untouched, outside);
    }

    #[test]
    fn test_clear_decision_reopens() {
        let (db, manager) = setup();
        let note = db.create_note(&NewNote::new("only").created_at(at(25))).unwrap();
        let session = manager
            .start_or_resume(&db, "2024-W48", ReviewType::Weekly, at(30))
            .unwrap();

        let done = manager
            .submit_decision(&db, &session.id, &note.id, Decision::Kept, at(30))
            .unwrap();
        assert!(done.is_completed());

        let cleared = manager
            .clear_decision(&db, &session.id, &note.id, at(30))
            .unwrap();
        assert_eq!(cleared.status, SessionStatus::InProgress);
        assert_eq!(cleared.completed_at, None);
        assert_eq!(cleared.notes_reviewed, 0);

        let restored = db.get_note(&note.id).unwrap().unwrap();
        assert_eq!(restored.review_tier, ReviewTier::Daily);
        assert!(db.get_action(&session.id, &note.id).unwrap().is_none());

        assert!(matches!(
            manager.clear_decision(&db, &session.id, &note.id, at(30)),
            Err(ReviewError::InvalidNote(_))
        ));
    }
}
