//! `ReviewEngine`: the single entry point for callers.
//!
//! Methods without a suffix use the wall clock. The `_at` variants take the
//! instant explicitly and are what tests and replays call.

use chrono::{DateTime, Utc};
use curation_layer_schemas::{
    Decision, NewNote, Note, NoteId, PendingCounts, ReviewHistoryEntry, ReviewSession,
    ReviewType, SessionId,
};
use std::io::Write;
use tracing::info;

use crate::config::EngineConfig;
use crate::database::{Database, NotePatch, NoteQuery};
use crate::deck::ReviewDeck;
use crate::error::{Result, ReviewError};
use crate::export::{self, ExportDocument};
use crate::period::PeriodCalendar;
use crate::progress::{PeriodProgress, ProgressTracker};
use crate::session::SessionManager;

pub struct ReviewEngine {
    db: Database,
    config: EngineConfig,
    sessions: SessionManager,
    progress: ProgressTracker,
}

impl ReviewEngine {
    /// Open the database named by the configuration
    pub fn open(config: EngineConfig) -> Result<Self> {
        let db = Database::with_busy_timeout(&config.db_path, config.busy_timeout)?;
        Ok(Self::with_database(db, config))
    }

    pub fn with_database(db: Database, config: EngineConfig) -> Self {
        let calendar = config.calendar();
        info!(
            "Review engine ready (week starts {:?}, offset {}, {:?})",
            calendar.week_start(),
            calendar.offset(),
            config.reopen_policy
        );

        Self {
            db,
            sessions: SessionManager::new(calendar.clone(), config.reopen_policy),
            progress: ProgressTracker::new(calendar),
            config,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calendar(&self) -> &PeriodCalendar {
        self.sessions.calendar()
    }

    // ========== NOTES ==========

    pub fn create_note(&self, new_note: &NewNote) -> Result<Note> {
        self.db.create_note(new_note)
    }

    pub fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        self.db.get_note(id)
    }

    pub fn query_notes(&self, query: &NoteQuery) -> Result<Vec<Note>> {
        self.db.query_notes(query)
    }

    pub fn update_note(&self, id: &NoteId, patch: &NotePatch) -> Result<Note> {
        self.db.update_note(id, patch)
    }

    pub fn delete_note(&self, id: &NoteId) -> Result<bool> {
        self.db.delete_note(id)
    }

    // ========== SESSIONS ==========

    pub fn start_or_resume_session(
        &self,
        period_key: &str,
        review_type: ReviewType,
    ) -> Result<ReviewSession> {
        self.start_or_resume_session_at(period_key, review_type, Utc::now())
    }

    pub fn start_or_resume_session_at(
        &self,
        period_key: &str,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        self.sessions
            .start_or_resume(&self.db, period_key, review_type, now)
    }

    pub fn submit_decision(
        &self,
        session_id: &SessionId,
        note_id: &NoteId,
        decision: Decision,
    ) -> Result<ReviewSession> {
        self.submit_decision_at(session_id, note_id, decision, Utc::now())
    }

    pub fn submit_decision_at(
        &self,
        session_id: &SessionId,
        note_id: &NoteId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        self.sessions
            .submit_decision(&self.db, session_id, note_id, decision, now)
    }

    pub fn clear_decision(&self, session_id: &SessionId, note_id: &NoteId) -> Result<ReviewSession> {
        self.clear_decision_at(session_id, note_id, Utc::now())
    }

    pub fn clear_decision_at(
        &self,
        session_id: &SessionId,
        note_id: &NoteId,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        self.sessions.clear_decision(&self.db, session_id, note_id, now)
    }

    pub fn get_session_notes(&self, session_id: &SessionId) -> Result<Vec<Note>> {
        self.sessions.session_notes(&self.db, session_id)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<ReviewSession>> {
        self.db.get_session(session_id)
    }

    pub fn find_session(
        &self,
        review_type: ReviewType,
        period_key: &str,
    ) -> Result<Option<ReviewSession>> {
        let key = self.calendar().parse(period_key, review_type)?.key();
        self.db.find_session(review_type, &key)
    }

    pub fn list_sessions(&self, review_type: Option<ReviewType>) -> Result<Vec<ReviewSession>> {
        self.db.list_sessions(review_type)
    }

    pub fn delete_session(&self, session_id: &SessionId) -> Result<bool> {
        self.db.delete_session(session_id)
    }

    pub fn note_history(&self, note_id: &NoteId) -> Result<Vec<ReviewHistoryEntry>> {
        self.sessions.note_history(&self.db, note_id)
    }

    /// Start or resume, then load the cohort and recorded decisions once
    pub fn open_deck(&self, period_key: &str, review_type: ReviewType) -> Result<ReviewDeck> {
        self.open_deck_at(period_key, review_type, Utc::now())
    }

    pub fn open_deck_at(
        &self,
        period_key: &str,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<ReviewDeck> {
        let session = self.start_or_resume_session_at(period_key, review_type, now)?;
        self.db.read(|db| {
            let notes = self.sessions.session_notes(db, &session.id)?;
            let actions = db.actions_for_session(&session.id)?;
            Ok(ReviewDeck::new(session, notes, &actions))
        })
    }

    /// Submit through a deck and mirror the result into it
    pub fn decide_in_deck(
        &self,
        deck: &mut ReviewDeck,
        note_id: &NoteId,
        decision: Decision,
    ) -> Result<ReviewSession> {
        self.decide_in_deck_at(deck, note_id, decision, Utc::now())
    }

    pub fn decide_in_deck_at(
        &self,
        deck: &mut ReviewDeck,
        note_id: &NoteId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        let session_id = deck.session().id.clone();
        let session = self.submit_decision_at(&session_id, note_id, decision, now)?;
        let note = self
            .db
            .get_note(note_id)?
            .ok_or_else(|| ReviewError::InvalidNote(note_id.clone()))?;
        deck.record(note, decision, session.clone());
        Ok(session)
    }

    pub fn clear_in_deck(&self, deck: &mut ReviewDeck, note_id: &NoteId) -> Result<ReviewSession> {
        self.clear_in_deck_at(deck, note_id, Utc::now())
    }

    /// Clear a decision and drop it from the deck
    pub fn clear_in_deck_at(
        &self,
        deck: &mut ReviewDeck,
        note_id: &NoteId,
        now: DateTime<Utc>,
    ) -> Result<ReviewSession> {
        let session_id = deck.session().id.clone();
        let session = self.clear_decision_at(&session_id, note_id, now)?;
        let note = self
            .db
            .get_note(note_id)?
            .ok_or_else(|| ReviewError::InvalidNote(note_id.clone()))?;
        deck.forget(note, session.clone());
        Ok(session)
    }

    // ========== PROGRESS ==========

    pub fn get_progress(&self, session_id: &SessionId) -> Result<f64> {
        self.progress.session_progress(&self.db, session_id)
    }

    pub fn is_reviewable(&self, period_key: &str, review_type: ReviewType) -> bool {
        self.is_reviewable_at(period_key, review_type, Utc::now())
    }

    pub fn is_reviewable_at(
        &self,
        period_key: &str,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> bool {
        self.progress.is_reviewable(period_key, review_type, now)
    }

    pub fn pending_review_count(&self, review_type: ReviewType) -> Result<u32> {
        self.progress
            .pending_review_count(&self.db, review_type, Utc::now())
    }

    pub fn pending_counts(&self) -> Result<PendingCounts> {
        self.pending_counts_at(Utc::now())
    }

    pub fn pending_counts_at(&self, now: DateTime<Utc>) -> Result<PendingCounts> {
        self.progress.pending_counts(&self.db, now)
    }

    pub fn pending_periods_at(
        &self,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<Vec<PeriodProgress>> {
        self.progress.backlog(&self.db, review_type, now)
    }

    pub fn next_actionable_target(&self, review_type: ReviewType) -> Result<Option<PeriodProgress>> {
        self.next_actionable_target_at(review_type, Utc::now())
    }

    pub fn next_actionable_target_at(
        &self,
        review_type: ReviewType,
        now: DateTime<Utc>,
    ) -> Result<Option<PeriodProgress>> {
        self.progress.next_actionable_target(&self.db, review_type, now)
    }

    pub fn next_actionable_any(&self) -> Result<Option<PeriodProgress>> {
        self.next_actionable_any_at(Utc::now())
    }

    pub fn next_actionable_any_at(&self, now: DateTime<Utc>) -> Result<Option<PeriodProgress>> {
        self.progress.next_actionable_any(&self.db, now)
    }

    // ========== EXPORT ==========

    pub fn export_snapshot(&self) -> Result<ExportDocument> {
        export::export_snapshot(&self.db, Utc::now())
    }

    pub fn export_json<W: Write>(&self, writer: W) -> Result<usize> {
        let document = self.export_snapshot()?;
        export::write_json(&document, writer)?;
        Ok(document.notes.len())
    }
}
