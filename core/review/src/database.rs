use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use curation_layer_schemas::{
    generate_note_id, ActionId, Decision, NewNote, Note, NoteId, ReviewAction,
    ReviewHistoryEntry, ReviewSession, ReviewTier, ReviewType, SessionId, SessionStatus,
    SourceType,
};
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, ReviewError};

pub(crate) const NOTE_COLUMNS: &str = "id, content, category, tags, source, source_type, \
     created_at, updated_at, review_tier, archived, last_reviewed_at";

const SESSION_COLUMNS: &str = "id, review_type, period_key, status, total_notes, notes_reviewed, \
     notes_kept, notes_archived, started_at, completed_at";

const ACTION_COLUMNS: &str =
    "id, session_id, note_id, decision, decided_at, prior_tier, prior_archived";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tier filter for note queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierFilter {
    Is(ReviewTier),
    IsNot(ReviewTier),
}

/// Predicate for `query_notes`. Unset fields do not filter.
///
/// Results are ordered by creation time, oldest first.
#[derive(Debug, Clone, Default)]
pub struct NoteQuery {
    pub tier: Option<TierFilter>,
    pub archived: Option<bool>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_before: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub source_type: Option<SourceType>,
    pub limit: Option<usize>,
}

impl NoteQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, tier: ReviewTier) -> Self {
        self.tier = Some(TierFilter::Is(tier));
        self
    }

    pub fn tier_not(mut self, tier: ReviewTier) -> Self {
        self.tier = Some(TierFilter::IsNot(tier));
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_before = Some(before);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        match self.tier {
            Some(TierFilter::Is(tier)) => {
                clauses.push("review_tier = ?");
                values.push(Value::Integer(tier.level()));
            }
            Some(TierFilter::IsNot(tier)) => {
                clauses.push("review_tier != ?");
                values.push(Value::Integer(tier.level()));
            }
            None => {}
        }
        if let Some(archived) = self.archived {
            clauses.push("archived = ?");
            values.push(Value::Integer(archived as i64));
        }
        if let Some(from) = self.created_from {
            clauses.push("created_at >= ?");
            values.push(Value::Text(encode_ts(&from)));
        }
        if let Some(before) = self.created_before {
            clauses.push("created_at < ?");
            values.push(Value::Text(encode_ts(&before)));
        }
        if let Some(ref category) = self.category {
            clauses.push("category = ?");
            values.push(Value::Text(category.clone()));
        }
        if let Some(ref tag) = self.tag {
            clauses.push("EXISTS (SELECT 1 FROM json_each(notes.tags) WHERE json_each.value = ?)");
            values.push(Value::Text(tag.clone()));
        }
        if let Some(ref source) = self.source {
            clauses.push("source = ?");
            values.push(Value::Text(source.clone()));
        }
        if let Some(ref source_type) = self.source_type {
            clauses.push("source_type = ?");
            values.push(Value::Text(source_type.as_str().to_string()));
        }

        let mut sql = format!("SELECT {} FROM notes", NOTE_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        (sql, values)
    }
}

/// Partial update of the user-editable note fields.
///
/// Tier, archived flag and review timestamps belong to the review engine.
#[derive(Debug, Clone, Default)]
pub struct NotePatch {
    pub content: Option<String>,
    pub category: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub source: Option<Option<String>>,
    pub source_type: Option<Option<SourceType>>,
}

impl NotePatch {
    fn apply(&self, note: &mut Note) {
        if let Some(ref content) = self.content {
            note.content = content.clone();
        }
        if let Some(ref category) = self.category {
            note.category = category.clone();
        }
        if let Some(ref tags) = self.tags {
            note.tags = tags.clone();
        }
        if let Some(ref source) = self.source {
            note.source = source.clone();
        }
        if let Some(ref source_type) = self.source_type {
            note.source_type = source_type.clone();
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and initialize the schema
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized at: {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, used by tests and throwaway tooling
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        // Notes (captured content plus review state)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                source TEXT,
                source_type TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                review_tier INTEGER NOT NULL DEFAULT 0 CHECK (review_tier BETWEEN 0 AND 3),
                archived INTEGER NOT NULL DEFAULT 0,
                last_reviewed_at TEXT
            )",
            [],
        )?;

        // One session per (review_type, period_key)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS review_sessions (
                id TEXT PRIMARY KEY,
                review_type TEXT NOT NULL,
                period_key TEXT NOT NULL,
                status TEXT NOT NULL,
                total_notes INTEGER NOT NULL DEFAULT 0,
                notes_reviewed INTEGER NOT NULL DEFAULT 0,
                notes_kept INTEGER NOT NULL DEFAULT 0,
                notes_archived INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                UNIQUE (review_type, period_key),
                CHECK (notes_kept >= 0 AND notes_archived >= 0),
                CHECK (notes_reviewed = notes_kept + notes_archived),
                CHECK (notes_reviewed <= total_notes)
            )",
            [],
        )?;

        // One action per (session, note), with the pre-decision snapshot
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS review_actions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                note_id TEXT NOT NULL,
                decision TEXT NOT NULL,
                decided_at TEXT NOT NULL,
                prior_tier INTEGER NOT NULL,
                prior_archived INTEGER NOT NULL,
                UNIQUE (session_id, note_id),
                FOREIGN KEY (session_id) REFERENCES review_sessions(id) ON DELETE CASCADE,
                FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // Indexes for performance
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_notes_tier ON notes(review_tier, archived)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_actions_note ON review_actions(note_id)",
            [],
        )?;

        Ok(())
    }

    // ========== TRANSACTIONS ==========

    /// Run `f` inside an IMMEDIATE transaction. Any error rolls everything back.
    /// Calls made while a transaction is already open join it.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        self.in_transaction(TransactionBehavior::Immediate, f)
    }

    /// Run `f` against one consistent snapshot
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        self.in_transaction(TransactionBehavior::Deferred, f)
    }

    fn in_transaction<T, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        let tx = Transaction::new_unchecked(&self.conn, behavior)?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========== NOTES ==========

    /// Capture a new note at the Daily tier
    pub fn create_note(&self, new_note: &NewNote) -> Result<Note> {
        let now = stamp(Utc::now());
        let note = Note {
            id: generate_note_id(),
            content: new_note.content.clone(),
            category: new_note.category.clone(),
            tags: new_note.tags.clone(),
            source: new_note.source.clone(),
            source_type: new_note.source_type.clone(),
            created_at: new_note.created_at.map(stamp).unwrap_or(now),
            updated_at: now,
            review_tier: ReviewTier::Daily,
            archived: false,
            last_reviewed_at: None,
        };

        self.insert_note(&note)?;
        Ok(note)
    }

    /// Insert a fully-formed note as-is
    pub fn insert_note(&self, note: &Note) -> Result<()> {
        let tags_json = serde_json::to_string(&note.tags)?;

        self.conn.execute(
            "INSERT INTO notes (id, content, category, tags, source, source_type,
                                created_at, updated_at, review_tier, archived, last_reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                note.id.0,
                note.content,
                note.category,
                tags_json,
                note.source,
                note.source_type.as_ref().map(|t| t.as_str()),
                encode_ts(&note.created_at),
                encode_ts(&note.updated_at),
                note.review_tier.level(),
                note.archived,
                note.last_reviewed_at.as_ref().map(encode_ts),
            ],
        )?;

        debug!("Inserted note: {}", note.id);
        Ok(())
    }

    pub fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
                params![id.0],
                row_to_note,
            )
            .optional()?;

        Ok(note)
    }

    pub fn query_notes(&self, query: &NoteQuery) -> Result<Vec<Note>> {
        let (sql, values) = query.to_sql();
        let mut stmt = self.conn.prepare(&sql)?;
        let notes = stmt
            .query_map(params_from_iter(values.iter()), row_to_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes)
    }

    /// Apply a partial update; `InvalidNote` if the note does not exist
    pub fn update_note(&self, id: &NoteId, patch: &NotePatch) -> Result<Note> {
        self.write(|db| {
            let mut note = db
                .get_note(id)?
                .ok_or_else(|| ReviewError::InvalidNote(id.clone()))?;

            patch.apply(&mut note);
            note.updated_at = stamp(Utc::now());

            db.conn.execute(
                "UPDATE notes
                 SET content = ?1, category = ?2, tags = ?3, source = ?4, source_type = ?5,
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    note.content,
                    note.category,
                    serde_json::to_string(&note.tags)?,
                    note.source,
                    note.source_type.as_ref().map(|t| t.as_str()),
                    encode_ts(&note.updated_at),
                    note.id.0,
                ],
            )?;

            debug!("Updated note: {}", note.id);
            Ok(note)
        })
    }

    /// Delete a note and its review actions. Returns false if it did not exist.
    /// Delete a note and its actions. Sessions that had decided it lose the
    /// decision from their counters and the note from their total.
    pub fn delete_note(&self, id: &NoteId) -> Result<bool> {
        self.write(|db| {
            let session_ids = {
                let mut stmt = db
                    .conn
                    .prepare("SELECT DISTINCT session_id FROM review_actions WHERE note_id = ?1")?;
                let ids = stmt
                    .query_map(params![id.0], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            let deleted = db
                .conn
                .execute("DELETE FROM notes WHERE id = ?1", params![id.0])?;

            for session_id in session_ids.into_iter().map(SessionId) {
                let Some(mut session) = db.get_session(&session_id)? else {
                    continue;
                };
                let (kept, archived) = db.decision_counts(&session_id)?;
                session.notes_kept = kept;
                session.notes_archived = archived;
                session.notes_reviewed = kept + archived;
                session.total_notes = session
                    .total_notes
                    .saturating_sub(1)
                    .max(session.notes_reviewed);
                db.update_session(&session)?;

                debug!(
                    "Session {} dropped deleted note {} ({}/{})",
                    session.id, id, session.notes_reviewed, session.total_notes
                );
            }

            debug!("Deleted note {}: {}", id, deleted > 0);
            Ok(deleted > 0)
        })
    }

    pub fn count_notes(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Persist tier, archived flag and review timestamp written by the engine
    pub(crate) fn write_review_state(&self, note: &Note) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE notes
             SET review_tier = ?1, archived = ?2, last_reviewed_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                note.review_tier.level(),
                note.archived,
                note.last_reviewed_at.as_ref().map(encode_ts),
                encode_ts(&note.updated_at),
                note.id.0,
            ],
        )?;

        if updated == 0 {
            return Err(ReviewError::InvalidNote(note.id.clone()));
        }
        Ok(())
    }

    // ========== REVIEW SESSIONS ==========

    pub fn get_session(&self, id: &SessionId) -> Result<Option<ReviewSession>> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {} FROM review_sessions WHERE id = ?1", SESSION_COLUMNS),
                params![id.0],
                row_to_session,
            )
            .optional()?;

        Ok(session)
    }

    pub fn find_session(
        &self,
        review_type: ReviewType,
        period_key: &str,
    ) -> Result<Option<ReviewSession>> {
        let session = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM review_sessions WHERE review_type = ?1 AND period_key = ?2",
                    SESSION_COLUMNS
                ),
                params![review_type.as_str(), period_key],
                row_to_session,
            )
            .optional()?;

        Ok(session)
    }

    /// Sessions ordered by review type, then period key
    pub fn list_sessions(&self, review_type: Option<ReviewType>) -> Result<Vec<ReviewSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM review_sessions
             WHERE ?1 IS NULL OR review_type = ?1
             ORDER BY review_type ASC, period_key ASC",
            SESSION_COLUMNS
        ))?;

        let sessions = stmt
            .query_map(params![review_type.map(|t| t.as_str())], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sessions)
    }

    pub(crate) fn insert_session(&self, session: &ReviewSession) -> Result<()> {
        self.conn.execute(
            "INSERT INTO review_sessions (id, review_type, period_key, status, total_notes,
                                          notes_reviewed, notes_kept, notes_archived,
                                          started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id.0,
                session.review_type.as_str(),
                session.period_key,
                session.status.as_str(),
                session.total_notes,
                session.notes_reviewed,
                session.notes_kept,
                session.notes_archived,
                encode_ts(&session.started_at),
                session.completed_at.as_ref().map(encode_ts),
            ],
        )?;

        debug!(
            "Inserted session: {} ({} {})",
            session.id, session.review_type, session.period_key
        );
        Ok(())
    }

    /// Write status and counters in one statement
    pub(crate) fn update_session(&self, session: &ReviewSession) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE review_sessions
             SET status = ?1, total_notes = ?2, notes_reviewed = ?3, notes_kept = ?4,
                 notes_archived = ?5, completed_at = ?6
             WHERE id = ?7",
            params![
                session.status.as_str(),
                session.total_notes,
                session.notes_reviewed,
                session.notes_kept,
                session.notes_archived,
                session.completed_at.as_ref().map(encode_ts),
                session.id.0,
            ],
        )?;

        if updated == 0 {
            return Err(ReviewError::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }

    /// Delete a session and its actions. Note state is left as decided.
    pub fn delete_session(&self, id: &SessionId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM review_sessions WHERE id = ?1", params![id.0])?;

        if deleted > 0 {
            info!("Deleted review session {}", id);
        }
        Ok(deleted > 0)
    }

    // ========== REVIEW ACTIONS ==========

    pub fn get_action(&self, session_id: &SessionId, note_id: &NoteId) -> Result<Option<ReviewAction>> {
        let action = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM review_actions WHERE session_id = ?1 AND note_id = ?2",
                    ACTION_COLUMNS
                ),
                params![session_id.0, note_id.0],
                row_to_action,
            )
            .optional()?;

        Ok(action)
    }

    pub(crate) fn insert_action(&self, action: &ReviewAction) -> Result<()> {
        self.conn.execute(
            "INSERT INTO review_actions (id, session_id, note_id, decision, decided_at,
                                         prior_tier, prior_archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action.id.0,
                action.session_id.0,
                action.note_id.0,
                action.decision.as_str(),
                encode_ts(&action.decided_at),
                action.prior_tier.level(),
                action.prior_archived,
            ],
        )?;

        debug!(
            "Recorded {} for note {} in session {}",
            action.decision.as_str(),
            action.note_id,
            action.session_id
        );
        Ok(())
    }

    /// Overwrite the decision; the snapshot columns are never rewritten
    pub(crate) fn update_action_decision(&self, action: &ReviewAction) -> Result<()> {
        self.conn.execute(
            "UPDATE review_actions SET decision = ?1, decided_at = ?2 WHERE id = ?3",
            params![action.decision.as_str(), encode_ts(&action.decided_at), action.id.0],
        )?;

        debug!(
            "Revised note {} to {} in session {}",
            action.note_id,
            action.decision.as_str(),
            action.session_id
        );
        Ok(())
    }

    pub(crate) fn delete_action(&self, id: &ActionId) -> Result<()> {
        self.conn
            .execute("DELETE FROM review_actions WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    pub fn actions_for_session(&self, session_id: &SessionId) -> Result<Vec<ReviewAction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM review_actions WHERE session_id = ?1 ORDER BY decided_at ASC, id ASC",
            ACTION_COLUMNS
        ))?;

        let actions = stmt
            .query_map(params![session_id.0], row_to_action)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(actions)
    }

    /// (kept, archived) actually recorded for a session
    pub fn decision_counts(&self, session_id: &SessionId) -> Result<(u32, u32)> {
        let counts = self.conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN decision = 'kept' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN decision = 'archived' THEN 1 ELSE 0 END), 0)
             FROM review_actions WHERE session_id = ?1",
            params![session_id.0],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
        )?;

        Ok(counts)
    }

    /// Every decision ever recorded for a note, newest first
    pub fn note_history(&self, note_id: &NoteId) -> Result<Vec<ReviewHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.session_id, a.note_id, a.decision, a.decided_at,
                    a.prior_tier, a.prior_archived, s.review_type, s.period_key
             FROM review_actions a
             JOIN review_sessions s ON s.id = a.session_id
             WHERE a.note_id = ?1
             ORDER BY a.decided_at DESC, a.id DESC",
        )?;

        let history = stmt
            .query_map(params![note_id.0], |row| {
                let raw_type: String = row.get(7)?;
                Ok(ReviewHistoryEntry {
                    action: row_to_action(row)?,
                    review_type: ReviewType::parse(&raw_type)
                        .ok_or_else(|| conversion_error(7, format!("review type '{}'", raw_type)))?,
                    period_key: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(history)
    }
}

// ========== ROW MAPPING ==========

pub(crate) fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
    let tags_json: String = row.get(3)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(json_error)?;

    let level: i64 = row.get(8)?;
    let review_tier = ReviewTier::from_level(level)
        .ok_or_else(|| conversion_error(8, format!("review tier {}", level)))?;

    Ok(Note {
        id: NoteId(row.get(0)?),
        content: row.get(1)?,
        category: row.get(2)?,
        tags,
        source: row.get(4)?,
        source_type: row
            .get::<_, Option<String>>(5)?
            .map(|raw| SourceType::parse(&raw)),
        created_at: decode_ts(6, &row.get::<_, String>(6)?)?,
        updated_at: decode_ts(7, &row.get::<_, String>(7)?)?,
        review_tier,
        archived: row.get(9)?,
        last_reviewed_at: row
            .get::<_, Option<String>>(10)?
            .map(|raw| decode_ts(10, &raw))
            .transpose()?,
    })
}

fn row_to_session(row: &Row) -> rusqlite::Result<ReviewSession> {
    let raw_type: String = row.get(1)?;
    let raw_status: String = row.get(3)?;

    Ok(ReviewSession {
        id: SessionId(row.get(0)?),
        review_type: ReviewType::parse(&raw_type)
            .ok_or_else(|| conversion_error(1, format!("review type '{}'", raw_type)))?,
        period_key: row.get(2)?,
        status: SessionStatus::parse(&raw_status)
            .ok_or_else(|| conversion_error(3, format!("session status '{}'", raw_status)))?,
        total_notes: row.get(4)?,
        notes_reviewed: row.get(5)?,
        notes_kept: row.get(6)?,
        notes_archived: row.get(7)?,
        started_at: decode_ts(8, &row.get::<_, String>(8)?)?,
        completed_at: row
            .get::<_, Option<String>>(9)?
            .map(|raw| decode_ts(9, &raw))
            .transpose()?,
    })
}

fn row_to_action(row: &Row) -> rusqlite::Result<ReviewAction> {
    let raw_decision: String = row.get(3)?;
    let prior_level: i64 = row.get(5)?;

    Ok(ReviewAction {
        id: ActionId(row.get(0)?),
        session_id: SessionId(row.get(1)?),
        note_id: NoteId(row.get(2)?),
        decision: Decision::parse(&raw_decision)
            .ok_or_else(|| conversion_error(3, format!("decision '{}'", raw_decision)))?,
        decided_at: decode_ts(4, &row.get::<_, String>(4)?)?,
        prior_tier: ReviewTier::from_level(prior_level)
            .ok_or_else(|| conversion_error(5, format!("review tier {}", prior_level)))?,
        prior_archived: row.get(6)?,
    })
}

// ========== TIMESTAMPS ==========

/// Truncate to the stored precision so values survive a round trip unchanged
pub fn stamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Fixed-width RFC 3339, so text order equals time order
pub(crate) fn encode_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn conversion_error(column: usize, what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        format!("unrecognized {}", what).into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use curation_layer_schemas::{generate_action_id, generate_session_id};
    use tempfile::NamedTempFile;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, day, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_database_creation() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        assert_eq!(db.count_notes().unwrap(), 0);
        assert!(db.list_sessions(None).unwrap().is_empty());
    }

    #[test]
    fn test_note_insert_and_retrieve() {
        let db = Database::open_in_memory().unwrap();

        let note = db
            .create_note(
                &NewNote::new("Compounding applies to knowledge too")
                    .category("ideas")
                    .tag("learning")
                    .tag("habits")
                    .source("Almanack", SourceType::Book)
                    .created_at(at(25)),
            )
            .unwrap();

        assert_eq!(note.review_tier, ReviewTier::Daily);
        assert!(!note.archived);
        assert!(note.id.0.starts_with("note_"));

        let retrieved = db.get_note(&note.id).unwrap().unwrap();
        assert_eq!(retrieved, note);
        assert_eq!(db.count_notes().unwrap(), 1);
    }

    #[test]
    fn test_timestamps_keep_microseconds() {
        let db = Database::open_in_memory().unwrap();
        let precise = at(3) + Duration::nanoseconds(123_456_789);
        let note = db
            .create_note(&NewNote::new("precise").created_at(precise))
            .unwrap();

        assert_eq!(note.created_at, at(3) + Duration::microseconds(123_456));
        assert_eq!(db.get_note(&note.id).unwrap().unwrap().created_at, note.created_at);
    }

    #[test]
    fn test_query_notes_filters() {
        let db = Database::open_in_memory().unwrap();
        let a = db
            .create_note(&NewNote::new("a").tag("rust").category("work").created_at(at(1)))
            .unwrap();
        let b = db
            .create_note(&NewNote::new("b").tag("cooking").created_at(at(2)))
            .unwrap();
        let c = db
            .create_note(
                &NewNote::new("c")
                    .tag("rust")
                    .source("Podcast 12", SourceType::Podcast)
                    .created_at(at(3)),
            )
            .unwrap();

        let mut promoted = c.clone();
        promoted.review_tier = ReviewTier::Weekly;
        promoted.archived = true;
        db.write_review_state(&promoted).unwrap();

        let rust = db.query_notes(&NoteQuery::new().tag("rust")).unwrap();
        assert_eq!(rust.iter().map(|n| n.id.clone()).collect::<Vec<_>>(), vec![a.id.clone(), c.id.clone()]);

        let daily = db.query_notes(&NoteQuery::new().tier(ReviewTier::Daily)).unwrap();
        assert_eq!(daily.len(), 2);

        let not_daily = db.query_notes(&NoteQuery::new().tier_not(ReviewTier::Daily)).unwrap();
        assert_eq!(not_daily.len(), 1);
        assert_eq!(not_daily[0].id, c.id);

        let active = db.query_notes(&NoteQuery::new().archived(false)).unwrap();
        assert_eq!(active.len(), 2);

        let window = db
            .query_notes(&NoteQuery::new().created_between(at(2), at(3)))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, b.id);

        assert_eq!(db.query_notes(&NoteQuery::new().category("work")).unwrap().len(), 1);
        assert_eq!(db.query_notes(&NoteQuery::new().source("Podcast 12")).unwrap().len(), 1);
        assert_eq!(
            db.query_notes(&NoteQuery::new().source_type(SourceType::Podcast))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(db.query_notes(&NoteQuery::new().limit(1)).unwrap()[0].id, a.id);
    }

    #[test]
    fn test_update_note_patch() {
        let db = Database::open_in_memory().unwrap();
        let note = db
            .create_note(&NewNote::new("draft").category("misc").created_at(at(4)))
            .unwrap();

        let updated = db
            .update_note(
                &note.id,
                &NotePatch {
                    content: Some("final".to_string()),
                    category: Some(None),
                    tags: Some(vec!["done".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.content, "final");
        assert_eq!(updated.category, None);
        assert_eq!(updated.tags, vec!["done".to_string()]);
        assert_eq!(updated.created_at, note.created_at);
        assert_eq!(db.get_note(&note.id).unwrap().unwrap(), updated);

        let missing = NoteId("note_missing".to_string());
        assert!(matches!(
            db.update_note(&missing, &NotePatch::default()),
            Err(ReviewError::InvalidNote(_))
        ));
    }

    #[test]
    fn test_session_uniqueness_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let note = db.create_note(&NewNote::new("n").created_at(at(5))).unwrap();

        let session = ReviewSession {
            id: generate_session_id(),
            review_type: ReviewType::Weekly,
            period_key: "2024-W45".to_string(),
            status: SessionStatus::InProgress,
            total_notes: 1,
            notes_reviewed: 0,
            notes_kept: 0,
            notes_archived: 0,
            started_at: stamp(Utc::now()),
            completed_at: None,
        };
        db.insert_session(&session).unwrap();

        let mut duplicate = session.clone();
        duplicate.id = generate_session_id();
        assert!(matches!(db.insert_session(&duplicate), Err(ReviewError::Persistence(_))));

        let action = ReviewAction {
            id: generate_action_id(),
            session_id: session.id.clone(),
            note_id: note.id.clone(),
            decision: Decision::Kept,
            decided_at: stamp(Utc::now()),
            prior_tier: ReviewTier::Daily,
            prior_archived: false,
        };
        db.insert_action(&action).unwrap();
        assert_eq!(db.decision_counts(&session.id).unwrap(), (1, 0));
        assert_eq!(db.note_history(&note.id).unwrap().len(), 1);

        assert!(db.delete_session(&session.id).unwrap());
        assert!(db.get_action(&session.id, &note.id).unwrap().is_none());
        assert!(db.get_note(&note.id).unwrap().is_some());
    }

    #[test]
    fn test_counter_check_constraint_rejects_drift() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ReviewSession {
            id: generate_session_id(),
            review_type: ReviewType::Monthly,
            period_key: "2024-11".to_string(),
            status: SessionStatus::InProgress,
            total_notes: 2,
            notes_reviewed: 0,
            notes_kept: 0,
            notes_archived: 0,
            started_at: stamp(Utc::now()),
            completed_at: None,
        };
        db.insert_session(&session).unwrap();

        session.notes_reviewed = 1;
        assert!(db.update_session(&session).is_err());

        session.notes_kept = 1;
        db.update_session(&session).unwrap();
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.write(|db| {
            db.create_note(&NewNote::new("doomed"))?;
            Err(ReviewError::Config("abort".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(db.count_notes().unwrap(), 0);
    }

    #[test]
    fn test_delete_note_reports_missing() {
        let db = Database::open_in_memory().unwrap();
        let note = db.create_note(&NewNote::new("gone")).unwrap();

        assert!(db.delete_note(&note.id).unwrap());
        assert!(!db.delete_note(&note.id).unwrap());
        assert!(db.get_note(&note.id).unwrap().is_none());
    }
}
