//! Which notes belong to a review period.
//!
//! A note is in the cohort of `(review_type, period)` when it was created
//! inside the period's range and either
//! - it sits at the review type's source tier and is not archived, or
//! - it already has a decision recorded in that period's session.
//!
//! The second arm keeps decided notes in the cohort after their tier or
//! archived flag changed, so session totals stay stable while reviewing.

use chrono::{DateTime, Utc};
use curation_layer_schemas::{Note, ReviewType};
use rusqlite::params;
use std::collections::BTreeMap;
use tracing::warn;

use crate::database::{encode_ts, row_to_note, Database, NOTE_COLUMNS};
use crate::error::Result;
use crate::period::{Period, PeriodCalendar, PeriodRange};

/// Pure cohort predicate for a single note
pub fn is_candidate(
    note: &Note,
    review_type: ReviewType,
    range: &PeriodRange,
    has_action_in_period: bool,
) -> bool {
    range.contains(note.created_at)
        && (has_action_in_period
            || (note.review_tier == review_type.source_tier() && !note.archived))
}

/// Cohort of one period, oldest note first
pub fn eligible_notes(
    db: &Database,
    review_type: ReviewType,
    period: &Period,
    range: &PeriodRange,
) -> Result<Vec<Note>> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {} FROM notes n
         WHERE n.created_at >= ?1 AND n.created_at < ?2
           AND (
             (n.review_tier = ?3 AND n.archived = 0)
             OR EXISTS (
               SELECT 1 FROM review_actions a
               JOIN review_sessions s ON s.id = a.session_id
               WHERE a.note_id = n.id AND s.review_type = ?4 AND s.period_key = ?5
             )
           )
         ORDER BY n.created_at ASC, n.id ASC",
        NOTE_COLUMNS
    ))?;

    let notes = stmt
        .query_map(
            params![
                encode_ts(&range.start),
                encode_ts(&range.end),
                review_type.source_tier().level(),
                review_type.as_str(),
                period.key(),
            ],
            row_to_note,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(notes)
}

pub fn eligible_count(
    db: &Database,
    review_type: ReviewType,
    period: &Period,
    range: &PeriodRange,
) -> Result<u32> {
    let count: u32 = db.conn().query_row(
        "SELECT COUNT(*) FROM notes n
         WHERE n.created_at >= ?1 AND n.created_at < ?2
           AND (
             (n.review_tier = ?3 AND n.archived = 0)
             OR EXISTS (
               SELECT 1 FROM review_actions a
               JOIN review_sessions s ON s.id = a.session_id
               WHERE a.note_id = n.id AND s.review_type = ?4 AND s.period_key = ?5
             )
           )",
        params![
            encode_ts(&range.start),
            encode_ts(&range.end),
            review_type.source_tier().level(),
            review_type.as_str(),
            period.key(),
        ],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Size of one period's cohort and how many of its notes are decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cohort {
    pub eligible: u32,
    pub decided: u32,
}

/// Group every cohort member created before `before` by period, in one scan.
///
/// A note counts as decided only when its action sits in the session keyed by
/// the note's own period under the current calendar.
pub fn cohorts_before(
    db: &Database,
    calendar: &PeriodCalendar,
    review_type: ReviewType,
    before: DateTime<Utc>,
) -> Result<BTreeMap<Period, Cohort>> {
    let mut stmt = db.conn().prepare(
        "SELECT n.created_at,
                (
                  SELECT group_concat(s.period_key, ',') FROM review_actions a
                  JOIN review_sessions s ON s.id = a.session_id
                  WHERE a.note_id = n.id AND s.review_type = ?1
                ) AS decided_in,
                n.review_tier, n.archived
         FROM notes n
         WHERE n.created_at < ?2",
    )?;

    let rows = stmt
        .query_map(params![review_type.as_str(), encode_ts(&before)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let source_level = review_type.source_tier().level();
    let mut cohorts: BTreeMap<Period, Cohort> = BTreeMap::new();

    for (raw_created, decided_in, level, archived) in rows {
        let created_at = match DateTime::parse_from_rfc3339(&raw_created) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                warn!("Skipping note with unreadable created_at '{}': {}", raw_created, e);
                continue;
            }
        };

        let period = calendar.period_of(created_at, review_type);
        let key = period.key();
        let decided = decided_in
            .as_deref()
            .is_some_and(|keys| keys.split(',').any(|k| k == key));
        if !decided && (level != source_level || archived) {
            continue;
        }

        let cohort = cohorts.entry(period).or_default();
        cohort.eligible += 1;
        if decided {
            cohort.decided += 1;
        }
    }

    Ok(cohorts)
}
