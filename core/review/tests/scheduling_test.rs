use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc, Weekday};
use curation_layer_review::{EngineConfig, ReviewEngine};
use curation_layer_schemas::{Decision, NewNote, Note, PendingCounts, ReviewType, SessionStatus};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> Result<ReviewEngine> {
    Ok(ReviewEngine::open(EngineConfig {
        db_path: dir.path().join("notes.db"),
        ..Default::default()
    })?)
}

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 10, 0, 0).unwrap()
}

fn capture(engine: &ReviewEngine, content: &str, created: DateTime<Utc>) -> Result<Note> {
    Ok(engine.create_note(&NewNote::new(content).created_at(created))?)
}

#[test]
fn test_reviewable_only_after_period_ends() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(&dir)?;
    let now = at(2024, 11, 27);

    assert!(!engine.is_reviewable_at("2024-W48", ReviewType::Weekly, now));
    assert!(!engine.is_reviewable_at("2024-11", ReviewType::Monthly, now));
    assert!(!engine.is_reviewable_at("2024", ReviewType::Yearly, now));

    assert!(engine.is_reviewable_at("2024-W47", ReviewType::Weekly, now));
    assert!(engine.is_reviewable_at("2024-10", ReviewType::Monthly, now));
    assert!(engine.is_reviewable_at("2023", ReviewType::Yearly, now));

    // Monday 00:00 UTC starts the next week
    let monday = Utc.with_ymd_and_hms(2024, 12, 2, 0, 0, 0).unwrap();
    assert!(engine.is_reviewable_at("2024-W48", ReviewType::Weekly, monday));

    Ok(())
}

#[test]
fn test_pending_counts_follow_decisions() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(&dir)?;
    let now = at(2024, 12, 4);

    let october = capture(&engine, "october", at(2024, 10, 1))?;
    let first = capture(&engine, "first", at(2024, 11, 5))?;
    let second = capture(&engine, "second", at(2024, 11, 6))?;
    // Current week and month never count
    capture(&engine, "this week", at(2024, 12, 3))?;

    assert_eq!(
        engine.pending_counts_at(now)?,
        PendingCounts { weekly: 2, monthly: 0, yearly: 0 }
    );

    let w40 = engine.start_or_resume_session_at("2024-W40", ReviewType::Weekly, now)?;
    engine.submit_decision_at(&w40.id, &october.id, Decision::Kept, now)?;
    assert_eq!(
        engine.pending_counts_at(now)?,
        PendingCounts { weekly: 1, monthly: 1, yearly: 0 }
    );

    let w45 = engine.start_or_resume_session_at("2024-W45", ReviewType::Weekly, now)?;
    engine.submit_decision_at(&w45.id, &first.id, Decision::Kept, now)?;
    let counts = engine.pending_counts_at(now)?;
    assert_eq!(counts, PendingCounts { weekly: 1, monthly: 2, yearly: 0 });
    assert_eq!(counts.total(), 3);

    let pending = engine.pending_periods_at(ReviewType::Weekly, now)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].period_key, "2024-W45");
    assert_eq!((pending[0].decided, pending[0].eligible), (1, 2));
    assert_eq!(pending[0].status, SessionStatus::InProgress);
    assert_eq!(pending[0].fraction(), 0.5);

    engine.submit_decision_at(&w45.id, &second.id, Decision::Archived, now)?;
    assert_eq!(
        engine.pending_counts_at(now)?,
        PendingCounts { weekly: 0, monthly: 2, yearly: 0 }
    );

    Ok(())
}

#[test]
fn test_next_actionable_target_is_oldest() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(&dir)?;
    let now = at(2025, 2, 10);

    assert!(engine.next_actionable_target_at(ReviewType::Weekly, now)?.is_none());
    assert!(engine.next_actionable_any_at(now)?.is_none());

    let old = capture(&engine, "old", at(2024, 12, 10))?;
    capture(&engine, "newer", at(2025, 1, 14))?;

    let target = engine
        .next_actionable_target_at(ReviewType::Weekly, now)?
        .expect("weekly target");
    assert_eq!(target.period_key, "2024-W50");
    assert_eq!(target.status, SessionStatus::NotStarted);
    assert!(target.session_id.is_none());

    // Clearing the oldest week moves the target and opens a monthly backlog
    let session = engine.start_or_resume_session_at(&target.period_key, ReviewType::Weekly, now)?;
    engine.submit_decision_at(&session.id, &old.id, Decision::Kept, now)?;

    let weekly = engine
        .next_actionable_target_at(ReviewType::Weekly, now)?
        .expect("weekly target");
    assert_eq!(weekly.period_key, "2025-W03");

    let monthly = engine
        .next_actionable_target_at(ReviewType::Monthly, now)?
        .expect("monthly target");
    assert_eq!(monthly.period_key, "2024-12");

    // December 1st starts before the week of January 14th
    let any = engine.next_actionable_any_at(now)?.expect("any target");
    assert_eq!(any.review_type, ReviewType::Monthly);
    assert_eq!(any.period_key, "2024-12");

    Ok(())
}

#[test]
fn test_archived_and_promoted_notes_leave_backlog() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(&dir)?;
    let now = at(2024, 12, 4);

    let note = capture(&engine, "note", at(2024, 11, 12))?;
    let session = engine.start_or_resume_session_at("2024-W46", ReviewType::Weekly, now)?;
    engine.submit_decision_at(&session.id, &note.id, Decision::Archived, now)?;

    // Archived notes never enter later cohorts
    assert_eq!(engine.pending_counts_at(now)?, PendingCounts::default());

    // Deleting the session puts nothing back: the note is still archived
    engine.delete_session(&session.id)?;
    assert_eq!(engine.pending_counts_at(now)?, PendingCounts::default());

    Ok(())
}

#[test]
fn test_sunday_week_start_shifts_periods() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = ReviewEngine::open(
        EngineConfig {
            db_path: dir.path().join("notes.db"),
            ..Default::default()
        }
        .with_week_start(Weekday::Sun),
    )?;

    // Sunday 2024-12-01 opens week 49 when weeks start on Sunday
    let note = capture(&engine, "sunday", at(2024, 12, 1))?;
    let now = at(2024, 12, 9);

    let target = engine
        .next_actionable_target_at(ReviewType::Weekly, now)?
        .expect("weekly target");
    assert_eq!(target.period_key, "2024-W49");

    let session = engine.start_or_resume_session_at("2024-W49", ReviewType::Weekly, now)?;
    let notes = engine.get_session_notes(&session.id)?;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, note.id);

    Ok(())
}

#[test]
fn test_export_reflects_review_state() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = engine(&dir)?;
    let now = at(2024, 12, 4);

    let kept = capture(&engine, "kept", at(2024, 11, 5))?;
    capture(&engine, "untouched", at(2024, 11, 6))?;
    let session = engine.start_or_resume_session_at("2024-W45", ReviewType::Weekly, now)?;
    engine.submit_decision_at(&session.id, &kept.id, Decision::Kept, now)?;

    let path = dir.path().join("export.json");
    let count = engine.export_json(std::fs::File::create(&path)?)?;
    assert_eq!(count, 2);

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(value["version"], 1);
    let notes = value["notes"].as_array().expect("notes array");
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0]["id"], kept.id.0.as_str());
    assert_eq!(notes[0]["status"]["tier"], "weekly");
    assert_eq!(notes[0]["status"]["lastReviewedAt"], "2024-12-04T10:00:00Z");
    assert_eq!(notes[1]["status"]["tier"], "daily");
    assert!(notes[1]["status"]["lastReviewedAt"].is_null());

    Ok(())
}
