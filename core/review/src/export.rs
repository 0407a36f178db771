//! One-way JSON snapshot of every note and its review status.

use chrono::{DateTime, Utc};
use curation_layer_schemas::{Note, ReviewTier, SourceType};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::info;

use crate::database::{stamp, Database, NoteQuery};
use crate::error::Result;

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub notes: Vec<ExportedNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedNote {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub source_type: Option<SourceType>,
    pub status: ExportedStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStatus {
    pub tier: ReviewTier,
    pub archived: bool,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl From<Note> for ExportedNote {
    fn from(note: Note) -> Self {
        Self {
            id: note.id.0,
            content: note.content,
            created_at: note.created_at,
            updated_at: note.updated_at,
            category: note.category,
            tags: note.tags,
            source: note.source,
            source_type: note.source_type,
            status: ExportedStatus {
                tier: note.review_tier,
                archived: note.archived,
                last_reviewed_at: note.last_reviewed_at,
            },
        }
    }
}

/// All notes, oldest first, read from one snapshot
pub fn export_snapshot(db: &Database, now: DateTime<Utc>) -> Result<ExportDocument> {
    let notes = db.read(|db| db.query_notes(&NoteQuery::new()))?;

    info!("Exporting {} notes", notes.len());
    Ok(ExportDocument {
        version: EXPORT_VERSION,
        exported_at: stamp(now),
        notes: notes.into_iter().map(ExportedNote::from).collect(),
    })
}

pub fn write_json<W: Write>(document: &ExportDocument, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
