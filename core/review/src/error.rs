//! Error types for the review engine.

use curation_layer_schemas::{NoteId, SessionId};
use thiserror::Error;

use crate::period::PeriodError;

/// Result type alias using the review engine's error type.
pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Error, Debug)]
pub enum ReviewError {
    /// Period key could not be parsed for the requested review type
    #[error("Invalid period: {0}")]
    InvalidPeriod(#[from] PeriodError),

    /// Note does not exist or is not part of the session's cohort
    #[error("Invalid note: {0}")]
    InvalidNote(NoteId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// New decision against a completed session that has no notes left
    #[error("Session closed: {0}")]
    SessionClosed(SessionId),

    /// Underlying store failed; the surrounding transaction was rolled back
    #[error("Persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
