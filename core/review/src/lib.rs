pub mod config;
pub mod database;
pub mod deck;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod export;
pub mod period;
pub mod progress;
pub mod session;

pub use config::{EngineConfig, ReopenPolicy};
pub use database::{Database, NotePatch, NoteQuery, TierFilter};
pub use deck::ReviewDeck;
pub use engine::ReviewEngine;
pub use error::{Result, ReviewError};
pub use export::{ExportDocument, ExportedNote, ExportedStatus, EXPORT_VERSION};
pub use period::{Period, PeriodCalendar, PeriodError, PeriodRange};
pub use progress::{PeriodProgress, ProgressTracker};
pub use session::SessionManager;
