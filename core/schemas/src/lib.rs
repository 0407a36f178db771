use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tiers and Review Types
// ============================================================================

/// Promotion level of a note. Ordered from least to most curated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReviewTier {
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "yearly")]
    Yearly,
}

impl ReviewTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewTier::Daily => "daily",
            ReviewTier::Weekly => "weekly",
            ReviewTier::Monthly => "monthly",
            ReviewTier::Yearly => "yearly",
        }
    }

    /// Stored integer level (Daily = 0 .. Yearly = 3)
    pub fn level(&self) -> i64 {
        match self {
            ReviewTier::Daily => 0,
            ReviewTier::Weekly => 1,
            ReviewTier::Monthly => 2,
            ReviewTier::Yearly => 3,
        }
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(ReviewTier::Daily),
            1 => Some(ReviewTier::Weekly),
            2 => Some(ReviewTier::Monthly),
            3 => Some(ReviewTier::Yearly),
            _ => None,
        }
    }

    /// One tier up, saturating at Yearly
    pub fn promoted(&self) -> Self {
        match self {
            ReviewTier::Daily => ReviewTier::Weekly,
            ReviewTier::Weekly => ReviewTier::Monthly,
            ReviewTier::Monthly | ReviewTier::Yearly => ReviewTier::Yearly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReviewType {
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "yearly")]
    Yearly,
}

impl ReviewType {
    pub const ALL: [ReviewType; 3] = [ReviewType::Weekly, ReviewType::Monthly, ReviewType::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewType::Weekly => "weekly",
            ReviewType::Monthly => "monthly",
            ReviewType::Yearly => "yearly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Some(ReviewType::Weekly),
            "monthly" | "month" => Some(ReviewType::Monthly),
            "yearly" | "year" => Some(ReviewType::Yearly),
            _ => None,
        }
    }

    /// The tier whose notes this review looks at
    pub fn source_tier(&self) -> ReviewTier {
        match self {
            ReviewType::Weekly => ReviewTier::Daily,
            ReviewType::Monthly => ReviewTier::Weekly,
            ReviewType::Yearly => ReviewTier::Monthly,
        }
    }
}

impl fmt::Display for ReviewType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "not_started")]
    NotStarted,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(SessionStatus::NotStarted),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "kept")]
    Kept,
    #[serde(rename = "archived")]
    Archived,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Kept => "kept",
            Decision::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "kept" => Some(Decision::Kept),
            "archived" => Some(Decision::Archived),
            _ => None,
        }
    }
}

// ============================================================================
// Note Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "book")]
    Book,
    #[serde(rename = "article")]
    Article,
    #[serde(rename = "podcast")]
    Podcast,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "conversation")]
    Conversation,
    #[serde(rename = "thought")]
    Thought,
    #[serde(rename = "other")]
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Book => "book",
            SourceType::Article => "article",
            SourceType::Podcast => "podcast",
            SourceType::Video => "video",
            SourceType::Conversation => "conversation",
            SourceType::Thought => "thought",
            SourceType::Other => "other",
        }
    }

    /// Unknown labels fall back to `Other`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "book" => SourceType::Book,
            "article" => SourceType::Article,
            "podcast" => SourceType::Podcast,
            "video" => SourceType::Video,
            "conversation" => SourceType::Conversation,
            "thought" => SourceType::Thought,
            _ => SourceType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub source_type: Option<SourceType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub review_tier: ReviewTier,
    pub archived: bool,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

/// Input for capturing a note. `created_at` defaults to the capture time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNote {
    pub content: String,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub source_type: Option<SourceType>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewNote {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>, source_type: SourceType) -> Self {
        self.source = Some(source.into());
        self.source_type = Some(source_type);
        self
    }
}

// ============================================================================
// Review Session Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub id: SessionId,
    pub review_type: ReviewType,
    pub period_key: String,
    pub status: SessionStatus,
    pub total_notes: u32,
    pub notes_reviewed: u32,
    pub notes_kept: u32,
    pub notes_archived: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReviewSession {
    /// Reviewed over total; an empty review counts as done
    pub fn progress_fraction(&self) -> f64 {
        if self.total_notes == 0 {
            1.0
        } else {
            f64::from(self.notes_reviewed) / f64::from(self.total_notes)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// `notes_reviewed == kept + archived` and `notes_reviewed <= total`
    pub fn counters_consistent(&self) -> bool {
        self.notes_reviewed == self.notes_kept + self.notes_archived
            && self.notes_reviewed <= self.total_notes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAction {
    pub id: ActionId,
    pub session_id: SessionId,
    pub note_id: NoteId,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
    /// Tier before the first decision in this session
    pub prior_tier: ReviewTier,
    pub prior_archived: bool,
}

/// A review action with the session key it was recorded under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewHistoryEntry {
    pub action: ReviewAction,
    pub review_type: ReviewType,
    pub period_key: String,
}

/// Outstanding review periods per review type, for badges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub weekly: u32,
    pub monthly: u32,
    pub yearly: u32,
}

impl PendingCounts {
    pub fn get(&self, review_type: ReviewType) -> u32 {
        match review_type {
            ReviewType::Weekly => self.weekly,
            ReviewType::Monthly => self.monthly,
            ReviewType::Yearly => self.yearly,
        }
    }

    pub fn total(&self) -> u32 {
        self.weekly + self.monthly + self.yearly
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_note_id() -> NoteId {
    NoteId(format!("note_{}", ulid::Ulid::new()))
}

pub fn generate_session_id() -> SessionId {
    SessionId(format!("rs_{}", ulid::Ulid::new()))
}

pub fn generate_action_id() -> ActionId {
    ActionId(format!("ra_{}", ulid::Ulid::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let note_id = generate_note_id();
        assert!(note_id.0.starts_with("note_"));
        assert_eq!(note_id.0.len(), 31); // "note_" + 26 chars

        let session_id = generate_session_id();
        assert!(session_id.0.starts_with("rs_"));

        let action_id = generate_action_id();
        assert!(action_id.0.starts_with("ra_"));
    }

    #[test]
    fn test_tier_promotion_saturates() {
        assert_eq!(ReviewTier::Daily.promoted(), ReviewTier::Weekly);
        assert_eq!(ReviewTier::Weekly.promoted(), ReviewTier::Monthly);
        assert_eq!(ReviewTier::Monthly.promoted(), ReviewTier::Yearly);
        assert_eq!(ReviewTier::Yearly.promoted(), ReviewTier::Yearly);
    }

    #[test]
    fn test_tier_levels() {
        for tier in [
            ReviewTier::Daily,
            ReviewTier::Weekly,
            ReviewTier::Monthly,
            ReviewTier::Yearly,
        ] {
            assert_eq!(ReviewTier::from_level(tier.level()), Some(tier));
        }
        assert_eq!(ReviewTier::from_level(4), None);
        assert!(ReviewTier::Daily < ReviewTier::Yearly);
    }

    #[test]
    fn test_source_tiers() {
        assert_eq!(ReviewType::Weekly.source_tier(), ReviewTier::Daily);
        assert_eq!(ReviewType::Monthly.source_tier(), ReviewTier::Weekly);
        assert_eq!(ReviewType::Yearly.source_tier(), ReviewTier::Monthly);
    }

    #[test]
    fn test_progress_fraction_empty_is_complete() {
        let mut session = ReviewSession {
            id: generate_session_id(),
            review_type: ReviewType::Weekly,
            period_key: "2024-W48".to_string(),
            status: SessionStatus::InProgress,
            total_notes: 0,
            notes_reviewed: 0,
            notes_kept: 0,
            notes_archived: 0,
            started_at: Utc::now(),
            completed_at: None,
        };
        assert_eq!(session.progress_fraction(), 1.0);

        session.total_notes = 4;
        session.notes_reviewed = 1;
        session.notes_kept = 1;
        assert_eq!(session.progress_fraction(), 0.25);
        assert!(session.counters_consistent());

        session.notes_archived = 1;
        assert!(!session.counters_consistent());
    }

    #[test]
    fn test_note_serialization() {
        let now = Utc::now();
        let note = Note {
            id: generate_note_id(),
            content: "Spaced review beats rereading".to_string(),
            category: Some("learning".to_string()),
            tags: vec!["memory".into(), "study".into()],
            source: Some("Make It Stick".to_string()),
            source_type: Some(SourceType::Book),
            created_at: now,
            updated_at: now,
            review_tier: ReviewTier::Weekly,
            archived: false,
            last_reviewed_at: None,
        };

        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("\"review_tier\":\"weekly\""));
        let restored: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, note);
    }

    #[test]
    fn test_source_type_parse_falls_back() {
        assert_eq!(SourceType::parse("Podcast"), SourceType::Podcast);
        assert_eq!(SourceType::parse("newsletter"), SourceType::Other);
    }

    #[test]
    fn test_review_type_parse() {
        assert_eq!(ReviewType::parse("Weekly"), Some(ReviewType::Weekly));
        assert_eq!(ReviewType::parse("year"), Some(ReviewType::Yearly));
        assert_eq!(ReviewType::parse("daily"), None);
    }
}
