use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Schedule segment models (mirrored from the Twitch schedule)
// ============================================================================

/// Lifecycle of a schedule segment.
///
/// Forward transitions are `scheduled -> {live, completed, cancelled}` and
/// `live -> completed`; `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Scheduled,
    Live,
    Completed,
    Cancelled,
}

impl SegmentStatus {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Some(SegmentStatus::Scheduled),
            "live" => Some(SegmentStatus::Live),
            "completed" => Some(SegmentStatus::Completed),
            "cancelled" => Some(SegmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentStatus::Scheduled => "scheduled",
            SegmentStatus::Live => "live",
            SegmentStatus::Completed => "completed",
            SegmentStatus::Cancelled => "cancelled",
        }
    }
}

impl From<SegmentStatus> for String {
    fn from(status: SegmentStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<&str> for SegmentStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid segment status: {}", value))
    }
}

/// One broadcast window of a streamer. `(streamer_id, start_time)` is the
/// natural key used for upserts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleSegment {
    pub id: String,
    pub streamer_id: String,
    pub title: String,
    pub category: Option<String>,
    pub category_image_url: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_recurring: bool,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ScheduleSegment {
    /// Parsed status; rows are constrained by the schema so this only fails on
    /// a hand-edited database.
    #[cfg(test)]
    pub fn status(&self) -> Option<SegmentStatus> {
        SegmentStatus::from_str(&self.status)
    }
}

/// Validated segment data ready to be merged into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertSegment {
    pub title: String,
    pub category: Option<String>,
    pub category_image_url: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_recurring: bool,
    pub status: SegmentStatus,
}

/// A segment as returned to a user, with the owning streamer's identity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub streamer_id: String,
    pub streamer_twitch_id: String,
    pub streamer_display_name: String,
    pub streamer_image_url: Option<String>,
    pub title: String,
    pub category: Option<String>,
    pub category_image_url: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_recurring: bool,
    pub status: String,
}
