use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tracked broadcaster whose schedule is mirrored locally.
///
/// Streamers are never hard-deleted: the weekly audit flips `is_active` off
/// once nobody tracks them, and tracking them again flips it back on.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Streamer {
    pub id: String,
    /// Broadcaster id on Twitch
    pub twitch_id: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
    /// Local path of the compressed profile image (e.g. `/images/abc.webp`)
    pub compressed_image_url: Option<String>,
    pub is_active: bool,
    /// Last successful schedule refresh; `None` until the first one.
    pub last_schedule_update: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamer {
    pub twitch_id: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
}
