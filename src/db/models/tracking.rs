use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user tracking a streamer, with the user's per-streamer preferences.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserStreamer {
    pub id: String,
    pub user_id: String,
    pub streamer_id: String,
    pub followed_at: NaiveDateTime,
    pub is_favorite: bool,
    pub notifications_enabled: bool,
}

/// Partial update of tracking preferences; `None` leaves the field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePreferences {
    pub is_favorite: Option<bool>,
    pub notifications_enabled: Option<bool>,
}

/// A tracked streamer joined with the tracking row, as listed to the user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrackedStreamer {
    pub streamer_id: String,
    pub twitch_id: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
    pub compressed_image_url: Option<String>,
    pub is_active: bool,
    pub followed_at: NaiveDateTime,
    pub is_favorite: bool,
    pub notifications_enabled: bool,
}
