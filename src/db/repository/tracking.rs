use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Streamer, TrackedStreamer, UpdatePreferences, UserStreamer};
use crate::error::{AppError, AppResult};

/// Repository for the `user_streamers` relation (the tracking store).
pub struct TrackingRepository;

impl TrackingRepository {
    /// Number of users tracking a streamer.
    pub async fn tracker_count(pool: &SqlitePool, streamer_id: &str) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_streamers WHERE streamer_id = ?")
                .bind(streamer_id)
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;
        Ok(count)
    }

    /// Active streamers tracked by a user.
    pub async fn find_tracked_active(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Streamer>> {
        sqlx::query_as::<_, Streamer>(
            r#"
            SELECT
                st.id, st.twitch_id, st.display_name, st.profile_image_url,
                st.compressed_image_url, st.is_active, st.last_schedule_update,
                st.created_at, st.updated_at
            FROM streamers st
            INNER JOIN user_streamers us ON us.streamer_id = st.id
            WHERE us.user_id = ? AND st.is_active = 1
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Streamers tracked by a user, with preferences, favorites first.
    pub async fn list_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<TrackedStreamer>> {
        sqlx::query_as::<_, TrackedStreamer>(
            r#"
            SELECT
                st.id AS streamer_id, st.twitch_id, st.display_name,
                st.profile_image_url, st.compressed_image_url, st.is_active,
                us.followed_at, us.is_favorite, us.notifications_enabled
            FROM user_streamers us
            INNER JOIN streamers st ON st.id = us.streamer_id
            WHERE us.user_id = ?
            ORDER BY us.is_favorite DESC, st.display_name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Start tracking. Tracking an already tracked streamer is a no-op that
    /// returns the existing row.
    pub async fn track(
        pool: &SqlitePool,
        user_id: &str,
        streamer_id: &str,
        now: NaiveDateTime,
    ) -> AppResult<UserStreamer> {
        sqlx::query_as::<_, UserStreamer>(
            r#"
            INSERT INTO user_streamers (id, user_id, streamer_id, followed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, streamer_id) DO UPDATE SET user_id = excluded.user_id
            RETURNING id, user_id, streamer_id, followed_at, is_favorite, notifications_enabled
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(streamer_id)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Stop tracking. Returns whether a row was removed.
    pub async fn untrack(pool: &SqlitePool, user_id: &str, streamer_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM user_streamers WHERE user_id = ? AND streamer_id = ?")
            .bind(user_id)
            .bind(streamer_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a partial preferences update; `None` when the user does not track the streamer.
    pub async fn update_preferences(
        pool: &SqlitePool,
        user_id: &str,
        streamer_id: &str,
        update: &UpdatePreferences,
    ) -> AppResult<Option<UserStreamer>> {
        sqlx::query_as::<_, UserStreamer>(
            r#"
            UPDATE user_streamers
            SET is_favorite = COALESCE(?, is_favorite),
                notifications_enabled = COALESCE(?, notifications_enabled)
            WHERE user_id = ? AND streamer_id = ?
            RETURNING id, user_id, streamer_id, followed_at, is_favorite, notifications_enabled
            "#,
        )
        .bind(update.is_favorite)
        .bind(update.notifications_enabled)
        .bind(user_id)
        .bind(streamer_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
