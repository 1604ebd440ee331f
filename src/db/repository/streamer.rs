use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateStreamer, Streamer};
use crate::error::{AppError, AppResult};

const STREAMER_COLUMNS: &str = r#"
    id, twitch_id, display_name, profile_image_url, compressed_image_url,
    is_active, last_schedule_update, created_at, updated_at
"#;

// ============================================================================
// Streamer Repository
// ============================================================================

pub struct StreamerRepository;

impl StreamerRepository {
    #[cfg(test)]
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Streamer>> {
        let sql = format!("SELECT {STREAMER_COLUMNS} FROM streamers WHERE id = ?");
        sqlx::query_as::<_, Streamer>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Return the streamer for `create.twitch_id`, creating it on first reference.
    ///
    /// An existing but deactivated streamer is reactivated; its schedule was
    /// dropped on deactivation, so it starts from an empty history.
    pub async fn get_or_create(
        pool: &SqlitePool,
        create: &CreateStreamer,
        now: NaiveDateTime,
    ) -> AppResult<Streamer> {
        let sql = format!(
            r#"
            INSERT INTO streamers (
                id, twitch_id, display_name, profile_image_url, compressed_image_url,
                is_active, last_schedule_update, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, NULL, 1, NULL, ?, ?)
            ON CONFLICT(twitch_id) DO UPDATE SET
                display_name = excluded.display_name,
                profile_image_url = COALESCE(excluded.profile_image_url, streamers.profile_image_url),
                is_active = 1,
                updated_at = excluded.updated_at
            RETURNING {STREAMER_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Streamer>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(&create.twitch_id)
            .bind(&create.display_name)
            .bind(&create.profile_image_url)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_active(pool: &SqlitePool) -> AppResult<Vec<Streamer>> {
        let sql = format!(
            "SELECT {STREAMER_COLUMNS} FROM streamers WHERE is_active = 1 ORDER BY display_name"
        );
        sqlx::query_as::<_, Streamer>(&sql)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Streamer>> {
        let sql = format!("SELECT {STREAMER_COLUMNS} FROM streamers ORDER BY display_name");
        sqlx::query_as::<_, Streamer>(&sql)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn deactivate(pool: &SqlitePool, id: &str, now: NaiveDateTime) -> AppResult<()> {
        sqlx::query("UPDATE streamers SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Record a successful schedule refresh.
    pub async fn mark_schedule_updated(
        pool: &SqlitePool,
        id: &str,
        at: NaiveDateTime,
    ) -> AppResult<()> {
        sqlx::query("UPDATE streamers SET last_schedule_update = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Every compressed image path still referenced by a streamer.
    pub async fn list_compressed_image_urls(pool: &SqlitePool) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT compressed_image_url FROM streamers WHERE compressed_image_url IS NOT NULL",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}
