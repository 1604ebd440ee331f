use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{ScheduleEntry, ScheduleSegment, UpsertSegment};
use crate::error::{AppError, AppResult};
use crate::services::reconciler::MergePolicy;

const SEGMENT_COLUMNS: &str = r#"
    id, streamer_id, title, category, category_image_url,
    start_time, end_time, is_recurring, status, created_at, updated_at
"#;

/// Status written on conflict when the source is trusted as-is.
const STATUS_FROM_SOURCE: &str = "excluded.status";

/// Status written on conflict when stored lifecycle progress must not move backwards.
const STATUS_PRESERVING_PROGRESS: &str = r#"
    CASE
        WHEN schedule_segments.status IN ('completed', 'cancelled') THEN schedule_segments.status
        WHEN schedule_segments.status = 'live' THEN 'live'
        ELSE excluded.status
    END
"#;

/// Repository for the `schedule_segments` table (the schedule store).
///
/// Every method is a single statement, so each call is atomic on its own.
pub struct ScheduleRepository;

impl ScheduleRepository {
    /// Insert or update the segment identified by `(streamer_id, start_time)`.
    ///
    /// On conflict the descriptive fields are overwritten; how the status is
    /// written depends on `policy`.
    pub async fn upsert(
        pool: &SqlitePool,
        streamer_id: &str,
        segment: &UpsertSegment,
        policy: MergePolicy,
        now: NaiveDateTime,
    ) -> AppResult<ScheduleSegment> {
        let status_expr = match policy {
            MergePolicy::TrustSource => STATUS_FROM_SOURCE,
            MergePolicy::PreserveTerminal => STATUS_PRESERVING_PROGRESS,
        };

        let sql = format!(
            r#"
            INSERT INTO schedule_segments (
                id, streamer_id, title, category, category_image_url,
                start_time, end_time, is_recurring, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(streamer_id, start_time) DO UPDATE SET
                title = excluded.title,
                category = excluded.category,
                category_image_url = excluded.category_image_url,
                end_time = excluded.end_time,
                is_recurring = excluded.is_recurring,
                status = {status_expr},
                updated_at = excluded.updated_at
            RETURNING {SEGMENT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, ScheduleSegment>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(streamer_id)
            .bind(&segment.title)
            .bind(&segment.category)
            .bind(&segment.category_image_url)
            .bind(segment.start_time)
            .bind(segment.end_time)
            .bind(segment.is_recurring)
            .bind(segment.status.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Mark one streamer's `scheduled` segments that ended before `now` as `completed`.
    pub async fn complete_expired_for_streamer(
        pool: &SqlitePool,
        streamer_id: &str,
        now: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE schedule_segments
            SET status = 'completed', updated_at = ?
            WHERE streamer_id = ? AND status = 'scheduled' AND end_time < ?
            "#,
        )
        .bind(now)
        .bind(streamer_id)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Mark every `scheduled` or `live` segment that ended before `now` as
    /// `completed`, across all streamers.
    pub async fn complete_ended(pool: &SqlitePool, now: NaiveDateTime) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE schedule_segments
            SET status = 'completed', updated_at = ?
            WHERE status IN ('scheduled', 'live') AND end_time < ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete one streamer's `completed` segments that ended strictly before `cutoff`.
    pub async fn delete_completed_for_streamer_before(
        pool: &SqlitePool,
        streamer_id: &str,
        cutoff: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM schedule_segments
            WHERE streamer_id = ? AND status = 'completed' AND end_time < ?
            "#,
        )
        .bind(streamer_id)
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete every `completed` segment that ended strictly before `cutoff`.
    pub async fn delete_completed_before(
        pool: &SqlitePool,
        cutoff: NaiveDateTime,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM schedule_segments WHERE status = 'completed' AND end_time < ?",
        )
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete all segments of a streamer regardless of status.
    pub async fn delete_for_streamer(pool: &SqlitePool, streamer_id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM schedule_segments WHERE streamer_id = ?")
            .bind(streamer_id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// All segments of one streamer, ordered by start time.
    #[cfg(test)]
    pub async fn find_by_streamer(
        pool: &SqlitePool,
        streamer_id: &str,
    ) -> AppResult<Vec<ScheduleSegment>> {
        let sql = format!(
            "SELECT {SEGMENT_COLUMNS} FROM schedule_segments WHERE streamer_id = ? ORDER BY start_time ASC"
        );

        let rows = sqlx::query_as::<_, ScheduleSegment>(&sql)
            .bind(streamer_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Upcoming or running segments of the active streamers a user tracks,
    /// starting within `[start, end]`, ordered by start time.
    pub async fn find_for_user_between(
        pool: &SqlitePool,
        user_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> AppResult<Vec<ScheduleEntry>> {
        let rows = sqlx::query_as::<_, ScheduleEntry>(
            r#"
            SELECT
                seg.id,
                seg.streamer_id,
                st.twitch_id AS streamer_twitch_id,
                st.display_name AS streamer_display_name,
                COALESCE(st.compressed_image_url, st.profile_image_url) AS streamer_image_url,
                seg.title,
                seg.category,
                seg.category_image_url,
                seg.start_time,
                seg.end_time,
                seg.is_recurring,
                seg.status
            FROM schedule_segments seg
            INNER JOIN streamers st ON st.id = seg.streamer_id AND st.is_active = 1
            INNER JOIN user_streamers us ON us.streamer_id = st.id
            WHERE us.user_id = ?
              AND seg.start_time BETWEEN ? AND ?
              AND seg.status IN ('scheduled', 'live')
            ORDER BY seg.start_time ASC
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SegmentStatus;
    use crate::test_support::{at, insert_streamer, test_pool};

    fn segment(start: NaiveDateTime, end: NaiveDateTime, title: &str) -> UpsertSegment {
        UpsertSegment {
            title: title.to_string(),
            category: Some("Just Chatting".to_string()),
            category_image_url: None,
            start_time: start,
            end_time: end,
            is_recurring: false,
            status: SegmentStatus::Scheduled,
        }
    }

    #[tokio::test]
    async fn upsert_keys_on_streamer_and_start_time() {
        let pool = test_pool().await;
        let streamer = insert_streamer(&pool, "100", true).await;
        let now = at("2024-03-01 12:00:00");

        let first = ScheduleRepository::upsert(
            &pool,
            &streamer.id,
            &segment(at("2024-03-02 18:00:00"), at("2024-03-02 20:00:00"), "old"),
            MergePolicy::TrustSource,
            now,
        )
        .await
        .unwrap();

        let second = ScheduleRepository::upsert(
            &pool,
            &streamer.id,
            &segment(at("2024-03-02 18:00:00"), at("2024-03-02 21:00:00"), "new"),
            MergePolicy::TrustSource,
            now,
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.title, "new");
        assert_eq!(second.end_time, at("2024-03-02 21:00:00"));

        let rows = ScheduleRepository::find_by_streamer(&pool, &streamer.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn schema_rejects_segment_ending_before_it_starts() {
        let pool = test_pool().await;
        let streamer = insert_streamer(&pool, "100", true).await;

        let result = ScheduleRepository::upsert(
            &pool,
            &streamer.id,
            &segment(at("2024-03-02 18:00:00"), at("2024-03-02 18:00:00"), "empty"),
            MergePolicy::TrustSource,
            at("2024-03-01 12:00:00"),
        )
        .await;

        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn preserving_policy_keeps_terminal_status() {
        let pool = test_pool().await;
        let streamer = insert_streamer(&pool, "100", true).await;
        let seg = segment(at("2024-03-02 18:00:00"), at("2024-03-02 20:00:00"), "t");
        let now = at("2024-03-03 00:00:00");

        ScheduleRepository::upsert(&pool, &streamer.id, &seg, MergePolicy::TrustSource, now)
            .await
            .unwrap();
        ScheduleRepository::complete_expired_for_streamer(&pool, &streamer.id, now)
            .await
            .unwrap();

        let kept =
            ScheduleRepository::upsert(&pool, &streamer.id, &seg, MergePolicy::PreserveTerminal, now)
                .await
                .unwrap();
        assert_eq!(kept.status(), Some(SegmentStatus::Completed));

        let reset =
            ScheduleRepository::upsert(&pool, &streamer.id, &seg, MergePolicy::TrustSource, now)
                .await
                .unwrap();
        assert_eq!(reset.status(), Some(SegmentStatus::Scheduled));
    }
}
