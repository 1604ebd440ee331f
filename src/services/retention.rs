use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::ScheduleRepository;
use crate::error::{SyncError, SyncResult};
use crate::services::clock::Clock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Completed segments older than the retention window
    pub deleted: u64,
    /// Scheduled or live segments whose end passed
    pub completed: u64,
}

/// Store-wide cleanup of old segments, independent of any fetch.
pub struct RetentionSweeper {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Delete completed segments that ended more than `max_age_days` ago, then
    /// advance every ended scheduled/live segment to completed.
    ///
    /// Segments completed by this sweep are only eligible for deletion on the
    /// next one.
    pub async fn sweep(&self, max_age_days: i64) -> SyncResult<SweepReport> {
        let now = self.clock.now().naive_utc();
        let cutoff = Duration::try_days(max_age_days)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                SyncError::Orchestration(format!("retention of {} days out of range", max_age_days))
            })?;

        let deleted = ScheduleRepository::delete_completed_before(&self.pool, cutoff).await?;
        let completed = ScheduleRepository::complete_ended(&self.pool, now).await?;

        info!(
            "Retention sweep: deleted {} old segments, completed {} ended segments",
            deleted, completed
        );

        Ok(SweepReport { deleted, completed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SegmentStatus;
    use crate::test_support::{at, insert_segment, insert_streamer, test_pool, ManualClock};

    #[tokio::test]
    async fn segment_exactly_at_cutoff_is_retained() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-08 12:00:00");
        let streamer = insert_streamer(&pool, "1", true).await;
        insert_segment(
            &pool,
            &streamer.id,
            at("2024-03-01 10:00:00"),
            at("2024-03-01 12:00:00"),
            SegmentStatus::Completed,
        )
        .await;
        insert_segment(
            &pool,
            &streamer.id,
            at("2024-03-01 08:00:00"),
            at("2024-03-01 11:59:59"),
            SegmentStatus::Completed,
        )
        .await;

        let report = RetentionSweeper::new(pool.clone(), clock)
            .sweep(7)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        let rows = ScheduleRepository::find_by_streamer(&pool, &streamer.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].end_time, at("2024-03-01 12:00:00"));
    }

    #[tokio::test]
    async fn old_scheduled_segment_is_completed_not_deleted() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-20 12:00:00");
        let streamer = insert_streamer(&pool, "1", true).await;
        insert_segment(
            &pool,
            &streamer.id,
            at("2024-03-01 10:00:00"),
            at("2024-03-01 12:00:00"),
            SegmentStatus::Scheduled,
        )
        .await;
        insert_segment(
            &pool,
            &streamer.id,
            at("2024-03-20 11:00:00"),
            at("2024-03-20 13:00:00"),
            SegmentStatus::Live,
        )
        .await;

        let sweeper = RetentionSweeper::new(pool.clone(), clock);
        let report = sweeper.sweep(7).await.unwrap();

        assert_eq!(report, SweepReport { deleted: 0, completed: 1 });
        let rows = ScheduleRepository::find_by_streamer(&pool, &streamer.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status(), Some(SegmentStatus::Completed));
        // still running
        assert_eq!(rows[1].status(), Some(SegmentStatus::Live));

        // the next sweep removes what the previous one completed
        let report = sweeper.sweep(7).await.unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn sweep_covers_every_streamer() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-20 12:00:00");
        let active = insert_streamer(&pool, "1", true).await;
        let inactive = insert_streamer(&pool, "2", false).await;
        for streamer in [&active, &inactive] {
            insert_segment(
                &pool,
                &streamer.id,
                at("2024-03-01 10:00:00"),
                at("2024-03-01 12:00:00"),
                SegmentStatus::Completed,
            )
            .await;
            insert_segment(
                &pool,
                &streamer.id,
                at("2024-03-20 08:00:00"),
                at("2024-03-20 10:00:00"),
                SegmentStatus::Scheduled,
            )
            .await;
        }

        let report = RetentionSweeper::new(pool.clone(), clock)
            .sweep(7)
            .await
            .unwrap();

        assert_eq!(report, SweepReport { deleted: 2, completed: 2 });
        for streamer in [&active, &inactive] {
            let rows = ScheduleRepository::find_by_streamer(&pool, &streamer.id)
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].status(), Some(SegmentStatus::Completed));
        }
    }

    #[tokio::test]
    async fn out_of_range_retention_is_an_error() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-20 12:00:00");
        let streamer = insert_streamer(&pool, "1", true).await;
        insert_segment(
            &pool,
            &streamer.id,
            at("2024-03-01 10:00:00"),
            at("2024-03-01 12:00:00"),
            SegmentStatus::Completed,
        )
        .await;

        let sweeper = RetentionSweeper::new(pool.clone(), clock);
        for days in [1_000_000_000, i64::MAX] {
            assert!(matches!(
                sweeper.sweep(days).await,
                Err(SyncError::Orchestration(_))
            ));
        }

        let rows = ScheduleRepository::find_by_streamer(&pool, &streamer.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
