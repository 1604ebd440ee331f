use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::db::models::Streamer;
use crate::db::{ScheduleRepository, StreamerRepository, TrackingRepository};
use crate::error::{AppResult, SyncResult};
use crate::services::clock::Clock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub checked: usize,
    pub deactivated: usize,
    pub segments_deleted: u64,
    /// Streamers whose check failed; they are retried on the next audit.
    pub failed: usize,
}

/// Deactivates streamers nobody tracks any more and drops their schedules.
pub struct ActivityAuditor {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl ActivityAuditor {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Check every known streamer. A failure on one streamer is logged and
    /// does not stop the others.
    pub async fn audit(&self) -> SyncResult<AuditReport> {
        let streamers = StreamerRepository::list_all(&self.pool).await?;
        let mut report = AuditReport::default();

        for streamer in &streamers {
            report.checked += 1;
            match self.audit_streamer(streamer).await {
                Ok(Some(deleted)) => {
                    if streamer.is_active {
                        report.deactivated += 1;
                    }
                    report.segments_deleted += deleted;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to audit streamer {}: {}", streamer.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Activity audit: checked {}, deactivated {}, deleted {} segments, {} failed",
            report.checked, report.deactivated, report.segments_deleted, report.failed
        );

        Ok(report)
    }

    /// Returns the number of deleted segments when the streamer has no trackers.
    async fn audit_streamer(&self, streamer: &Streamer) -> AppResult<Option<u64>> {
        let trackers = TrackingRepository::tracker_count(&self.pool, &streamer.id).await?;
        if trackers > 0 {
            return Ok(None);
        }

        if streamer.is_active {
            StreamerRepository::deactivate(&self.pool, &streamer.id, self.clock.now().naive_utc())
                .await?;
        }
        let deleted = ScheduleRepository::delete_for_streamer(&self.pool, &streamer.id).await?;

        if streamer.is_active {
            info!(
                "Deactivated untracked streamer {} ({}), removed {} segments",
                streamer.display_name, streamer.twitch_id, deleted
            );
        }
        Ok(Some(deleted))
    }
}
