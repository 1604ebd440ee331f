//! Schedule orchestrator: periodic triggers, on-demand refreshes and the
//! administrative cleanup, all built on one failure-isolated fan-out.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::db::models::{ScheduleEntry, Streamer};
use crate::db::{ScheduleRepository, StreamerRepository, TrackingRepository};
use crate::error::{AppResult, SyncError, SyncResult};
use crate::services::auditor::{ActivityAuditor, AuditReport};
use crate::services::clock::Clock;
use crate::services::images::ImageJanitor;
use crate::services::reconciler::{ReconcileOutcome, Reconciler};
use crate::services::retention::{RetentionSweeper, SweepReport};
use crate::services::source::ScheduleSource;
use crate::services::staleness::needs_refresh;
use crate::services::trigger::{Cadence, Trigger, TriggerJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(ReconcileOutcome),
    /// Another refresh of the same streamer was already in flight.
    Skipped,
}

/// Result of one fan-out batch. Every member is counted exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub refreshed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub sweep: SweepReport,
    pub audit: AuditReport,
}

/// Marks a streamer as being refreshed; released on drop.
struct RefreshClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    streamer_id: String,
}

impl Drop for RefreshClaim<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.streamer_id);
    }
}

pub struct Orchestrator {
    pool: SqlitePool,
    source: Arc<dyn ScheduleSource>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    sweeper: RetentionSweeper,
    auditor: ActivityAuditor,
    janitor: ImageJanitor,
    settings: SyncConfig,
    fetch_permits: Semaphore,
    in_flight: Mutex<HashSet<String>>,
    shutdown: broadcast::Sender<()>,
    triggers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn ScheduleSource>,
        clock: Arc<dyn Clock>,
        settings: SyncConfig,
        image_dir: impl Into<PathBuf>,
    ) -> Self {
        let reconciler = Reconciler::new(
            pool.clone(),
            clock.clone(),
            settings.retention(),
            settings.merge_policy,
        );
        let (shutdown, _) = broadcast::channel(1);

        Self {
            sweeper: RetentionSweeper::new(pool.clone(), clock.clone()),
            auditor: ActivityAuditor::new(pool.clone(), clock.clone()),
            janitor: ImageJanitor::new(pool.clone(), image_dir),
            fetch_permits: Semaphore::new(settings.max_concurrent_fetches),
            in_flight: Mutex::new(HashSet::new()),
            triggers: Mutex::new(Vec::new()),
            reconciler,
            shutdown,
            settings,
            pool,
            source,
            clock,
        }
    }

    fn claim(&self, streamer_id: &str) -> Option<RefreshClaim<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(streamer_id.to_string()) {
            return None;
        }
        Some(RefreshClaim {
            in_flight: &self.in_flight,
            streamer_id: streamer_id.to_string(),
        })
    }

    /// Fetch and reconcile one streamer, then record the successful refresh.
    ///
    /// On any error `last_schedule_update` is left untouched so the streamer
    /// is picked up again on the next cadence.
    pub async fn refresh_streamer(&self, streamer: &Streamer) -> SyncResult<RefreshOutcome> {
        let Some(_claim) = self.claim(&streamer.id) else {
            debug!("Refresh of streamer {} already in flight", streamer.id);
            return Ok(RefreshOutcome::Skipped);
        };

        let fetched = {
            let _permit = self
                .fetch_permits
                .acquire()
                .await
                .map_err(|_| SyncError::Orchestration("fetch limiter closed".to_string()))?;
            self.source.fetch_schedule(&streamer.twitch_id).await?
        };

        let outcome = self.reconciler.reconcile(&streamer.id, &fetched).await?;
        StreamerRepository::mark_schedule_updated(
            &self.pool,
            &streamer.id,
            self.clock.now().naive_utc(),
        )
        .await?;

        Ok(RefreshOutcome::Refreshed(outcome))
    }

    /// Refresh every streamer of the batch concurrently. One member failing,
    /// or even panicking, never affects the others; the batch is done when all
    /// members are.
    pub async fn refresh_batch(self: &Arc<Self>, streamers: Vec<Streamer>) -> BatchReport {
        let tasks = streamers.into_iter().map(|streamer| {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let result = this.refresh_streamer(&streamer).await;
                (streamer, result)
            })
        });

        let mut report = BatchReport::default();
        for joined in join_all(tasks).await {
            match joined {
                Ok((_, Ok(RefreshOutcome::Refreshed(_)))) => report.refreshed += 1,
                Ok((_, Ok(RefreshOutcome::Skipped))) => report.skipped += 1,
                Ok((streamer, Err(e))) => {
                    warn!(
                        "Failed to refresh schedule of {} ({}): {}",
                        streamer.display_name, streamer.twitch_id, e
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Schedule refresh task aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Frequent refresh: every active streamer.
    pub async fn refresh_all_active(self: &Arc<Self>) -> SyncResult<BatchReport> {
        let streamers = StreamerRepository::list_active(&self.pool).await?;
        let report = self.refresh_batch(streamers).await;
        info!("Schedule refresh: {:?}", report);
        Ok(report)
    }

    /// On-demand refresh: the user's tracked active streamers that are stale.
    pub async fn refresh_for_user(self: &Arc<Self>, user_id: &str) -> SyncResult<BatchReport> {
        let now = self.clock.now();
        let threshold = self.settings.staleness_threshold();

        let stale: Vec<Streamer> = TrackingRepository::find_tracked_active(&self.pool, user_id)
            .await?
            .into_iter()
            .filter(|s| needs_refresh(s.last_schedule_update.map(|t| t.and_utc()), now, threshold))
            .collect();

        if stale.is_empty() {
            return Ok(BatchReport::default());
        }

        let report = self.refresh_batch(stale).await;
        debug!("On-demand refresh for user {}: {:?}", user_id, report);
        Ok(report)
    }

    /// Schedules of the user's tracked active streamers starting in `[start, end]`,
    /// refreshed first where stale.
    pub async fn get_schedules(
        self: &Arc<Self>,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<ScheduleEntry>> {
        self.refresh_for_user(user_id).await?;
        ScheduleRepository::find_for_user_between(
            &self.pool,
            user_id,
            start.naive_utc(),
            end.naive_utc(),
        )
        .await
    }

    /// Daily retention: sweep, then drop unreferenced images.
    pub async fn run_retention(&self) -> SyncResult<SweepReport> {
        let report = self.sweeper.sweep(self.settings.max_schedule_age_days).await?;
        if let Err(e) = self.janitor.cleanup_unused().await {
            warn!("Unused image cleanup failed: {}", e);
        }
        Ok(report)
    }

    pub async fn run_audit(&self) -> SyncResult<AuditReport> {
        self.auditor.audit().await
    }

    /// Administrative cleanup: retention sweep and activity audit, synchronously.
    pub async fn trigger_cleanup(&self) -> SyncResult<CleanupReport> {
        let sweep = self.sweeper.sweep(self.settings.max_schedule_age_days).await?;
        let audit = self.auditor.audit().await?;
        info!("Manual cleanup finished: {:?} {:?}", sweep, audit);
        Ok(CleanupReport { sweep, audit })
    }

    /// Start the refresh, retention and audit triggers. Calling it again while
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), ConfigError> {
        let mut triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner());
        if !triggers.is_empty() {
            warn!("Orchestrator already started");
            return Ok(());
        }

        let refresh = Cadence::Interval(StdDuration::from_secs(self.settings.refresh_interval_seconds));
        let retention = Cadence::cron(&self.settings.retention_cron, &self.settings.timezone)?;
        let audit = Cadence::cron(&self.settings.audit_cron, &self.settings.timezone)?;

        let this = Arc::clone(self);
        let refresh_job: TriggerJob = Arc::new(move || {
            let this = Arc::clone(&this);
            async move { this.refresh_all_active().await.map(|_| ()) }.boxed()
        });

        let this = Arc::clone(self);
        let retention_job: TriggerJob = Arc::new(move || {
            let this = Arc::clone(&this);
            async move { this.run_retention().await.map(|_| ()) }.boxed()
        });

        let this = Arc::clone(self);
        let audit_job: TriggerJob = Arc::new(move || {
            let this = Arc::clone(&this);
            async move { this.run_audit().await.map(|_| ()) }.boxed()
        });

        for trigger in [
            Trigger::new("schedule-refresh", refresh, self.clock.clone(), refresh_job),
            Trigger::new("retention", retention, self.clock.clone(), retention_job),
            Trigger::new("activity-audit", audit, self.clock.clone(), audit_job),
        ] {
            triggers.push(trigger.spawn(self.shutdown.subscribe()));
        }

        info!("Orchestrator started {} triggers", triggers.len());
        Ok(())
    }

    /// Stop all future trigger firings and hand back the trigger tasks.
    /// Runs already in flight are neither cancelled nor awaited.
    pub fn stop(&self) -> Vec<JoinHandle<()>> {
        // no receivers simply means nothing was started
        let _ = self.shutdown.send(());
        let mut triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *triggers)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::config::Config;
    use crate::db::models::SegmentStatus;
    use crate::services::source::{FetchError, FetchedSegment};
    use crate::test_support::{
        at, fetched, insert_segment, insert_streamer, insert_user, test_pool, FakeSource,
        ManualClock,
    };

    fn orchestrator(
        pool: &SqlitePool,
        source: Arc<dyn ScheduleSource>,
        clock: &Arc<ManualClock>,
    ) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            pool.clone(),
            source,
            clock.clone(),
            Config::default().sync,
            "/nonexistent/images",
        ))
    }

    #[tokio::test]
    async fn failing_streamer_does_not_affect_siblings() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-01 12:00:00");
        let a = insert_streamer(&pool, "a", true).await;
        let b = insert_streamer(&pool, "b", true).await;
        let c = insert_streamer(&pool, "c", true).await;
        let source = Arc::new(
            FakeSource::default()
                .with_schedule("a", vec![fetched("2024-03-02T18:00:00Z", "2024-03-02T20:00:00Z")])
                .failing("b")
                .with_schedule("c", vec![fetched("2024-03-03T18:00:00Z", "2024-03-03T20:00:00Z")]),
        );
        let orch = orchestrator(&pool, source, &clock);

        let report = orch.refresh_batch(vec![a.clone(), b.clone(), c.clone()]).await;

        assert_eq!(
            report,
            BatchReport {
                refreshed: 2,
                failed: 1,
                skipped: 0
            }
        );
        for id in [&a.id, &c.id] {
            assert_eq!(ScheduleRepository::find_by_streamer(&pool, id).await.unwrap().len(), 1);
            let s = StreamerRepository::find_by_id(&pool, id).await.unwrap().unwrap();
            assert_eq!(s.last_schedule_update, Some(at("2024-03-01 12:00:00")));
        }
        let b = StreamerRepository::find_by_id(&pool, &b.id).await.unwrap().unwrap();
        assert!(b.last_schedule_update.is_none());
    }

    #[tokio::test]
    async fn on_demand_refresh_only_fetches_stale_streamers() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-01 12:00:00");
        let user = insert_user(&pool, "alice").await;
        let fresh = insert_streamer(&pool, "fresh", true).await;
        let never = insert_streamer(&pool, "never", true).await;
        let boundary = insert_streamer(&pool, "boundary", true).await;
        insert_streamer(&pool, "untracked", true).await;
        for s in [&fresh, &never, &boundary] {
            TrackingRepository::track(&pool, &user.id, &s.id, at("2024-02-01 00:00:00"))
                .await
                .unwrap();
        }
        StreamerRepository::mark_schedule_updated(&pool, &fresh.id, at("2024-03-01 11:59:00"))
            .await
            .unwrap();
        StreamerRepository::mark_schedule_updated(&pool, &boundary.id, at("2024-03-01 11:57:00"))
            .await
            .unwrap();

        let source = Arc::new(FakeSource::default());
        let orch = orchestrator(&pool, source.clone(), &clock);

        let report = orch.refresh_for_user(&user.id).await.unwrap();

        assert_eq!(report.refreshed, 2);
        let mut calls = source.calls();
        calls.sort();
        assert_eq!(calls, vec!["boundary".to_string(), "never".to_string()]);
    }

    #[tokio::test]
    async fn get_schedules_reads_window_after_refresh() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-01 12:00:00");
        let user = insert_user(&pool, "alice").await;
        let s = insert_streamer(&pool, "s", true).await;
        TrackingRepository::track(&pool, &user.id, &s.id, at("2024-02-01 00:00:00"))
            .await
            .unwrap();
        insert_segment(
            &pool,
            &s.id,
            at("2024-03-02 10:00:00"),
            at("2024-03-02 11:00:00"),
            SegmentStatus::Cancelled,
        )
        .await;
        let source = Arc::new(FakeSource::default().with_schedule(
            "s",
            vec![
                fetched("2024-03-03T18:00:00Z", "2024-03-03T20:00:00Z"),
                fetched("2024-03-02T18:00:00Z", "2024-03-02T20:00:00Z"),
                fetched("2024-03-20T18:00:00Z", "2024-03-20T20:00:00Z"),
            ],
        ));
        let orch = orchestrator(&pool, source, &clock);

        let entries = orch
            .get_schedules(
                &user.id,
                at("2024-03-01 00:00:00").and_utc(),
                at("2024-03-08 00:00:00").and_utc(),
            )
            .await
            .unwrap();

        let starts: Vec<_> = entries.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![at("2024-03-02 18:00:00"), at("2024-03-03 18:00:00")]);
        assert!(entries.iter().all(|e| e.status == "scheduled"));
    }

    struct BlockingSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ScheduleSource for BlockingSource {
        async fn fetch_schedule(&self, _: &str) -> Result<Vec<FetchedSegment>, FetchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn concurrent_refresh_of_same_streamer_is_skipped() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-01 12:00:00");
        let s = insert_streamer(&pool, "s", true).await;
        let source = Arc::new(BlockingSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let orch = orchestrator(&pool, source.clone(), &clock);

        let first = {
            let orch = orch.clone();
            let s = s.clone();
            tokio::spawn(async move { orch.refresh_streamer(&s).await })
        };
        source.entered.notified().await;

        let second = orch.refresh_streamer(&s).await.unwrap();
        assert_eq!(second, RefreshOutcome::Skipped);

        source.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, RefreshOutcome::Refreshed(_)));

        // the claim is released once the first refresh ends
        assert!(orch.claim(&s.id).is_some());
    }

    #[tokio::test]
    async fn trigger_cleanup_sweeps_and_audits() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-20 12:00:00");
        let user = insert_user(&pool, "alice").await;
        let tracked = insert_streamer(&pool, "t", true).await;
        let orphan = insert_streamer(&pool, "o", true).await;
        TrackingRepository::track(&pool, &user.id, &tracked.id, at("2024-02-01 00:00:00"))
            .await
            .unwrap();
        insert_segment(
            &pool,
            &tracked.id,
            at("2024-03-01 10:00:00"),
            at("2024-03-01 12:00:00"),
            SegmentStatus::Completed,
        )
        .await;
        insert_segment(
            &pool,
            &orphan.id,
            at("2024-03-25 10:00:00"),
            at("2024-03-25 12:00:00"),
            SegmentStatus::Scheduled,
        )
        .await;
        let orch = orchestrator(&pool, Arc::new(FakeSource::default()), &clock);

        let report = orch.trigger_cleanup().await.unwrap();

        assert_eq!(report.sweep.deleted, 1);
        assert_eq!(report.audit.deactivated, 1);
        assert_eq!(report.audit.segments_deleted, 1);
    }

    #[tokio::test]
    async fn start_and_stop_triggers() {
        let pool = test_pool().await;
        let clock = ManualClock::at("2024-03-01 12:00:00");
        let orch = orchestrator(&pool, Arc::new(FakeSource::default()), &clock);

        orch.start().unwrap();
        orch.start().unwrap();

        let handles = orch.stop();
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(orch.stop().is_empty());
    }
}
