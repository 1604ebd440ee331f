//! Merges one streamer's freshly fetched schedule into the schedule store.
//!
//! Each run goes through three phases, always in this order:
//! 1. expiry pre-pass: `scheduled` segments whose end passed become `completed`;
//! 2. merge: every valid fetched segment is upserted by `(streamer, start_time)`;
//! 3. retention: this streamer's `completed` segments past the retention
//!    window are deleted.
//!
//! Store errors abort the run and propagate; isolating them from other
//! streamers is the orchestrator's job.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::models::{SegmentStatus, UpsertSegment};
use crate::db::ScheduleRepository;
use crate::error::{SyncError, SyncResult};
use crate::services::clock::Clock;
use crate::services::source::FetchedSegment;

/// What the merge step does to the status of a segment the source reports again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The source is authoritative: a reported segment is `scheduled` again
    /// (or `cancelled` if the source says so), even if it was completed.
    #[default]
    TrustSource,
    /// Stored lifecycle progress wins: `completed`/`cancelled` stay terminal
    /// and `live` is not reset to `scheduled`. Descriptive fields still refresh.
    PreserveTerminal,
}

impl MergePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trust_source" => Some(MergePolicy::TrustSource),
            "preserve_terminal" => Some(MergePolicy::PreserveTerminal),
            _ => None,
        }
    }
}

/// A fetched segment with unusable timing data; it is skipped, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid start time '{0}'")]
    StartTime(String),

    #[error("missing end time")]
    MissingEndTime,

    #[error("invalid end time '{0}'")]
    EndTime(String),

    #[error("end time {end} is not after start time {start}")]
    EmptyWindow {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

fn parse_rfc3339_to_naive(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}

/// Turn a fetched segment into store input, rejecting bad timing data.
pub fn validate_segment(segment: &FetchedSegment) -> Result<UpsertSegment, ValidationError> {
    let start_time = parse_rfc3339_to_naive(&segment.start_time)
        .ok_or_else(|| ValidationError::StartTime(segment.start_time.clone()))?;

    let raw_end = segment
        .end_time
        .as_deref()
        .ok_or(ValidationError::MissingEndTime)?;
    let end_time =
        parse_rfc3339_to_naive(raw_end).ok_or_else(|| ValidationError::EndTime(raw_end.to_string()))?;

    if end_time <= start_time {
        return Err(ValidationError::EmptyWindow {
            start: start_time,
            end: end_time,
        });
    }

    Ok(UpsertSegment {
        title: segment.title.clone(),
        category: segment.category.clone(),
        category_image_url: segment.category_image_url.clone(),
        start_time,
        end_time,
        is_recurring: segment.is_recurring,
        status: if segment.is_canceled {
            SegmentStatus::Cancelled
        } else {
            SegmentStatus::Scheduled
        },
    })
}

/// Counters of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Segments moved to `completed` by the expiry pre-pass
    pub expired: u64,
    pub upserted: usize,
    /// Fetched segments rejected by validation
    pub invalid: usize,
    /// Completed segments removed by the retention pass
    pub purged: u64,
}

pub struct Reconciler {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    retention: Duration,
    policy: MergePolicy,
}

impl Reconciler {
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        retention: Duration,
        policy: MergePolicy,
    ) -> Self {
        Self {
            pool,
            clock,
            retention,
            policy,
        }
    }

    pub async fn reconcile(
        &self,
        streamer_id: &str,
        fetched: &[FetchedSegment],
    ) -> SyncResult<ReconcileOutcome> {
        let now = self.clock.now().naive_utc();
        let cutoff = now.checked_sub_signed(self.retention).ok_or_else(|| {
            SyncError::Orchestration(format!("retention window {} out of range", self.retention))
        })?;
        let mut outcome = ReconcileOutcome::default();

        outcome.expired =
            ScheduleRepository::complete_expired_for_streamer(&self.pool, streamer_id, now).await?;

        for segment in fetched {
            let upsert = match validate_segment(segment) {
                Ok(u) => u,
                Err(e) => {
                    warn!(
                        "Skipping segment '{}' of streamer {}: {}",
                        segment.title, streamer_id, e
                    );
                    outcome.invalid += 1;
                    continue;
                }
            };

            ScheduleRepository::upsert(&self.pool, streamer_id, &upsert, self.policy, now).await?;
            outcome.upserted += 1;
        }

        outcome.purged =
            ScheduleRepository::delete_completed_for_streamer_before(&self.pool, streamer_id, cutoff)
                .await?;

        debug!("Reconciled streamer {}: {:?}", streamer_id, outcome);
        Ok(outcome)
    }
}
