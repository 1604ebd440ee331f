//! Periodic triggers owned by the orchestrator.
//!
//! A [`Trigger`] sleeps until its next firing, runs its job on a separate task
//! and goes back to sleep. A firing that finds the previous run of the same
//! trigger still in flight is skipped. Shutdown stops future firings only;
//! a job that already started runs to completion.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::error::SyncResult;
use crate::services::clock::Clock;

/// When a trigger fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period, first firing one period after start.
    Interval(Duration),
    /// Cron expression (with seconds field) evaluated in `tz`.
    Cron { schedule: cron::Schedule, tz: Tz },
}

impl Cadence {
    pub fn cron(expression: &str, timezone: &str) -> Result<Self, ConfigError> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|_| ConfigError::InvalidValue(format!("cron expression '{}'", expression)))?;
        let tz: Tz = timezone
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("timezone '{}'", timezone)))?;
        Ok(Cadence::Cron { schedule, tz })
    }

    /// Time to wait from `now` until the next firing; `None` when the cron
    /// schedule has no future occurrence.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Cadence::Interval(period) => Some(*period),
            Cadence::Cron { schedule, tz } => {
                let next = schedule.after(&now.with_timezone(tz)).next()?;
                (next.with_timezone(&Utc) - now).to_std().ok()
            }
        }
    }
}

pub type TriggerJob = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

pub struct Trigger {
    name: &'static str,
    cadence: Cadence,
    clock: Arc<dyn Clock>,
    job: TriggerJob,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the run ends, including by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Trigger {
    pub fn new(name: &'static str, cadence: Cadence, clock: Arc<dyn Clock>, job: TriggerJob) -> Self {
        Self {
            name,
            cadence,
            clock,
            job,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the trigger loop until a shutdown message arrives.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Trigger '{}' started ({:?})", self.name, self.cadence);
            loop {
                let Some(delay) = self.cadence.next_delay(self.clock.now()) else {
                    warn!("Trigger '{}' has no upcoming firing, stopping", self.name);
                    break;
                };

                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Trigger '{}' shutting down", self.name);
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                self.fire();
            }
        })
    }

    fn fire(&self) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!(
                "Trigger '{}' fired while its previous run is still in flight, skipping",
                self.name
            );
            return;
        }

        let guard = InFlight(self.in_flight.clone());
        let name = self.name;
        let run = tokio::spawn((self.job)());

        tokio::spawn(async move {
            let _guard = guard;
            match run.await {
                Ok(Ok(())) => debug!("Trigger '{}' run finished", name),
                Ok(Err(e)) => error!("Trigger '{}' run failed: {}", name, e),
                Err(e) => error!("Trigger '{}' run aborted: {}", name, e),
            }
        });
    }
}
