//! Interval scheduler. Each registered job gets its own tokio task ticking at the job's
//! interval; every tick goes through [`JobTracker::run_once_per_cycle`], so a restart
//! inside a cycle does not repeat a job that already succeeded in it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::ScheduledJob;
use crate::backend::domain::{JobResult, JobTracker, LedgerResult};
use crate::backend::storage::Connection;

/// Start of the interval-aligned cycle containing `now`
pub fn cycle_start(now: DateTime<Utc>, every: Duration) -> DateTime<Utc> {
    let period = every.as_secs().max(1) as i64;
    let seconds = now.timestamp();
    DateTime::<Utc>::from_timestamp(seconds - seconds.rem_euclid(period), 0).unwrap_or(now)
}

struct Registration {
    job: Arc<dyn ScheduledJob>,
    every: Duration,
}

pub struct Scheduler<C: Connection> {
    tracker: JobTracker<C>,
    registrations: Vec<Registration>,
}

impl<C: Connection> Scheduler<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            tracker: JobTracker::new(connection),
            registrations: Vec::new(),
        }
    }

    pub fn register(mut self, job: Arc<dyn ScheduledJob>, every: Duration) -> Self {
        info!("Registered job {} every {:?}", job.name(), every);
        self.registrations.push(Registration { job, every });
        self
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.job.name()).collect()
    }

    /// Run one job for the cycle containing `now`
    pub async fn run_job(
        tracker: &JobTracker<C>,
        job: &dyn ScheduledJob,
        every: Duration,
        now: DateTime<Utc>,
    ) -> LedgerResult<JobResult> {
        let today = now.date_naive();
        tracker
            .run_once_per_cycle(job.name(), cycle_start(now, every), || job.run(today))
            .await
    }

    /// Run every job once, in registration order
    pub async fn run_all_once(&self) -> Vec<LedgerResult<JobResult>> {
        let mut results = Vec::with_capacity(self.registrations.len());
        for registration in &self.registrations {
            results.push(
                Self::run_job(&self.tracker, registration.job.as_ref(), registration.every, Utc::now()).await,
            );
        }
        results
    }

    /// Tick every job on its own interval until `shutdown` resolves. A job that is
    /// running when shutdown arrives finishes before this returns.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for registration in self.registrations {
            let tracker = self.tracker.clone();
            let mut stop_rx = stop_rx.clone();

            tasks.spawn(async move {
                let mut ticker = interval(registration.every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop_rx.changed() => break,
                    }

                    let job = registration.job.as_ref();
                    match Self::run_job(&tracker, job, registration.every, Utc::now()).await {
                        Ok(JobResult::Completed(execution)) => {
                            info!("Job {} finished as {}", job.name(), execution.status.as_str());
                        }
                        Ok(JobResult::Skipped { .. }) => {}
                        Err(e) => error!("Could not record run of job {}: {}", job.name(), e),
                    }
                }
            });
        }

        shutdown.await;
        info!("Shutting down scheduler");
        let _ = stop_tx.send(true);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
    }
}
