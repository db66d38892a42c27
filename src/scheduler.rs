//! Background job scheduling over an injectable clock.
//!
//! `Scheduler::tick` runs every job whose interval has elapsed on the clock;
//! tests drive it with a `ManualClock`, the binary drives it from a tokio
//! interval through `Scheduler::spawn`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::aggregate::AggregateKind;
use crate::config::SchedulerConfig;
use crate::engine::Engine;
use crate::storage::{Error, PointKind, Result};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    Compress(PointKind),
    Refresh(AggregateKind),
    Retention,
}

impl Job {
    pub const ALL: [Job; 6] = [
        Job::Compress(PointKind::Telemetry),
        Job::Compress(PointKind::Progress),
        Job::Refresh(AggregateKind::HourlyDroneStats),
        Job::Refresh(AggregateKind::DailyMissionSummary),
        Job::Refresh(AggregateKind::WeeklyFleetUtilization),
        Job::Retention,
    ];
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Compress(kind) => write!(f, "compress_{kind}"),
            Job::Refresh(kind) => write!(f, "refresh_{kind}"),
            Job::Retention => write!(f, "retention"),
        }
    }
}

/// Run and failure counters of one job type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Stopped between chunks; untouched work is left for the next tick.
    Cancelled,
    Failed(String),
}

pub struct Scheduler {
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    stats: Mutex<BTreeMap<Job, JobStats>>,
    cancel: AtomicBool,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, clock: Arc<dyn Clock>) -> Self {
        let config = engine.config().scheduler.clone();
        Self {
            engine,
            clock,
            config,
            stats: Mutex::new(BTreeMap::new()),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn interval(&self, job: Job) -> TimeDelta {
        match job {
            Job::Compress(_) => self.config.compression_interval,
            Job::Refresh(kind) => self.engine.config().policy(kind).schedule_interval,
            Job::Retention => self.config.retention_interval,
        }
    }

    /// A job is due when it never completed or its interval elapsed since it last did.
    fn is_due(&self, job: Job, now: DateTime<Utc>) -> bool {
        let stats = self.stats.lock();
        match stats.get(&job).and_then(|s| s.last_run) {
            Some(last_run) => now - last_run >= self.interval(job),
            None => true,
        }
    }

    /// Runs every due job once, in a fixed order. Returns the jobs that ran.
    pub fn tick(&self) -> Vec<(Job, JobOutcome)> {
        let now = self.clock.now();
        let mut ran = Vec::new();

        for job in Job::ALL {
            if self.is_cancelled() {
                break;
            }
            if !self.is_due(job, now) {
                continue;
            }
            let outcome = self.run_job(job, now);
            self.record(job, now, &outcome);
            ran.push((job, outcome));
        }
        ran
    }

    /// Runs one job regardless of its schedule. Errors are logged, never propagated.
    pub fn run_job(&self, job: Job, now: DateTime<Utc>) -> JobOutcome {
        if self.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        let result = match job {
            Job::Compress(kind) => {
                let report = self.engine.compress(kind, now, &self.cancel);
                if report.cancelled {
                    log::info!("{} cancelled after {} chunks", job, report.compressed);
                    return JobOutcome::Cancelled;
                }
                log::info!(
                    "{} compressed {} chunks ({} rows)",
                    job,
                    report.compressed,
                    report.rows
                );
                match report.failed {
                    0 => Ok(()),
                    n => Err(Error::TaskFailed(format!("{n} chunks failed to compress"))),
                }
            }
            Job::Refresh(kind) => self.engine.refresh(kind, now).map(|report| {
                log::info!(
                    "{} wrote {} buckets from {} points",
                    job,
                    report.buckets_written,
                    report.points_read
                );
            }),
            Job::Retention => self.engine.enforce_retention(now).map(|report| {
                log::info!(
                    "{} dropped {} telemetry and {} progress chunks",
                    job,
                    report.telemetry.dropped.len(),
                    report.progress.dropped.len()
                );
            }),
        };

        match result {
            Ok(()) => JobOutcome::Completed,
            Err(e) => {
                log::error!("Job {} failed: {}", job, e);
                JobOutcome::Failed(e.to_string())
            }
        }
    }

    /// Only completed runs advance the schedule; failed and cancelled jobs stay due.
    fn record(&self, job: Job, now: DateTime<Utc>, outcome: &JobOutcome) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(job).or_default();
        match outcome {
            JobOutcome::Completed => {
                entry.runs += 1;
                entry.last_run = Some(now);
            }
            JobOutcome::Cancelled => entry.cancellations += 1,
            JobOutcome::Failed(reason) => {
                entry.failures += 1;
                entry.last_error = Some(reason.clone());
            }
        }
    }

    pub fn stats(&self) -> BTreeMap<Job, JobStats> {
        self.stats.lock().clone()
    }

    pub fn job_stats(&self, job: Job) -> JobStats {
        self.stats.lock().get(&job).cloned().unwrap_or_default()
    }

    /// Asks running and future jobs to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.cancel.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Drives `tick` every `tick_period` on the tokio runtime until shutdown.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let scheduler = Arc::clone(&self);
        let period = self.config.tick_period;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&scheduler);
                        let tick = tokio::task::spawn_blocking(move || scheduler.tick());
                        if let Err(e) = tick.await {
                            log::error!("Scheduler tick panicked: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        log::info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        });

        SchedulerHandle {
            scheduler: self,
            shutdown_tx,
            task,
        }
    }
}

pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Cancels the in-flight tick and waits for the runner to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.cancel();
        self.shutdown_tx.send(()).ok();
        self.task
            .await
            .map_err(|e| Error::TaskFailed(format!("scheduler join error: {e}")))
    }
}
