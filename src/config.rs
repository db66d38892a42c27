use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;

use crate::aggregate::{AggregateKind, MAX_AGGREGATE_ROWS, RefreshPolicy};
use crate::storage::{Compression, PointKind, StorageConfig};

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Telemetry chunk store (default: 1 day chunks, compress after 1 day, retain 90 days)
    pub telemetry: StorageConfig,

    /// Mission progress chunk store
    /// (default: 1 hour chunks, compress after 6 hours, retain 30 days)
    pub progress: StorageConfig,

    pub hourly_drone_stats: RefreshPolicy,
    pub daily_mission_summary: RefreshPolicy,
    pub weekly_fleet_utilization: RefreshPolicy,

    /// Background job cadence
    pub scheduler: SchedulerConfig,

    /// Maximum rows returned by one aggregate read (default: 1000)
    pub max_aggregate_rows: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due chunks are compressed (default: 1h)
    pub compression_interval: TimeDelta,

    /// How often retention runs (default: 24h)
    pub retention_interval: TimeDelta,

    /// Wall-clock period of the background runner's tick (default: 60s)
    pub tick_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            compression_interval: TimeDelta::hours(1),
            retention_interval: TimeDelta::hours(24),
            tick_period: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn compression_interval(mut self, interval: TimeDelta) -> Self {
        self.compression_interval = interval;
        self
    }

    pub fn retention_interval(mut self, interval: TimeDelta) -> Self {
        self.retention_interval = interval;
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            telemetry: StorageConfig::telemetry(),
            progress: StorageConfig::progress(),
            hourly_drone_stats: RefreshPolicy::hourly(),
            daily_mission_summary: RefreshPolicy::daily(),
            weekly_fleet_utilization: RefreshPolicy::weekly(),
            scheduler: SchedulerConfig::default(),
            max_aggregate_rows: MAX_AGGREGATE_ROWS,
        }
    }
}

impl EngineConfig {
    pub fn storage(&self, kind: PointKind) -> &StorageConfig {
        match kind {
            PointKind::Telemetry => &self.telemetry,
            PointKind::Progress => &self.progress,
        }
    }

    pub fn policy(&self, kind: AggregateKind) -> &RefreshPolicy {
        match kind {
            AggregateKind::HourlyDroneStats => &self.hourly_drone_stats,
            AggregateKind::DailyMissionSummary => &self.daily_mission_summary,
            AggregateKind::WeeklyFleetUtilization => &self.weekly_fleet_utilization,
        }
    }

    pub fn telemetry(mut self, config: StorageConfig) -> Self {
        self.telemetry = config;
        self
    }

    pub fn progress(mut self, config: StorageConfig) -> Self {
        self.progress = config;
        self
    }

    pub fn refresh_policy(mut self, kind: AggregateKind, policy: RefreshPolicy) -> Self {
        match kind {
            AggregateKind::HourlyDroneStats => self.hourly_drone_stats = policy,
            AggregateKind::DailyMissionSummary => self.daily_mission_summary = policy,
            AggregateKind::WeeklyFleetUtilization => self.weekly_fleet_utilization = policy,
        }
        self
    }

    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn max_aggregate_rows(mut self, limit: usize) -> Self {
        self.max_aggregate_rows = limit;
        self
    }

    /// Spill compressed segments of both point kinds under `dir`.
    pub fn spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.telemetry = self.telemetry.spill_path(dir.join("telemetry"));
        self.progress = self.progress.spill_path(dir.join("progress"));
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.telemetry = self.telemetry.compression(compression.clone());
        self.progress = self.progress.compression(compression);
        self
    }
}
