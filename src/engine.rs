use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{
    AggregateKind, ContinuousAggregate, DailyMissionSummary, FleetDirectory, HourlyDroneStats,
    RefreshReport, WeeklyFleetUtilization,
};
use crate::config::EngineConfig;
use crate::query::{Granularity, QueryFilter, QueryResult, QueryRouter};
use crate::storage::{
    CompressionReport, DropReport, PointKind, ProgressInput, ProgressKey, ProgressPoint, Result,
    Table, TableStats, TelemetryInput, TelemetryKey, TelemetryPoint, Validate,
};

/// Everything one retention pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub telemetry: DropReport,
    pub progress: DropReport,
    pub aggregate_buckets: BTreeMap<AggregateKind, usize>,
}

/// Both chunk stores and the rollups maintained over them.
pub struct Engine {
    config: EngineConfig,
    telemetry: Table<TelemetryPoint>,
    progress: Table<ProgressPoint>,
    hourly_drone_stats: ContinuousAggregate<HourlyDroneStats>,
    daily_mission_summary: ContinuousAggregate<DailyMissionSummary>,
    weekly_fleet_utilization: ContinuousAggregate<WeeklyFleetUtilization>,
}

impl Engine {
    pub fn new(config: EngineConfig, fleets: Arc<dyn FleetDirectory>) -> Result<Self> {
        Ok(Self {
            telemetry: Table::new(config.telemetry.clone())?,
            progress: Table::new(config.progress.clone())?,
            hourly_drone_stats: ContinuousAggregate::new(
                HourlyDroneStats,
                config.hourly_drone_stats.clone(),
            ),
            daily_mission_summary: ContinuousAggregate::new(
                DailyMissionSummary,
                config.daily_mission_summary.clone(),
            ),
            weekly_fleet_utilization: ContinuousAggregate::new(
                WeeklyFleetUtilization::new(fleets),
                config.weekly_fleet_utilization.clone(),
            ),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Table<TelemetryPoint> {
        &self.telemetry
    }

    pub fn progress(&self) -> &Table<ProgressPoint> {
        &self.progress
    }

    pub fn hourly_drone_stats(&self) -> &ContinuousAggregate<HourlyDroneStats> {
        &self.hourly_drone_stats
    }

    pub fn daily_mission_summary(&self) -> &ContinuousAggregate<DailyMissionSummary> {
        &self.daily_mission_summary
    }

    pub fn weekly_fleet_utilization(&self) -> &ContinuousAggregate<WeeklyFleetUtilization> {
        &self.weekly_fleet_utilization
    }

    pub fn insert_telemetry(&self, input: &TelemetryInput) -> Result<TelemetryPoint> {
        ingest(&self.telemetry, input)
    }

    pub fn insert_progress(&self, input: &ProgressInput) -> Result<ProgressPoint> {
        ingest(&self.progress, input)
    }

    pub fn delete_telemetry(&self, time: DateTime<Utc>, drone_id: i32) -> Result<TelemetryPoint> {
        self.telemetry.delete(&TelemetryKey { time, drone_id })
    }

    pub fn delete_progress(
        &self,
        time: DateTime<Utc>,
        mission_id: i32,
        drone_id: i32,
    ) -> Result<ProgressPoint> {
        self.progress.delete(&ProgressKey {
            time,
            mission_id,
            drone_id,
        })
    }

    /// Compresses every chunk of `kind` that is due at `now`.
    pub fn compress(
        &self,
        kind: PointKind,
        now: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> CompressionReport {
        match kind {
            PointKind::Telemetry => self.telemetry.compress_due(now, cancel),
            PointKind::Progress => self.progress.compress_due(now, cancel),
        }
    }

    /// Drops expired raw chunks and aggregate buckets. One failing aggregate
    /// does not keep the others from being pruned; the first error is returned
    /// after every target has been visited.
    pub fn enforce_retention(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let mut report = RetentionReport {
            telemetry: self.telemetry.enforce_retention(now),
            progress: self.progress.enforce_retention(now),
            ..Default::default()
        };

        let mut failure = None;
        for kind in AggregateKind::ALL {
            let dropped = match kind {
                AggregateKind::HourlyDroneStats => self.hourly_drone_stats.drop_expired(now),
                AggregateKind::DailyMissionSummary => self.daily_mission_summary.drop_expired(now),
                AggregateKind::WeeklyFleetUtilization => {
                    self.weekly_fleet_utilization.drop_expired(now)
                }
            };
            match dropped {
                Ok(n) => {
                    report.aggregate_buckets.insert(kind, n);
                }
                Err(e) => {
                    log::error!("Failed to enforce retention on {}: {}", kind, e);
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    pub fn refresh(&self, kind: AggregateKind, now: DateTime<Utc>) -> Result<RefreshReport> {
        match kind {
            AggregateKind::HourlyDroneStats => {
                self.hourly_drone_stats.refresh(&self.telemetry, now)
            }
            AggregateKind::DailyMissionSummary => {
                self.daily_mission_summary.refresh(&self.progress, now)
            }
            AggregateKind::WeeklyFleetUtilization => {
                self.weekly_fleet_utilization.refresh(&self.telemetry, now)
            }
        }
    }

    /// Explicit repair of rollup buckets overlapping `[start, end)`.
    pub fn backfill(
        &self,
        kind: AggregateKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        match kind {
            AggregateKind::HourlyDroneStats => {
                self.hourly_drone_stats.backfill(&self.telemetry, start, end, now)
            }
            AggregateKind::DailyMissionSummary => {
                self.daily_mission_summary.backfill(&self.progress, start, end, now)
            }
            AggregateKind::WeeklyFleetUtilization => {
                self.weekly_fleet_utilization.backfill(&self.telemetry, start, end, now)
            }
        }
    }

    pub fn query(
        &self,
        kind: PointKind,
        filter: &QueryFilter,
        granularity: Granularity,
    ) -> Result<QueryResult> {
        QueryRouter::new(self).query(kind, filter, granularity)
    }

    pub fn table_stats(&self, kind: PointKind) -> TableStats {
        match kind {
            PointKind::Telemetry => self.telemetry.stats(),
            PointKind::Progress => self.progress.stats(),
        }
    }
}

fn ingest<I: Validate>(table: &Table<I::Output>, input: &I) -> Result<I::Output> {
    let point = input.validate()?;
    table.write(point.clone())?;
    Ok(point)
}
