use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{
    AggregateKind, DroneHourStats, FleetUtilization, MissionDaySummary,
};
use crate::engine::Engine;
use crate::storage::{
    Error, PointFilter, PointKind, ProgressPoint, Result, TelemetryPoint, ValidationError,
};

#[cfg(test)]
mod tests;

/// Resolution a caller asks for. Raw reads and rollup reads never substitute for each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Raw,
    Hour,
    Day,
    Week,
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Granularity::Raw),
            "hour" | "hourly" | "1h" => Ok(Granularity::Hour),
            "day" | "daily" | "1d" => Ok(Granularity::Day),
            "week" | "weekly" | "1w" => Ok(Granularity::Week),
            other => Err(Error::UnsupportedGranularity(format!("unknown granularity {other:?}"))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Raw => write!(f, "raw"),
            Granularity::Hour => write!(f, "hour"),
            Granularity::Day => write!(f, "day"),
            Granularity::Week => write!(f, "week"),
        }
    }
}

/// Caller-facing filter. Time bounds are `[start, end)`; for rollups they apply to bucket start.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryFilter {
    pub drone_id: Option<i32>,
    pub mission_id: Option<i32>,
    pub fleet_id: Option<i32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl QueryFilter {
    pub fn drone(mut self, drone_id: i32) -> Self {
        self.drone_id = Some(drone_id);
        self
    }

    pub fn mission(mut self, mission_id: i32) -> Self {
        self.mission_id = Some(mission_id);
        self
    }

    pub fn fleet(mut self, fleet_id: i32) -> Self {
        self.fleet_id = Some(fleet_id);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    fn point_filter(&self) -> PointFilter {
        PointFilter {
            drone_id: self.drone_id,
            mission_id: self.mission_id,
            start: self.start,
            end: self.end,
        }
    }

    /// Rejects an empty time range and any filter field the target cannot apply.
    fn check(&self, allowed: &[&'static str], target: &str) -> Result<()> {
        let mut errors = ValidationError::default();
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                errors.push("end_time", "must be after start_time");
            }
        }
        let fields = [
            ("drone_id", self.drone_id.is_some()),
            ("mission_id", self.mission_id.is_some()),
            ("fleet_id", self.fleet_id.is_some()),
        ];
        for (field, set) in fields {
            if set && !allowed.contains(&field) {
                errors.push(field, format!("cannot filter {target}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "source", content = "rows", rename_all = "snake_case")]
pub enum QueryResult {
    Telemetry(Vec<TelemetryPoint>),
    Progress(Vec<ProgressPoint>),
    HourlyDroneStats(Vec<DroneHourStats>),
    DailyMissionSummary(Vec<MissionDaySummary>),
    WeeklyFleetUtilization(Vec<FleetUtilization>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Telemetry(rows) => rows.len(),
            QueryResult::Progress(rows) => rows.len(),
            QueryResult::HourlyDroneStats(rows) => rows.len(),
            QueryResult::DailyMissionSummary(rows) => rows.len(),
            QueryResult::WeeklyFleetUtilization(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The rollup answering `granularity` reads over `kind`, if one is defined.
pub fn rollup_for(kind: PointKind, granularity: Granularity) -> Result<Option<AggregateKind>> {
    match (kind, granularity) {
        (_, Granularity::Raw) => Ok(None),
        (PointKind::Telemetry, Granularity::Hour) => Ok(Some(AggregateKind::HourlyDroneStats)),
        (PointKind::Progress, Granularity::Day) => Ok(Some(AggregateKind::DailyMissionSummary)),
        (PointKind::Telemetry, Granularity::Week) => {
            Ok(Some(AggregateKind::WeeklyFleetUtilization))
        }
        (kind, granularity) => Err(Error::UnsupportedGranularity(format!(
            "no {granularity} rollup is defined over {kind}"
        ))),
    }
}

/// Sends a read to the raw chunk store or to exactly one rollup.
pub struct QueryRouter<'a> {
    engine: &'a Engine,
}

impl<'a> QueryRouter<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub fn query(
        &self,
        kind: PointKind,
        filter: &QueryFilter,
        granularity: Granularity,
    ) -> Result<QueryResult> {
        match rollup_for(kind, granularity)? {
            None => self.raw(kind, filter),
            Some(rollup) => self.rollup(rollup, filter),
        }
    }

    /// Newest-first raw points, capped by the store's result limit.
    fn raw(&self, kind: PointKind, filter: &QueryFilter) -> Result<QueryResult> {
        let target = format!("raw {kind}");
        filter.check(&["drone_id", "mission_id"], &target)?;

        let points = filter.point_filter();
        match kind {
            PointKind::Telemetry => {
                Ok(QueryResult::Telemetry(self.engine.telemetry().query(&points)?))
            }
            PointKind::Progress => {
                Ok(QueryResult::Progress(self.engine.progress().query(&points)?))
            }
        }
    }

    /// Rollup rows ordered by bucket start descending.
    pub fn rollup(&self, kind: AggregateKind, filter: &QueryFilter) -> Result<QueryResult> {
        let target = kind.to_string();
        let limit = self.engine.config().max_aggregate_rows;
        let (start, end) = (filter.start, filter.end);

        match kind {
            AggregateKind::HourlyDroneStats => {
                filter.check(&["drone_id"], &target)?;
                let rows = self.engine.hourly_drone_stats().rows(start, end, limit, |drone| {
                    filter.drone_id.is_none_or(|id| id == *drone)
                });
                Ok(QueryResult::HourlyDroneStats(rows))
            }
            AggregateKind::DailyMissionSummary => {
                filter.check(&["drone_id", "mission_id"], &target)?;
                let rows = self.engine.daily_mission_summary().rows(
                    start,
                    end,
                    limit,
                    |(mission, drone)| {
                        filter.mission_id.is_none_or(|id| id == *mission)
                            && filter.drone_id.is_none_or(|id| id == *drone)
                    },
                );
                Ok(QueryResult::DailyMissionSummary(rows))
            }
            AggregateKind::WeeklyFleetUtilization => {
                filter.check(&["fleet_id"], &target)?;
                let rows = self.engine.weekly_fleet_utilization().rows(start, end, limit, |fleet| {
                    filter.fleet_id.is_none_or(|id| id == *fleet)
                });
                Ok(QueryResult::WeeklyFleetUtilization(rows))
            }
        }
    }
}
