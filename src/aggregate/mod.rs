//! Continuous aggregates: rollups over fixed-width buckets, recomputed from raw
//! points on a sliding window that trails `now` by a settling offset.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::storage::{
    Error, PointKind, Record, Result, Table, ValidationError, duration_nanos, to_nanos,
};

mod column_stats;
mod definitions;

#[cfg(test)]
mod tests;

pub use column_stats::NumericColumn;
pub use definitions::{
    DailyMissionSummary, DroneHourStats, FleetDirectory, FleetUtilization, HourlyDroneStats,
    InMemoryFleetDirectory, LOW_BATTERY_THRESHOLD, MissionDaySummary, WeeklyFleetUtilization,
};

/// Upper bound on rollup rows returned by a single aggregate read.
pub const MAX_AGGREGATE_ROWS: usize = 1000;

/// Buckets are aligned to Monday 2000-01-03T00:00:00Z, so weekly buckets start on Mondays.
const BUCKET_ORIGIN_NANOS: i64 = 946_857_600 * 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    HourlyDroneStats,
    DailyMissionSummary,
    WeeklyFleetUtilization,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 3] = [
        AggregateKind::HourlyDroneStats,
        AggregateKind::DailyMissionSummary,
        AggregateKind::WeeklyFleetUtilization,
    ];

    pub fn bucket_width(self) -> TimeDelta {
        match self {
            AggregateKind::HourlyDroneStats => TimeDelta::hours(1),
            AggregateKind::DailyMissionSummary => TimeDelta::days(1),
            AggregateKind::WeeklyFleetUtilization => TimeDelta::weeks(1),
        }
    }

    pub fn source(self) -> PointKind {
        match self {
            AggregateKind::DailyMissionSummary => PointKind::Progress,
            _ => PointKind::Telemetry,
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateKind::HourlyDroneStats => write!(f, "hourly_drone_stats"),
            AggregateKind::DailyMissionSummary => write!(f, "daily_mission_summary"),
            AggregateKind::WeeklyFleetUtilization => write!(f, "weekly_fleet_utilization"),
        }
    }
}

/// When and how far back an aggregate is refreshed, and how long its buckets live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub start_offset: TimeDelta,
    /// Settling window: the most recent `end_offset` is never refreshed.
    pub end_offset: TimeDelta,
    pub schedule_interval: TimeDelta,
    pub retention: Option<TimeDelta>,
}

impl RefreshPolicy {
    pub fn hourly() -> Self {
        Self {
            start_offset: TimeDelta::hours(3),
            end_offset: TimeDelta::hours(1),
            schedule_interval: TimeDelta::hours(1),
            retention: Some(TimeDelta::days(90)),
        }
    }

    pub fn daily() -> Self {
        Self {
            start_offset: TimeDelta::days(3),
            end_offset: TimeDelta::days(1),
            schedule_interval: TimeDelta::days(1),
            retention: Some(TimeDelta::days(365)),
        }
    }

    pub fn weekly() -> Self {
        Self {
            start_offset: TimeDelta::weeks(3),
            end_offset: TimeDelta::weeks(1),
            schedule_interval: TimeDelta::weeks(1),
            retention: Some(TimeDelta::days(730)),
        }
    }

    pub fn for_kind(kind: AggregateKind) -> Self {
        match kind {
            AggregateKind::HourlyDroneStats => Self::hourly(),
            AggregateKind::DailyMissionSummary => Self::daily(),
            AggregateKind::WeeklyFleetUtilization => Self::weekly(),
        }
    }

    pub fn offsets(mut self, start_offset: TimeDelta, end_offset: TimeDelta) -> Self {
        self.start_offset = start_offset;
        self.end_offset = end_offset;
        self
    }

    pub fn schedule_interval(mut self, interval: TimeDelta) -> Self {
        self.schedule_interval = interval;
        self
    }

    pub fn retention(mut self, horizon: Option<TimeDelta>) -> Self {
        self.retention = horizon;
        self
    }
}

/// Start of the bucket containing `time`.
pub fn bucket_start(time: DateTime<Utc>, width: TimeDelta) -> Result<DateTime<Utc>> {
    let width_nanos = duration_nanos(width)?;
    let overflow = || Error::InvalidTimestamp(format!("bucket of {time} overflows"));
    let offset = to_nanos(time)?.checked_sub(BUCKET_ORIGIN_NANOS).ok_or_else(overflow)?;
    let start = (offset.div_euclid(width_nanos) * width_nanos)
        .checked_add(BUCKET_ORIGIN_NANOS)
        .ok_or_else(overflow)?;
    Ok(DateTime::from_timestamp_nanos(start))
}

/// First bucket boundary at or after `time`.
fn bucket_ceil(time: DateTime<Utc>, width: TimeDelta) -> Result<DateTime<Utc>> {
    let start = bucket_start(time, width)?;
    if start == time {
        return Ok(start);
    }
    start
        .checked_add_signed(width)
        .ok_or_else(|| Error::InvalidTimestamp(format!("bucket after {time} overflows")))
}

fn shift_back(now: DateTime<Utc>, delta: TimeDelta) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(delta)
        .ok_or_else(|| Error::InvalidTimestamp(format!("{now} minus {delta} overflows")))
}

/// A rollup definition: group key and aggregation function over one source point kind.
///
/// `aggregate` must be a pure function of its inputs; points arrive in key order.
pub trait Rollup: Send + Sync + 'static {
    type Source: Record;
    type Group: Ord + Copy + Debug + Send + Sync + 'static;
    type Row: Clone + Debug + PartialEq + Serialize + Send + Sync + 'static;

    const KIND: AggregateKind;

    fn bucket_width(&self) -> TimeDelta {
        Self::KIND.bucket_width()
    }

    /// `None` excludes the point from every bucket.
    fn group_of(&self, point: &Self::Source) -> Option<Self::Group>;

    fn aggregate(
        &self,
        bucket: DateTime<Utc>,
        group: Self::Group,
        points: &[Self::Source],
    ) -> Result<Self::Row>;
}

/// Outcome of one refresh or backfill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub kind: AggregateKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub points_read: usize,
    pub buckets_written: usize,
    pub buckets_removed: usize,
}

impl RefreshReport {
    fn empty(kind: AggregateKind, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            kind,
            window_start,
            window_end,
            points_read: 0,
            buckets_written: 0,
            buckets_removed: 0,
        }
    }
}

/// Materialized buckets of one rollup.
pub struct ContinuousAggregate<A: Rollup> {
    rollup: A,
    policy: RefreshPolicy,
    buckets: RwLock<BTreeMap<(DateTime<Utc>, A::Group), A::Row>>,
    // Overlapping recomputations must not publish an older snapshot over a newer one.
    refresh_lock: Mutex<()>,
}

impl<A: Rollup> ContinuousAggregate<A> {
    pub fn new(rollup: A, policy: RefreshPolicy) -> Self {
        Self {
            rollup,
            policy,
            buckets: RwLock::new(BTreeMap::new()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn kind(&self) -> AggregateKind {
        A::KIND
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    /// The buckets a refresh at `now` recomputes: every bucket lying fully
    /// inside `[now - start_offset, now - end_offset]`.
    pub fn refresh_window(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let width = self.rollup.bucket_width();
        let from = bucket_ceil(shift_back(now, self.policy.start_offset)?, width)?;
        let to = bucket_start(shift_back(now, self.policy.end_offset)?, width)?;
        Ok((from, to.max(from)))
    }

    /// Scheduled refresh. Buckets outside the window are left untouched.
    pub fn refresh(&self, source: &Table<A::Source>, now: DateTime<Utc>) -> Result<RefreshReport> {
        let (from, to) = self.refresh_window(now)?;
        if from >= to {
            return Ok(RefreshReport::empty(A::KIND, from, to));
        }
        self.recompute(source, from, to)
    }

    /// Explicit repair of every bucket overlapping `[start, end)`, including
    /// buckets older than the refresh window. Never reaches past the raw
    /// retention horizon, where recomputation would erase rollups whose raw
    /// points are already gone.
    pub fn backfill(
        &self,
        source: &Table<A::Source>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        if start >= end {
            return Err(ValidationError::new("end_time", "must be after start_time").into());
        }

        let width = self.rollup.bucket_width();
        let mut from = bucket_start(start, width)?;
        let to = bucket_ceil(end, width)?;
        if let Some(horizon) = source.config().retention {
            let floor = bucket_ceil(shift_back(now, horizon)?, width)?;
            if floor > from {
                log::warn!(
                    "Backfill of {} clamped from {} to {} by raw retention",
                    A::KIND,
                    from,
                    floor
                );
                from = floor;
            }
        }

        if from >= to {
            return Ok(RefreshReport::empty(A::KIND, from, to.max(from)));
        }
        self.recompute(source, from, to)
    }

    /// Replaces every bucket in the bucket-aligned range `[from, to)` with a
    /// fresh computation. Groups without points in the range lose their bucket.
    fn recompute(
        &self,
        source: &Table<A::Source>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock();
        let width = self.rollup.bucket_width();

        let points = source.scan_range(from, to)?;
        let mut groups: BTreeMap<(DateTime<Utc>, A::Group), Vec<A::Source>> = BTreeMap::new();
        for point in &points {
            let Some(group) = self.rollup.group_of(point) else {
                continue;
            };
            let bucket = bucket_start(point.time(), width)?;
            groups.entry((bucket, group)).or_default().push(point.clone());
        }

        let mut fresh = BTreeMap::new();
        for ((bucket, group), members) in groups {
            let row = self.rollup.aggregate(bucket, group, &members)?;
            fresh.insert((bucket, group), row);
        }

        let mut report = RefreshReport::empty(A::KIND, from, to);
        report.points_read = points.len();
        report.buckets_written = fresh.len();

        let mut buckets = self.buckets.write();
        buckets.retain(|key, _| {
            let in_range = key.0 >= from && key.0 < to;
            if in_range && !fresh.contains_key(key) {
                report.buckets_removed += 1;
            }
            !in_range
        });
        buckets.extend(fresh);
        drop(buckets);

        log::debug!(
            "Refreshed {} [{}, {}): {} points, {} buckets",
            A::KIND,
            from,
            to,
            report.points_read,
            report.buckets_written
        );
        Ok(report)
    }

    /// Rows with bucket start in `[start, end)` whose group passes `group`,
    /// newest bucket first, groups ascending within a bucket.
    pub fn rows<F>(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        group: F,
    ) -> Vec<A::Row>
    where
        F: Fn(&A::Group) -> bool,
    {
        let buckets = self.buckets.read();
        let mut matching: Vec<(&(DateTime<Utc>, A::Group), &A::Row)> = buckets
            .iter()
            .filter(|((bucket, g), _)| {
                start.is_none_or(|s| *bucket >= s) && end.is_none_or(|e| *bucket < e) && group(g)
            })
            .collect();
        matching.sort_by(|(a, _), (b, _)| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        matching.into_iter().take(limit).map(|(_, row)| row.clone()).collect()
    }

    pub fn bucket(&self, start: DateTime<Utc>, group: A::Group) -> Option<A::Row> {
        self.buckets.read().get(&(start, group)).cloned()
    }

    /// Drops buckets whose end is at or before `now - retention`.
    pub fn drop_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(horizon) = self.policy.retention else {
            return Ok(0);
        };
        let cutoff = shift_back(now, horizon)?;
        let width = self.rollup.bucket_width();

        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|(bucket, _), _| {
            bucket.checked_add_signed(width).is_none_or(|bucket_end| bucket_end > cutoff)
        });
        let dropped = before - buckets.len();
        drop(buckets);

        if dropped > 0 {
            log::info!("Retention dropped {} {} buckets older than {}", dropped, A::KIND, cutoff);
        }
        Ok(dropped)
    }
}
