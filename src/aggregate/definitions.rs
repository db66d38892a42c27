use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arrow::array::Float64Array;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::column_stats::{NumericColumn, count_below, int32_min_max, required};
use super::{AggregateKind, Rollup};
use crate::storage::{ProgressPoint, Record, Result, TelemetryPoint};

/// Samples below this battery level count as low-battery alerts.
pub const LOW_BATTERY_THRESHOLD: i32 = 20;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DroneHourStats {
    pub bucket: DateTime<Utc>,
    pub drone_id: i32,
    pub avg_battery_level: f64,
    pub min_battery_level: i32,
    pub max_battery_level: i32,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub avg_signal_strength: f64,
    pub avg_temperature: f64,
    pub data_points: usize,
    /// `[longitude, latitude]` of every sample, in time order.
    pub flight_path: Vec<[f64; 2]>,
}

/// Per-drone hourly health and position rollup.
#[derive(Clone, Copy, Debug, Default)]
pub struct HourlyDroneStats;

impl Rollup for HourlyDroneStats {
    type Source = TelemetryPoint;
    type Group = i32;
    type Row = DroneHourStats;

    const KIND: AggregateKind = AggregateKind::HourlyDroneStats;

    fn group_of(&self, point: &TelemetryPoint) -> Option<i32> {
        Some(point.drone_id)
    }

    fn aggregate(
        &self,
        bucket: DateTime<Utc>,
        drone_id: i32,
        points: &[TelemetryPoint],
    ) -> Result<DroneHourStats> {
        let batch = TelemetryPoint::to_batch(points)?;
        let battery = NumericColumn::from_batch(&batch, "battery_level")?;
        let speed = NumericColumn::from_batch(&batch, "speed")?;
        let signal = NumericColumn::from_batch(&batch, "signal_strength")?;
        let temperature = NumericColumn::from_batch(&batch, "temperature")?;
        let (min_battery, max_battery) = int32_min_max(&batch, "battery_level")?;

        Ok(DroneHourStats {
            bucket,
            drone_id,
            avg_battery_level: required(battery.mean()?, "battery_level")?,
            min_battery_level: required(min_battery, "battery_level")?,
            max_battery_level: required(max_battery, "battery_level")?,
            avg_speed: required(speed.mean()?, "speed")?,
            max_speed: required(speed.max(), "speed")?,
            avg_signal_strength: required(signal.mean()?, "signal_strength")?,
            avg_temperature: required(temperature.mean()?, "temperature")?,
            data_points: batch.num_rows(),
            flight_path: points
                .iter()
                .map(|p| [p.longitude.degrees(), p.latitude.degrees()])
                .collect(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MissionDaySummary {
    pub bucket: DateTime<Utc>,
    pub mission_id: i32,
    pub drone_id: i32,
    pub avg_progress: f64,
    pub max_progress: i32,
    pub total_waypoints_completed: i32,
    pub total_waypoints: i32,
    pub progress_updates: usize,
    /// Mean of `estimated_completion - time` in hours over updates that carry an estimate.
    pub avg_remaining_hours: Option<f64>,
}

/// Per (mission, drone) daily progress rollup.
#[derive(Clone, Copy, Debug, Default)]
pub struct DailyMissionSummary;

impl Rollup for DailyMissionSummary {
    type Source = ProgressPoint;
    type Group = (i32, i32);
    type Row = MissionDaySummary;

    const KIND: AggregateKind = AggregateKind::DailyMissionSummary;

    fn group_of(&self, point: &ProgressPoint) -> Option<(i32, i32)> {
        Some((point.mission_id, point.drone_id))
    }

    fn aggregate(
        &self,
        bucket: DateTime<Utc>,
        (mission_id, drone_id): (i32, i32),
        points: &[ProgressPoint],
    ) -> Result<MissionDaySummary> {
        let batch = ProgressPoint::to_batch(points)?;
        let progress = NumericColumn::from_batch(&batch, "progress_percentage")?;
        let (_, max_progress) = int32_min_max(&batch, "progress_percentage")?;
        let (_, max_completed) = int32_min_max(&batch, "waypoints_completed")?;
        let (_, max_total) = int32_min_max(&batch, "waypoints_total")?;

        let remaining = Float64Array::from(
            points
                .iter()
                .map(|p| {
                    p.estimated_completion
                        .map(|eta| (eta - p.time).num_milliseconds() as f64 / 3_600_000.0)
                })
                .collect::<Vec<_>>(),
        );

        Ok(MissionDaySummary {
            bucket,
            mission_id,
            drone_id,
            avg_progress: required(progress.mean()?, "progress_percentage")?,
            max_progress: required(max_progress, "progress_percentage")?,
            total_waypoints_completed: required(max_completed, "waypoints_completed")?,
            total_waypoints: required(max_total, "waypoints_total")?,
            progress_updates: batch.num_rows(),
            avg_remaining_hours: NumericColumn::Float64(&remaining).mean()?,
        })
    }
}

/// Resolves the fleet a drone belongs to.
pub trait FleetDirectory: Send + Sync {
    fn fleet_of(&self, drone_id: i32) -> Option<i32>;
}

#[derive(Debug, Default)]
pub struct InMemoryFleetDirectory {
    fleets: RwLock<HashMap<i32, i32>>,
}

impl InMemoryFleetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, drone_id: i32, fleet_id: i32) {
        self.fleets.write().insert(drone_id, fleet_id);
    }

    pub fn unassign(&self, drone_id: i32) -> Option<i32> {
        self.fleets.write().remove(&drone_id)
    }
}

impl FleetDirectory for InMemoryFleetDirectory {
    fn fleet_of(&self, drone_id: i32) -> Option<i32> {
        self.fleets.read().get(&drone_id).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FleetUtilization {
    pub bucket: DateTime<Utc>,
    pub fleet_id: i32,
    pub active_drones: usize,
    pub active_missions: usize,
    pub avg_fleet_battery: f64,
    pub avg_fleet_speed: f64,
    pub total_telemetry_points: usize,
    pub low_battery_alerts: usize,
}

/// Per-fleet weekly utilization. Drones without a fleet are left out.
#[derive(Clone)]
pub struct WeeklyFleetUtilization {
    fleets: Arc<dyn FleetDirectory>,
}

impl WeeklyFleetUtilization {
    pub fn new(fleets: Arc<dyn FleetDirectory>) -> Self {
        Self { fleets }
    }
}

impl Rollup for WeeklyFleetUtilization {
    type Source = TelemetryPoint;
    type Group = i32;
    type Row = FleetUtilization;

    const KIND: AggregateKind = AggregateKind::WeeklyFleetUtilization;

    fn group_of(&self, point: &TelemetryPoint) -> Option<i32> {
        self.fleets.fleet_of(point.drone_id)
    }

    fn aggregate(
        &self,
        bucket: DateTime<Utc>,
        fleet_id: i32,
        points: &[TelemetryPoint],
    ) -> Result<FleetUtilization> {
        let batch = TelemetryPoint::to_batch(points)?;
        let battery = NumericColumn::from_batch(&batch, "battery_level")?;
        let speed = NumericColumn::from_batch(&batch, "speed")?;

        let drones: BTreeSet<i32> = points.iter().map(|p| p.drone_id).collect();
        let missions: BTreeSet<i32> = points.iter().filter_map(|p| p.mission_id).collect();

        Ok(FleetUtilization {
            bucket,
            fleet_id,
            active_drones: drones.len(),
            active_missions: missions.len(),
            avg_fleet_battery: required(battery.mean()?, "battery_level")?,
            avg_fleet_speed: required(speed.mean()?, "speed")?,
            total_telemetry_points: batch.num_rows(),
            low_battery_alerts: count_below(&batch, "battery_level", LOW_BATTERY_THRESHOLD)?,
        })
    }
}
