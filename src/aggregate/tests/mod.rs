pub mod daily;

use super::*;
use crate::storage::{Coordinate, ProgressPoint, StorageConfig, TelemetryPoint};

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn telemetry(time: &str, drone_id: i32, battery_level: i32) -> TelemetryPoint {
    TelemetryPoint {
        time: ts(time),
        drone_id,
        mission_id: Some(100 + drone_id),
        latitude: Coordinate::from_degrees(40.5),
        longitude: Coordinate::from_degrees(-74.25),
        altitude: 100.0,
        battery_level,
        speed: 10.0,
        signal_strength: -60,
        temperature: 20.0,
    }
}

pub fn progress(
    time: &str,
    mission_id: i32,
    drone_id: i32,
    percentage: i32,
    eta: Option<&str>,
) -> ProgressPoint {
    ProgressPoint {
        time: ts(time),
        mission_id,
        drone_id,
        progress_percentage: percentage,
        waypoints_completed: percentage / 10,
        waypoints_total: 10,
        estimated_completion: eta.map(ts),
        current_action: "survey".to_string(),
    }
}

pub fn telemetry_table(points: Vec<TelemetryPoint>) -> Table<TelemetryPoint> {
    let table = Table::new(StorageConfig::telemetry()).unwrap();
    for point in points {
        table.write(point).unwrap();
    }
    table
}

pub fn progress_table(points: Vec<ProgressPoint>) -> Table<ProgressPoint> {
    let table = Table::new(StorageConfig::progress()).unwrap();
    for point in points {
        table.write(point).unwrap();
    }
    table
}

pub fn hourly() -> ContinuousAggregate<HourlyDroneStats> {
    ContinuousAggregate::new(HourlyDroneStats, RefreshPolicy::hourly())
}
