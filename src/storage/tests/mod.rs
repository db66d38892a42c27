pub mod compression;
pub mod retention;
pub mod time_queries;

use super::*;
use chrono::{DateTime, TimeDelta, Utc};
use tempfile::tempdir;

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn telemetry_point(time: &str, drone_id: i32, battery_level: i32) -> TelemetryPoint {
    TelemetryPoint {
        time: ts(time),
        drone_id,
        mission_id: Some(100 + drone_id),
        latitude: Coordinate::from_degrees(40.7128),
        longitude: Coordinate::from_degrees(-74.006),
        altitude: 120.5,
        battery_level,
        speed: 12.25,
        signal_strength: -55,
        temperature: 21.5,
    }
}

pub fn progress_point(time: &str, mission_id: i32, drone_id: i32, progress: i32) -> ProgressPoint {
    ProgressPoint {
        time: ts(time),
        mission_id,
        drone_id,
        progress_percentage: progress,
        waypoints_completed: progress / 10,
        waypoints_total: 10,
        estimated_completion: None,
        current_action: "survey".to_string(),
    }
}

pub fn telemetry_input(time: &str, drone_id: i64, battery_level: i64) -> TelemetryInput {
    TelemetryInput {
        time: Some(time.to_string()),
        drone_id: Some(drone_id),
        mission_id: None,
        latitude: Some(40.7128),
        longitude: Some(-74.006),
        altitude: Some(120.5),
        battery_level: Some(battery_level),
        speed: Some(12.25),
        signal_strength: Some(-55),
        temperature: Some(21.5),
    }
}

pub fn progress_input(time: &str, mission_id: i64, drone_id: i64) -> ProgressInput {
    ProgressInput {
        time: Some(time.to_string()),
        mission_id: Some(mission_id),
        drone_id: Some(drone_id),
        progress_percentage: Some(40),
        waypoints_completed: Some(4),
        waypoints_total: Some(10),
        estimated_completion: Some("2024-01-01T03:00:00Z".to_string()),
        current_action: Some("  navigating  ".to_string()),
    }
}

pub fn test_config() -> StorageConfig {
    StorageConfig::telemetry()
}

pub fn spill_config() -> StorageConfig {
    StorageConfig::telemetry().spill_path(tempdir().unwrap().keep())
}

pub fn telemetry_table() -> Table<TelemetryPoint> {
    Table::new(test_config()).unwrap()
}

pub fn progress_table() -> Table<ProgressPoint> {
    Table::new(StorageConfig::progress()).unwrap()
}

pub fn spill_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
