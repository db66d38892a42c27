
use std::sync::Arc;

use super::*;
use crate::aggregate::InMemoryFleetDirectory;
use crate::config::EngineConfig;
use crate::storage::{Coordinate, ProgressPoint, TelemetryPoint};

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn engine(config: EngineConfig) -> Engine {
    let fleets = Arc::new(InMemoryFleetDirectory::new());
    fleets.assign(1, 10);
    fleets.assign(2, 10);
    fleets.assign(3, 20);
    Engine::new(config, fleets).unwrap()
}

pub fn telemetry(time: &str, drone_id: i32, mission_id: Option<i32>) -> TelemetryPoint {
    TelemetryPoint {
        time: ts(time),
        drone_id,
        mission_id,
        latitude: Coordinate::from_degrees(51.5),
        longitude: Coordinate::from_degrees(-0.125),
        altitude: 80.0,
        battery_level: 70,
        speed: 8.5,
        signal_strength: -65,
        temperature: 18.0,
    }
}

pub fn progress(time: &str, mission_id: i32, drone_id: i32) -> ProgressPoint {
    ProgressPoint {
        time: ts(time),
        mission_id,
        drone_id,
        progress_percentage: 50,
        waypoints_completed: 5,
        waypoints_total: 10,
        estimated_completion: None,
        current_action: "transit".to_string(),
    }
}
