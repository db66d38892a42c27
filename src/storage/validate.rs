//! Normalization and field-level validation of incoming points.
//!
//! Inputs are loosely typed so a missing or malformed field is reported by
//! name instead of failing deserialization as a whole. Time is not required
//! to be monotonic; whether a late point is still writable is decided by the
//! chunk store.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{Coordinate, ProgressPoint, Record, TelemetryPoint, ValidationError};

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TelemetryInput {
    pub time: Option<String>,
    pub drone_id: Option<i64>,
    pub mission_id: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub battery_level: Option<i64>,
    pub speed: Option<f64>,
    pub signal_strength: Option<i64>,
    pub temperature: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ProgressInput {
    pub time: Option<String>,
    pub mission_id: Option<i64>,
    pub drone_id: Option<i64>,
    pub progress_percentage: Option<i64>,
    pub waypoints_completed: Option<i64>,
    pub waypoints_total: Option<i64>,
    pub estimated_completion: Option<String>,
    pub current_action: Option<String>,
}

/// Pure conversion from an input tuple to a storable point.
pub trait Validate {
    type Output: Record;

    fn validate(&self) -> Result<Self::Output, ValidationError>;
}

impl Validate for TelemetryInput {
    type Output = TelemetryPoint;

    fn validate(&self) -> Result<TelemetryPoint, ValidationError> {
        validate_telemetry(self)
    }
}

impl Validate for ProgressInput {
    type Output = ProgressPoint;

    fn validate(&self) -> Result<ProgressPoint, ValidationError> {
        validate_progress(self)
    }
}

pub fn validate_telemetry(input: &TelemetryInput) -> Result<TelemetryPoint, ValidationError> {
    let mut errors = ValidationError::default();

    let time = timestamp(&mut errors, "time", input.time.as_deref());
    let drone_id = id(&mut errors, "drone_id", input.drone_id);
    let mission_id = input.mission_id.and_then(|m| id(&mut errors, "mission_id", Some(m)));
    let latitude = bounded_f64(&mut errors, "latitude", input.latitude, -90.0, 90.0);
    let longitude = bounded_f64(&mut errors, "longitude", input.longitude, -180.0, 180.0);
    // numeric(8,2), numeric(6,2), numeric(5,2)
    let altitude = fixed_2dp(&mut errors, "altitude", input.altitude, 6);
    let speed = fixed_2dp(&mut errors, "speed", input.speed, 4);
    let temperature = fixed_2dp(&mut errors, "temperature", input.temperature, 3);
    let battery_level = bounded_i32(&mut errors, "battery_level", input.battery_level, 0, 100);
    let signal_strength = bounded_i32(
        &mut errors,
        "signal_strength",
        input.signal_strength,
        i32::MIN,
        i32::MAX,
    );

    let fields = (
        time,
        drone_id,
        latitude,
        longitude,
        altitude,
        battery_level,
        speed,
        signal_strength,
        temperature,
    );
    match fields {
        (
            Some(time),
            Some(drone_id),
            Some(latitude),
            Some(longitude),
            Some(altitude),
            Some(battery_level),
            Some(speed),
            Some(signal_strength),
            Some(temperature),
        ) if errors.is_empty() => Ok(TelemetryPoint {
            time,
            drone_id,
            mission_id,
            latitude: Coordinate::from_degrees(latitude),
            longitude: Coordinate::from_degrees(longitude),
            altitude,
            battery_level,
            speed,
            signal_strength,
            temperature,
        }),
        _ => Err(errors),
    }
}

pub fn validate_progress(input: &ProgressInput) -> Result<ProgressPoint, ValidationError> {
    let mut errors = ValidationError::default();

    let time = timestamp(&mut errors, "time", input.time.as_deref());
    let mission_id = id(&mut errors, "mission_id", input.mission_id);
    let drone_id = id(&mut errors, "drone_id", input.drone_id);
    let progress = bounded_i32(
        &mut errors,
        "progress_percentage",
        input.progress_percentage,
        0,
        100,
    );
    let completed = bounded_i32(
        &mut errors,
        "waypoints_completed",
        input.waypoints_completed,
        0,
        i32::MAX,
    );
    let total = bounded_i32(&mut errors, "waypoints_total", input.waypoints_total, 0, i32::MAX);
    if let (Some(c), Some(t)) = (completed, total) {
        if c > t {
            errors.push("waypoints_completed", format!("must not exceed waypoints_total ({t})"));
        }
    }
    let estimated_completion = input
        .estimated_completion
        .as_deref()
        .and_then(|raw| timestamp(&mut errors, "estimated_completion", Some(raw)));
    let current_action = match input.current_action.as_deref().map(str::trim) {
        None => {
            errors.push("current_action", "is required");
            None
        }
        Some("") => {
            errors.push("current_action", "must not be blank");
            None
        }
        Some(action) => Some(action.to_string()),
    };

    match (time, mission_id, drone_id, progress, completed, total, current_action) {
        (
            Some(time),
            Some(mission_id),
            Some(drone_id),
            Some(progress_percentage),
            Some(waypoints_completed),
            Some(waypoints_total),
            Some(current_action),
        ) if errors.is_empty() => Ok(ProgressPoint {
            time,
            mission_id,
            drone_id,
            progress_percentage,
            waypoints_completed,
            waypoints_total,
            estimated_completion,
            current_action,
        }),
        _ => Err(errors),
    }
}

fn timestamp(
    errors: &mut ValidationError,
    field: &'static str,
    raw: Option<&str>,
) -> Option<DateTime<Utc>> {
    let Some(raw) = raw else {
        errors.push(field, "is required");
        return None;
    };
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(t) => {
            let t = t.with_timezone(&Utc);
            // chunks and columns are keyed by nanoseconds since the epoch
            if t.timestamp_nanos_opt().is_none() {
                errors.push(field, "is outside the supported time range");
                return None;
            }
            Some(t)
        }
        Err(e) => {
            errors.push(field, format!("is not an RFC 3339 timestamp ({e})"));
            None
        }
    }
}

fn id(errors: &mut ValidationError, field: &'static str, value: Option<i64>) -> Option<i32> {
    match value {
        None => {
            errors.push(field, "is required");
            None
        }
        Some(v) if v <= 0 || v > i32::MAX as i64 => {
            errors.push(field, "must be a positive 32-bit integer");
            None
        }
        Some(v) => Some(v as i32),
    }
}

fn bounded_i32(
    errors: &mut ValidationError,
    field: &'static str,
    value: Option<i64>,
    min: i32,
    max: i32,
) -> Option<i32> {
    match value {
        None => {
            errors.push(field, "is required");
            None
        }
        Some(v) if v < min as i64 || v > max as i64 => {
            errors.push(field, format!("must be within [{min}, {max}]"));
            None
        }
        Some(v) => Some(v as i32),
    }
}

fn bounded_f64(
    errors: &mut ValidationError,
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Option<f64> {
    match value {
        None => {
            errors.push(field, "is required");
            None
        }
        Some(v) if !v.is_finite() || v < min || v > max => {
            errors.push(field, format!("must be within [{min}, {max}]"));
            None
        }
        Some(v) => Some(v),
    }
}

/// Rounds to two decimals and checks the value fits `integer_digits` before the point.
fn fixed_2dp(
    errors: &mut ValidationError,
    field: &'static str,
    value: Option<f64>,
    integer_digits: i32,
) -> Option<f64> {
    let Some(v) = value else {
        errors.push(field, "is required");
        return None;
    };
    let rounded = (v * 100.0).round() / 100.0;
    let limit = 10f64.powi(integer_digits);
    if !rounded.is_finite() || rounded.abs() >= limit {
        errors.push(field, format!("must be a finite value with |x| < {limit}"));
        return None;
    }
    Some(rounded)
}
