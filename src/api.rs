//! Ingestion and query surface in HTTP terms: every call answers with a status
//! code and a JSON body, leaving transport and auth to the embedding server.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::aggregate::AggregateKind;
use crate::engine::Engine;
use crate::query::{Granularity, QueryFilter, QueryRouter};
use crate::storage::{Error, PointKind, ProgressInput, Result, TelemetryInput, ValidationError};

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self {
                status: 500,
                body: json!({ "error": e.to_string() }),
            },
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }
}

pub fn error_response(err: &Error) -> Response {
    let status = err.status_code();
    if status >= 500 {
        log::error!("Request failed: {}", err);
    }
    let body = match err {
        Error::Validation(validation) => json!({
            "error": "validation failed",
            "fields": validation.fields,
        }),
        other => json!({ "error": other.to_string() }),
    };
    Response { status, body }
}

type Params = HashMap<String, String>;

pub struct Api {
    engine: Arc<Engine>,
}

impl Api {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn post_telemetry(&self, body: &str) -> Response {
        let created = serde_json::from_str::<TelemetryInput>(body)
            .map_err(Error::from)
            .and_then(|input| self.engine.insert_telemetry(&input));
        match created {
            Ok(point) => Response::json(201, &point),
            Err(e) => error_response(&e),
        }
    }

    pub fn post_progress(&self, body: &str) -> Response {
        let created = serde_json::from_str::<ProgressInput>(body)
            .map_err(Error::from)
            .and_then(|input| self.engine.insert_progress(&input));
        match created {
            Ok(point) => Response::json(201, &point),
            Err(e) => error_response(&e),
        }
    }

    /// `drone_id`, `mission_id`, `fleet_id`, `start_time`, `end_time`, `granularity` (default raw).
    pub fn get_telemetry(&self, params: &Params) -> Response {
        self.get(PointKind::Telemetry, params)
    }

    pub fn get_progress(&self, params: &Params) -> Response {
        self.get(PointKind::Progress, params)
    }

    fn get(&self, kind: PointKind, params: &Params) -> Response {
        let result = parse_filter(params).and_then(|(filter, granularity)| {
            self.engine.query(kind, &filter, granularity.unwrap_or(Granularity::Raw))
        });
        match result {
            Ok(rows) => Response::json(200, &rows),
            Err(e) => error_response(&e),
        }
    }

    /// Reads one rollup by name, e.g. `hourly_drone_stats`.
    pub fn get_rollup(&self, name: &str, params: &Params) -> Response {
        let result = rollup_kind(name).and_then(|kind| {
            let (filter, _) = parse_filter(params)?;
            QueryRouter::new(&self.engine).rollup(kind, &filter)
        });
        match result {
            Ok(rows) => Response::json(200, &rows),
            Err(e) => error_response(&e),
        }
    }

    /// Requires `drone_id` and `time`.
    pub fn delete_telemetry(&self, params: &Params) -> Response {
        let mut errors = ValidationError::default();
        let drone_id = required_id(params, "drone_id", &mut errors);
        let time = required_time(params, "time", &mut errors);

        let result = match (drone_id, time) {
            (Some(drone_id), Some(time)) if errors.is_empty() => {
                self.engine.delete_telemetry(time, drone_id).map(|_| ())
            }
            _ => Err(errors.into()),
        };
        match result {
            Ok(()) => Response::no_content(),
            Err(e) => error_response(&e),
        }
    }

    /// Requires `mission_id`, `drone_id` and `time`.
    pub fn delete_progress(&self, params: &Params) -> Response {
        let mut errors = ValidationError::default();
        let mission_id = required_id(params, "mission_id", &mut errors);
        let drone_id = required_id(params, "drone_id", &mut errors);
        let time = required_time(params, "time", &mut errors);

        let result = match (mission_id, drone_id, time) {
            (Some(mission_id), Some(drone_id), Some(time)) if errors.is_empty() => self
                .engine
                .delete_progress(time, mission_id, drone_id)
                .map(|_| ()),
            _ => Err(errors.into()),
        };
        match result {
            Ok(()) => Response::no_content(),
            Err(e) => error_response(&e),
        }
    }
}

fn rollup_kind(name: &str) -> Result<AggregateKind> {
    AggregateKind::ALL
        .into_iter()
        .find(|kind| kind.to_string() == name)
        .ok_or_else(|| Error::UnsupportedGranularity(format!("no rollup named {name:?}")))
}

fn parse_filter(params: &Params) -> Result<(QueryFilter, Option<Granularity>)> {
    let mut errors = ValidationError::default();
    let filter = QueryFilter {
        drone_id: optional_id(params, "drone_id", &mut errors),
        mission_id: optional_id(params, "mission_id", &mut errors),
        fleet_id: optional_id(params, "fleet_id", &mut errors),
        start: optional_time(params, "start_time", &mut errors),
        end: optional_time(params, "end_time", &mut errors),
    };
    if !errors.is_empty() {
        return Err(errors.into());
    }

    let granularity = params.get("granularity").map(|g| g.parse()).transpose()?;
    Ok((filter, granularity))
}

fn optional_id(params: &Params, name: &'static str, errors: &mut ValidationError) -> Option<i32> {
    let raw = params.get(name)?;
    match raw.trim().parse::<i32>() {
        Ok(id) if id > 0 => Some(id),
        _ => {
            errors.push(name, format!("must be a positive integer, got {raw:?}"));
            None
        }
    }
}

fn optional_time(
    params: &Params,
    name: &'static str,
    errors: &mut ValidationError,
) -> Option<DateTime<Utc>> {
    let raw = params.get(name)?;
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(time) => Some(time.with_timezone(&Utc)),
        Err(_) => {
            errors.push(name, format!("must be an RFC 3339 timestamp, got {raw:?}"));
            None
        }
    }
}

fn required_id(params: &Params, name: &'static str, errors: &mut ValidationError) -> Option<i32> {
    if !params.contains_key(name) {
        errors.push(name, "is required");
    }
    optional_id(params, name, errors)
}

fn required_time(
    params: &Params,
    name: &'static str,
    errors: &mut ValidationError,
) -> Option<DateTime<Utc>> {
    if !params.contains_key(name) {
        errors.push(name, "is required");
    }
    optional_time(params, name, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::InMemoryFleetDirectory;
    use crate::config::EngineConfig;

    fn api() -> Api {
        let fleets = Arc::new(InMemoryFleetDirectory::new());
        let engine = Engine::new(EngineConfig::default(), fleets).unwrap();
        Api::new(Arc::new(engine))
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    const TELEMETRY: &str = r#"{
        "time": "2024-01-01T00:00:00Z",
        "drone_id": 1,
        "latitude": 40.7128,
        "longitude": -74.006,
        "altitude": 120.5,
        "battery_level": 98,
        "speed": 12.25,
        "signal_strength": -55,
        "temperature": 21.5
    }"#;

    #[test]
    fn test_post_then_get_telemetry() {
        let api = api();
        let created = api.post_telemetry(TELEMETRY);
        assert_eq!(created.status, 201);
        assert_eq!(created.body["battery_level"], 98);

        let found = api.get_telemetry(&params(&[
            ("drone_id", "1"),
            ("start_time", "2024-01-01T00:00:00Z"),
            ("end_time", "2024-01-01T01:00:00Z"),
        ]));
        assert_eq!(found.status, 200);
        assert_eq!(found.body["source"], "telemetry");
        assert_eq!(found.body["rows"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_post_is_conflict() {
        let api = api();
        assert_eq!(api.post_telemetry(TELEMETRY).status, 201);
        assert_eq!(api.post_telemetry(TELEMETRY).status, 409);
    }

    #[test]
    fn test_invalid_post_names_fields() {
        let api = api();
        let body = r#"{"time": "2024-01-01T00:00:00Z", "drone_id": 1, "battery_level": 150}"#;
        let response = api.post_telemetry(body);
        assert_eq!(response.status, 400);

        let fields: Vec<&str> = response.body["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"battery_level"));
        assert!(fields.contains(&"latitude"));
    }

    #[test]
    fn test_malformed_json_is_bad_request() {
        assert_eq!(api().post_progress("{not json").status, 400);
    }

    #[test]
    fn test_delete_telemetry() {
        let api = api();
        api.post_telemetry(TELEMETRY);

        let missing = api.delete_telemetry(&params(&[("drone_id", "1")]));
        assert_eq!(missing.status, 400);
        assert_eq!(missing.body["fields"][0]["field"], "time");

        let key = params(&[("drone_id", "1"), ("time", "2024-01-01T00:00:00Z")]);
        assert_eq!(api.delete_telemetry(&key).status, 204);
        assert_eq!(api.delete_telemetry(&key).status, 404);
    }

    #[test]
    fn test_delete_progress_requires_all_keys() {
        let response = api().delete_progress(&params(&[("time", "2024-01-01T00:00:00Z")]));
        assert_eq!(response.status, 400);
        assert_eq!(response.body["fields"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unsupported_granularity() {
        let api = api();
        let response = api.get_progress(&params(&[("granularity", "hour")]));
        assert_eq!(response.status, 400);

        let response = api.get_rollup("monthly_fleet_report", &Params::new());
        assert_eq!(response.status, 400);
    }

    #[test]
    fn test_bad_time_range() {
        let response = api().get_telemetry(&params(&[
            ("start_time", "2024-01-02T00:00:00Z"),
            ("end_time", "2024-01-01T00:00:00Z"),
        ]));
        assert_eq!(response.status, 400);
        assert_eq!(response.body["fields"][0]["field"], "end_time");
    }

    #[test]
    fn test_get_rollup_by_name() {
        let response = api().get_rollup("hourly_drone_stats", &params(&[("drone_id", "7")]));
        assert_eq!(response.status, 200);
        assert_eq!(response.body["source"], "hourly_drone_stats");
        assert!(response.body["rows"].as_array().unwrap().is_empty());
    }
}
