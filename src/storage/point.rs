use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use arrow::{
    array::{
        Array, ArrayRef, Decimal128Array, Float64Array, Int32Array, StringArray,
        TimestampNanosecondArray,
    },
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::{Error, PointKind, Result, to_nanos};

/// Degrees with eight fixed decimal places, as stored in `decimal(10,8)` / `decimal(11,8)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate(i64);

impl Coordinate {
    pub const SCALE: i8 = 8;
    const FACTOR: f64 = 100_000_000.0;

    pub fn from_degrees(degrees: f64) -> Self {
        Self((degrees * Self::FACTOR).round() as i64)
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn degrees(self) -> f64 {
        self.0 as f64 / Self::FACTOR
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.degrees())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryPoint {
    pub time: DateTime<Utc>,
    pub drone_id: i32,
    pub mission_id: Option<i32>,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    pub altitude: f64,
    pub battery_level: i32,
    pub speed: f64,
    pub signal_strength: i32,
    pub temperature: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TelemetryKey {
    pub time: DateTime<Utc>,
    pub drone_id: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressPoint {
    pub time: DateTime<Utc>,
    pub mission_id: i32,
    pub drone_id: i32,
    pub progress_percentage: i32,
    pub waypoints_completed: i32,
    pub waypoints_total: i32,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub current_action: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgressKey {
    pub time: DateTime<Utc>,
    pub mission_id: i32,
    pub drone_id: i32,
}

/// Entity and time filter applied to raw reads. Time bounds are `[start, end)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointFilter {
    pub drone_id: Option<i32>,
    pub mission_id: Option<i32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl PointFilter {
    pub fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    pub fn drone(mut self, drone_id: i32) -> Self {
        self.drone_id = Some(drone_id);
        self
    }

    pub fn mission(mut self, mission_id: i32) -> Self {
        self.mission_id = Some(mission_id);
        self
    }

    pub(crate) fn time_matches(&self, time: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| time >= s) && self.end.is_none_or(|e| time < e)
    }
}

/// A point kind the chunk store can hold.
pub trait Record: Clone + Debug + PartialEq + Serialize + Send + Sync + 'static {
    type Key: Ord + Copy + Debug + Send + Sync;

    const KIND: PointKind;

    /// Column compressed chunks are segmented by.
    const SEGMENT_COLUMN: &'static str;

    /// Row order inside a compressed chunk: segment column first, then the rest of the key.
    const SEGMENT_ORDER: &'static [&'static str];

    fn key(&self) -> Self::Key;

    fn key_time(key: &Self::Key) -> DateTime<Utc>;

    /// Write shard for a key; every write of one key lands on the same shard.
    fn shard_of(key: &Self::Key) -> u64;

    fn time(&self) -> DateTime<Utc> {
        Self::key_time(&self.key())
    }

    fn segment_id(&self) -> i32;

    /// Segment a filter restricts reads to, if any.
    fn filter_segment(filter: &PointFilter) -> Option<i32>;

    fn matches(&self, filter: &PointFilter) -> bool;

    fn schema() -> SchemaRef;

    fn to_batch(points: &[Self]) -> Result<RecordBatch>;

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

static TELEMETRY_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("time", DataType::Timestamp(TimeUnit::Nanosecond, None), false),
        Field::new("drone_id", DataType::Int32, false),
        Field::new("mission_id", DataType::Int32, true),
        Field::new("latitude", DataType::Decimal128(10, Coordinate::SCALE), false),
        Field::new("longitude", DataType::Decimal128(11, Coordinate::SCALE), false),
        Field::new("altitude", DataType::Float64, false),
        Field::new("battery_level", DataType::Int32, false),
        Field::new("speed", DataType::Float64, false),
        Field::new("signal_strength", DataType::Int32, false),
        Field::new("temperature", DataType::Float64, false),
    ]))
});

static PROGRESS_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("time", DataType::Timestamp(TimeUnit::Nanosecond, None), false),
        Field::new("mission_id", DataType::Int32, false),
        Field::new("drone_id", DataType::Int32, false),
        Field::new("progress_percentage", DataType::Int32, false),
        Field::new("waypoints_completed", DataType::Int32, false),
        Field::new("waypoints_total", DataType::Int32, false),
        Field::new("estimated_completion", DataType::Timestamp(TimeUnit::Nanosecond, None), true),
        Field::new("current_action", DataType::Utf8, false),
    ]))
});

impl Record for TelemetryPoint {
    type Key = TelemetryKey;

    const KIND: PointKind = PointKind::Telemetry;
    const SEGMENT_COLUMN: &'static str = "drone_id";
    const SEGMENT_ORDER: &'static [&'static str] = &["drone_id", "time"];

    fn key(&self) -> TelemetryKey {
        TelemetryKey {
            time: self.time,
            drone_id: self.drone_id,
        }
    }

    fn key_time(key: &TelemetryKey) -> DateTime<Utc> {
        key.time
    }

    fn shard_of(key: &TelemetryKey) -> u64 {
        key.drone_id as u64
    }

    fn segment_id(&self) -> i32 {
        self.drone_id
    }

    fn filter_segment(filter: &PointFilter) -> Option<i32> {
        filter.drone_id
    }

    fn matches(&self, filter: &PointFilter) -> bool {
        filter.drone_id.is_none_or(|id| id == self.drone_id)
            && filter.mission_id.is_none_or(|id| Some(id) == self.mission_id)
            && filter.time_matches(self.time)
    }

    fn schema() -> SchemaRef {
        TELEMETRY_SCHEMA.clone()
    }

    fn to_batch(points: &[Self]) -> Result<RecordBatch> {
        let times = points.iter().map(|p| to_nanos(p.time)).collect::<Result<Vec<_>>>()?;
        let latitude = Decimal128Array::from(
            points.iter().map(|p| p.latitude.raw() as i128).collect::<Vec<_>>(),
        )
        .with_precision_and_scale(10, Coordinate::SCALE)?;
        let longitude = Decimal128Array::from(
            points.iter().map(|p| p.longitude.raw() as i128).collect::<Vec<_>>(),
        )
        .with_precision_and_scale(11, Coordinate::SCALE)?;

        let columns: Vec<ArrayRef> = vec![
            Arc::new(TimestampNanosecondArray::from(times)),
            Arc::new(Int32Array::from(points.iter().map(|p| p.drone_id).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(points.iter().map(|p| p.mission_id).collect::<Vec<_>>())),
            Arc::new(latitude),
            Arc::new(longitude),
            Arc::new(Float64Array::from(points.iter().map(|p| p.altitude).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(points.iter().map(|p| p.battery_level).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(points.iter().map(|p| p.speed).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(
                points.iter().map(|p| p.signal_strength).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(points.iter().map(|p| p.temperature).collect::<Vec<_>>())),
        ];

        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let time = column::<TimestampNanosecondArray>(batch, "time")?;
        let drone_id = column::<Int32Array>(batch, "drone_id")?;
        let mission_id = column::<Int32Array>(batch, "mission_id")?;
        let latitude = column::<Decimal128Array>(batch, "latitude")?;
        let longitude = column::<Decimal128Array>(batch, "longitude")?;
        let altitude = column::<Float64Array>(batch, "altitude")?;
        let battery_level = column::<Int32Array>(batch, "battery_level")?;
        let speed = column::<Float64Array>(batch, "speed")?;
        let signal_strength = column::<Int32Array>(batch, "signal_strength")?;
        let temperature = column::<Float64Array>(batch, "temperature")?;

        Ok((0..batch.num_rows())
            .map(|i| TelemetryPoint {
                time: DateTime::from_timestamp_nanos(time.value(i)),
                drone_id: drone_id.value(i),
                mission_id: (!mission_id.is_null(i)).then(|| mission_id.value(i)),
                latitude: Coordinate::from_raw(latitude.value(i) as i64),
                longitude: Coordinate::from_raw(longitude.value(i) as i64),
                altitude: altitude.value(i),
                battery_level: battery_level.value(i),
                speed: speed.value(i),
                signal_strength: signal_strength.value(i),
                temperature: temperature.value(i),
            })
            .collect())
    }
}

impl Record for ProgressPoint {
    type Key = ProgressKey;

    const KIND: PointKind = PointKind::Progress;
    const SEGMENT_COLUMN: &'static str = "mission_id";
    const SEGMENT_ORDER: &'static [&'static str] = &["mission_id", "time", "drone_id"];

    fn key(&self) -> ProgressKey {
        ProgressKey {
            time: self.time,
            mission_id: self.mission_id,
            drone_id: self.drone_id,
        }
    }

    fn key_time(key: &ProgressKey) -> DateTime<Utc> {
        key.time
    }

    fn shard_of(key: &ProgressKey) -> u64 {
        (key.mission_id as u64).wrapping_mul(31).wrapping_add(key.drone_id as u64)
    }

    fn segment_id(&self) -> i32 {
        self.mission_id
    }

    fn filter_segment(filter: &PointFilter) -> Option<i32> {
        filter.mission_id
    }

    fn matches(&self, filter: &PointFilter) -> bool {
        filter.drone_id.is_none_or(|id| id == self.drone_id)
            && filter.mission_id.is_none_or(|id| id == self.mission_id)
            && filter.time_matches(self.time)
    }

    fn schema() -> SchemaRef {
        PROGRESS_SCHEMA.clone()
    }

    fn to_batch(points: &[Self]) -> Result<RecordBatch> {
        let times = points.iter().map(|p| to_nanos(p.time)).collect::<Result<Vec<_>>>()?;
        let estimated = points
            .iter()
            .map(|p| p.estimated_completion.map(to_nanos).transpose())
            .collect::<Result<Vec<_>>>()?;

        let columns: Vec<ArrayRef> = vec![
            Arc::new(TimestampNanosecondArray::from(times)),
            Arc::new(Int32Array::from(points.iter().map(|p| p.mission_id).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(points.iter().map(|p| p.drone_id).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(
                points.iter().map(|p| p.progress_percentage).collect::<Vec<_>>(),
            )),
            Arc::new(Int32Array::from(
                points.iter().map(|p| p.waypoints_completed).collect::<Vec<_>>(),
            )),
            Arc::new(Int32Array::from(
                points.iter().map(|p| p.waypoints_total).collect::<Vec<_>>(),
            )),
            Arc::new(TimestampNanosecondArray::from(estimated)),
            Arc::new(StringArray::from(
                points.iter().map(|p| p.current_action.as_str()).collect::<Vec<_>>(),
            )),
        ];

        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let time = column::<TimestampNanosecondArray>(batch, "time")?;
        let mission_id = column::<Int32Array>(batch, "mission_id")?;
        let drone_id = column::<Int32Array>(batch, "drone_id")?;
        let progress = column::<Int32Array>(batch, "progress_percentage")?;
        let completed = column::<Int32Array>(batch, "waypoints_completed")?;
        let total = column::<Int32Array>(batch, "waypoints_total")?;
        let estimated = column::<TimestampNanosecondArray>(batch, "estimated_completion")?;
        let action = column::<StringArray>(batch, "current_action")?;

        Ok((0..batch.num_rows())
            .map(|i| ProgressPoint {
                time: DateTime::from_timestamp_nanos(time.value(i)),
                mission_id: mission_id.value(i),
                drone_id: drone_id.value(i),
                progress_percentage: progress.value(i),
                waypoints_completed: completed.value(i),
                waypoints_total: total.value(i),
                estimated_completion: (!estimated.is_null(i))
                    .then(|| DateTime::from_timestamp_nanos(estimated.value(i))),
                current_action: action.value(i).to_string(),
            })
            .collect())
    }
}

/// Downcasts a named column, failing with `CorruptSegment` on a schema drift.
pub(crate) fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::CorruptSegment(format!("missing or mistyped column {name}")))
}
