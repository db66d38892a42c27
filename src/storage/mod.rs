//! Chunked time-series storage for drone telemetry and mission progress

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

mod chunk;
mod compress;
mod errors;
mod point;
mod retention;
mod scan_partitions;
mod table;
mod validate;

#[cfg(test)]
mod tests;

pub use chunk::ChunkState;
pub use compress::{CompressOutcome, CompressedChunk, CompressionReport, Segment};
pub use errors::{Error, FieldError, Result, ValidationError};
pub use point::{
    Coordinate, PointFilter, ProgressKey, ProgressPoint, Record, TelemetryKey, TelemetryPoint,
};
pub use retention::DropReport;
pub use scan_partitions::ScanIter;
pub use table::{ChunkInfo, Table, TableStats};
pub use validate::{ProgressInput, TelemetryInput, Validate, validate_progress, validate_telemetry};

/// Upper bound on points returned by a single raw read.
pub const MAX_QUERY_POINTS: usize = 1000;

/// The two kinds of time-series point the engine stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Telemetry,
    Progress,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointKind::Telemetry => write!(f, "telemetry"),
            PointKind::Progress => write!(f, "progress"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
}

impl Compression {
    pub(crate) fn ipc_codec(&self) -> Option<arrow::ipc::CompressionType> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some(arrow::ipc::CompressionType::LZ4_FRAME),
            Compression::Zstd => Some(arrow::ipc::CompressionType::ZSTD),
        }
    }
}

/// Per point-kind storage configuration.
///
/// `compress_after` is also the lateness tolerance: a write is accepted into
/// any chunk that has not been compressed yet, so a chunk stays writable for
/// `compress_after` past its interval end (plus scheduler latency).
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub chunk_width: TimeDelta,
    pub compress_after: TimeDelta,
    /// `None` keeps raw data forever.
    pub retention: Option<TimeDelta>,
    pub compression: Compression,
    /// When set, compressed segments are written to Arrow IPC files here.
    pub spill_path: Option<PathBuf>,
    pub max_results: usize,
    /// Number of independently locked write shards per raw chunk.
    pub write_shards: usize,
}

impl StorageConfig {
    pub fn telemetry() -> Self {
        Self {
            chunk_width: TimeDelta::days(1),
            compress_after: TimeDelta::days(1),
            retention: Some(TimeDelta::days(90)),
            compression: Compression::Zstd,
            spill_path: None,
            max_results: MAX_QUERY_POINTS,
            write_shards: 16,
        }
    }

    pub fn progress() -> Self {
        Self {
            chunk_width: TimeDelta::hours(1),
            compress_after: TimeDelta::hours(6),
            retention: Some(TimeDelta::days(30)),
            ..Self::telemetry()
        }
    }

    pub fn for_kind(kind: PointKind) -> Self {
        match kind {
            PointKind::Telemetry => Self::telemetry(),
            PointKind::Progress => Self::progress(),
        }
    }

    pub fn chunk_width(mut self, width: TimeDelta) -> Self {
        self.chunk_width = width;
        self
    }

    pub fn compress_after(mut self, age: TimeDelta) -> Self {
        self.compress_after = age;
        self
    }

    pub fn retention(mut self, horizon: Option<TimeDelta>) -> Self {
        self.retention = horizon;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn spill_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spill_path = Some(path.into());
        self
    }

    pub fn max_results(mut self, limit: usize) -> Self {
        self.max_results = limit;
        self
    }

    pub fn write_shards(mut self, shards: usize) -> Self {
        self.write_shards = shards.max(1);
        self
    }
}

/// Half-open `[start, end)` interval covered by one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChunkRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ChunkRange {
    /// The chunk containing `time`: `floor(time / width) * width`, aligned to the Unix epoch.
    pub fn containing(time: DateTime<Utc>, width: TimeDelta) -> Result<Self> {
        let width_nanos = duration_nanos(width)?;
        let ts = to_nanos(time)?;
        let start = ts.div_euclid(width_nanos) * width_nanos;
        let end = start
            .checked_add(width_nanos)
            .ok_or_else(|| Error::InvalidTimestamp(format!("chunk after {time} overflows")))?;
        Ok(Self {
            start: DateTime::from_timestamp_nanos(start),
            end: DateTime::from_timestamp_nanos(end),
        })
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end
    }

    pub fn overlaps(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
        start.is_none_or(|s| self.end > s) && end.is_none_or(|e| self.start < e)
    }
}

/// Start of the chunk `time` falls into.
pub fn chunk_start(time: DateTime<Utc>, width: TimeDelta) -> Result<DateTime<Utc>> {
    ChunkRange::containing(time, width).map(|r| r.start)
}

pub(crate) fn to_nanos(time: DateTime<Utc>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| Error::InvalidTimestamp(format!("{time} is outside the nanosecond range")))
}

pub(crate) fn duration_nanos(width: TimeDelta) -> Result<i64> {
    match width.num_nanoseconds() {
        Some(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidTimestamp(format!("invalid interval width {width}"))),
    }
}
