//! Columnar compression of closed chunks.
//!
//! A compressed chunk keeps one Arrow IPC stream per segment (drone for
//! telemetry, mission for progress), rows sorted by the rest of the key, with
//! IPC buffer compression applied per column. Segments carry their time bounds
//! so reads skip segments outside the requested range without decoding them.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use arrow::array::{ArrayRef, Int32Array, TimestampNanosecondArray};
use arrow::compute::take;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::{IpcWriteOptions, StreamWriter};
use arrow::record_batch::RecordBatch;
use arrow_ord::sort::{SortColumn, lexsort_to_indices};
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::Serialize;

use super::point::column;
use super::{ChunkRange, Compression, Error, PointFilter, PointKind, Record, Result};

enum Payload {
    Memory(Vec<u8>),
    Spilled(PathBuf),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            Payload::Spilled(path) => write!(f, "Spilled({})", path.display()),
        }
    }
}

#[derive(Debug)]
pub struct Segment {
    pub segment_id: i32,
    pub rows: usize,
    pub min_time: DateTime<Utc>,
    pub max_time: DateTime<Utc>,
    pub encoded_bytes: usize,
    payload: Payload,
}

impl Segment {
    fn overlaps(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
        start.is_none_or(|s| self.max_time >= s) && end.is_none_or(|e| self.min_time < e)
    }

    pub fn spill_file(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Spilled(path) => Some(path),
            Payload::Memory(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct CompressedChunk {
    pub kind: PointKind,
    pub range: ChunkRange,
    pub codec: Compression,
    segments: BTreeMap<i32, Segment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressOutcome {
    Compressed {
        rows: usize,
        segments: usize,
        encoded_bytes: usize,
    },
    AlreadyCompressed,
    /// Interval still open or younger than the compression threshold.
    NotEligible,
}

/// Result of one compression pass over a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompressionReport {
    pub compressed: usize,
    pub rows: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl CompressedChunk {
    pub(crate) fn build<R: Record>(
        range: ChunkRange,
        points: &[R],
        codec: &Compression,
        spill_path: Option<&Path>,
    ) -> Result<Self> {
        let mut chunk = Self {
            kind: R::KIND,
            range,
            codec: codec.clone(),
            segments: BTreeMap::new(),
        };
        if points.is_empty() {
            return Ok(chunk);
        }

        let batch = R::to_batch(points)?;
        let sorted = sort_by_segment(&batch, R::SEGMENT_ORDER)?;
        let ids = column::<Int32Array>(&sorted, R::SEGMENT_COLUMN)?;
        let times = column::<TimestampNanosecondArray>(&sorted, "time")?;

        let mut offset = 0;
        while offset < sorted.num_rows() {
            let id = ids.value(offset);
            let mut end = offset + 1;
            while end < sorted.num_rows() && ids.value(end) == id {
                end += 1;
            }

            let bytes = encode_ipc(&sorted.slice(offset, end - offset), codec)?;
            let encoded_bytes = bytes.len();
            let payload = match spill_path {
                // on error, dropping `chunk` removes the segments spilled so far
                Some(dir) => Payload::Spilled(spill_segment(dir, R::KIND, &range, id, &bytes)?),
                None => Payload::Memory(bytes),
            };

            chunk.segments.insert(
                id,
                Segment {
                    segment_id: id,
                    rows: end - offset,
                    min_time: DateTime::from_timestamp_nanos(times.value(offset)),
                    max_time: DateTime::from_timestamp_nanos(times.value(end - 1)),
                    encoded_bytes,
                    payload,
                },
            );
            offset = end;
        }

        Ok(chunk)
    }

    pub fn rows(&self) -> usize {
        self.segments.values().map(|s| s.rows).sum()
    }

    pub fn encoded_bytes(&self) -> usize {
        self.segments.values().map(|s| s.encoded_bytes).sum()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn segment(&self, segment_id: i32) -> Option<&Segment> {
        self.segments.get(&segment_id)
    }

    /// Matching points, decoding only segments the filter can hit.
    pub fn points<R: Record>(&self, filter: &PointFilter) -> Result<Vec<R>> {
        if R::KIND != self.kind {
            return Err(Error::CorruptSegment(format!(
                "{} chunk read as {}",
                self.kind,
                R::KIND
            )));
        }

        let candidates: Vec<&Segment> = match R::filter_segment(filter) {
            Some(id) => self.segments.get(&id).into_iter().collect(),
            None => self.segments.values().collect(),
        };

        let mut points = Vec::new();
        for segment in candidates {
            if !segment.overlaps(filter.start, filter.end) {
                continue;
            }
            points.extend(
                self.decode::<R>(segment)?
                    .into_iter()
                    .filter(|p| p.matches(filter)),
            );
        }
        Ok(points)
    }

    fn decode<R: Record>(&self, segment: &Segment) -> Result<Vec<R>> {
        let bytes: Cow<'_, [u8]> = match &segment.payload {
            Payload::Memory(bytes) => Cow::Borrowed(bytes.as_slice()),
            Payload::Spilled(path) => Cow::Owned(std::fs::read(path)?),
        };

        let reader = StreamReader::try_new(Cursor::new(bytes.as_ref()), None)?;
        let mut points = Vec::with_capacity(segment.rows);
        for batch in reader {
            points.extend(R::from_batch(&batch?)?);
        }

        if points.len() != segment.rows {
            return Err(Error::CorruptSegment(format!(
                "segment {} of {} chunk {} decoded {} rows, expected {}",
                segment.segment_id,
                self.kind,
                self.range.start,
                points.len(),
                segment.rows
            )));
        }
        Ok(points)
    }
}

/// Spill files live exactly as long as the chunk; retention and failed builds
/// release them once the last reader lets go.
impl Drop for CompressedChunk {
    fn drop(&mut self) {
        for segment in self.segments.values() {
            if let Some(path) = segment.spill_file() {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("Failed to remove spill file {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn sort_by_segment(batch: &RecordBatch, order: &[&str]) -> Result<RecordBatch> {
    let sort_columns = order
        .iter()
        .map(|name| {
            batch
                .column_by_name(name)
                .map(|values| SortColumn {
                    values: values.clone(),
                    options: None,
                })
                .ok_or_else(|| Error::CorruptSegment(format!("missing sort column {name}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let indices = lexsort_to_indices(&sort_columns, None)?;

    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|col| take(col.as_ref(), &indices, None))
        .collect::<std::result::Result<_, _>>()?;

    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

fn encode_ipc(batch: &RecordBatch, codec: &Compression) -> Result<Vec<u8>> {
    let options = IpcWriteOptions::default().try_with_compression(codec.ipc_codec())?;
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new_with_options(&mut buffer, &batch.schema(), options)?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buffer)
}

fn spill_segment(
    dir: &Path,
    kind: PointKind,
    range: &ChunkRange,
    segment_id: i32,
    bytes: &[u8],
) -> Result<PathBuf> {
    let file_path = dir.join(format!(
        "{}_{}_{}_{}.arrow",
        kind,
        range.start.format("%Y-%m-%d_%H-%M-%S"),
        segment_id,
        generate_random_string(10)
    ));
    let temp_path = file_path.with_extension("tmp");

    std::fs::write(&temp_path, bytes)?;
    std::fs::rename(&temp_path, &file_path)?;

    Ok(file_path)
}

fn generate_random_string(len: usize) -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
