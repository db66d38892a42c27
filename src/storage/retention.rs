use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::chunk::ChunkData;
use super::{ChunkRange, Record, Table};

/// Chunks removed by one retention pass over a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub dropped: Vec<ChunkRange>,
    pub rows: usize,
}

impl<R: Record> Table<R> {
    /// Drops every chunk whose interval ended at or before `now - horizon`.
    ///
    /// The head chunk and the chunk containing `now` always survive, so a
    /// skewed or far-future `now` cannot expire the interval being written.
    pub fn drop_chunks_older_than(&self, now: DateTime<Utc>, horizon: TimeDelta) -> DropReport {
        let cutoff = now - horizon;
        let head = self.newest_chunk();

        let expired: Vec<DateTime<Utc>> = self
            .chunk_ranges()
            .into_iter()
            .filter(|range| range.end <= cutoff)
            .filter(|range| Some(*range) != head && !range.contains(now))
            .map(|range| range.start)
            .collect();

        let mut report = DropReport::default();
        if expired.is_empty() {
            return report;
        }

        for chunk in self.detach_chunks(&expired) {
            match chunk.retire() {
                ChunkData::Raw(raw) => report.rows += raw.len(),
                ChunkData::Compressed(compressed) => report.rows += compressed.rows(),
            }
            log::debug!("Dropped {} chunk [{}, {})", R::KIND, chunk.range.start, chunk.range.end);
            report.dropped.push(chunk.range);
        }

        log::info!(
            "Retention dropped {} {} chunks ({} rows) older than {}",
            report.dropped.len(),
            R::KIND,
            report.rows,
            cutoff
        );
        report
    }

    /// Applies the configured horizon; a table without one keeps everything.
    pub fn enforce_retention(&self, now: DateTime<Utc>) -> DropReport {
        match self.config().retention {
            Some(horizon) => self.drop_chunks_older_than(now, horizon),
            None => DropReport::default(),
        }
    }
}
