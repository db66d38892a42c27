use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::chunk::{Chunk, ChunkData, ChunkState, InsertError};
use super::compress::{CompressOutcome, CompressedChunk, CompressionReport};
use super::{ChunkRange, Error, PointFilter, Record, Result, StorageConfig};

/// Append-only chunk store for one point kind.
///
/// Chunks are created lazily on the first write into their interval and are
/// indexed by interval start. The index lock is only held to look up, create
/// or drop chunks; writes, reads and compression lock individual chunks.
pub struct Table<R: Record> {
    config: StorageConfig,
    chunks: RwLock<BTreeMap<DateTime<Utc>, Arc<Chunk<R>>>>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    writes: AtomicU64,
    rejected_duplicates: AtomicU64,
    rejected_sealed: AtomicU64,
    deletes: AtomicU64,
    compress_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub chunks: usize,
    pub compressed_chunks: usize,
    pub raw_rows: usize,
    pub compressed_rows: usize,
    pub encoded_bytes: usize,
    pub writes: u64,
    pub rejected_duplicates: u64,
    pub rejected_sealed: u64,
    pub deletes: u64,
    pub compress_failures: u64,
}

/// Chunk metadata as seen from outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub range: ChunkRange,
    pub state: ChunkState,
    pub rows: usize,
    pub segments: usize,
    pub encoded_bytes: usize,
}

impl<R: Record> Table<R> {
    pub fn new(config: StorageConfig) -> Result<Self> {
        // Create spill directory if needed
        if let Some(spill_path) = &config.spill_path {
            std::fs::create_dir_all(spill_path)?;
        }

        Ok(Self {
            config,
            chunks: RwLock::new(BTreeMap::new()),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn chunk_range(&self, time: DateTime<Utc>) -> Result<ChunkRange> {
        ChunkRange::containing(time, self.config.chunk_width)
    }

    fn chunk_for(&self, range: ChunkRange) -> Arc<Chunk<R>> {
        if let Some(chunk) = self.chunks.read().get(&range.start) {
            return Arc::clone(chunk);
        }

        let mut chunks = self.chunks.write();
        let chunk = chunks.entry(range.start).or_insert_with(|| {
            log::debug!("Creating {} chunk [{}, {})", R::KIND, range.start, range.end);
            Arc::new(Chunk::new(range, self.config.write_shards))
        });
        Arc::clone(chunk)
    }

    pub(crate) fn chunk_at(&self, start: DateTime<Utc>) -> Option<Arc<Chunk<R>>> {
        self.chunks.read().get(&start).cloned()
    }

    /// Stores a point in the chunk its time falls into.
    pub fn write(&self, point: R) -> Result<()> {
        let range = self.chunk_range(point.time())?;
        let mut point = point;

        loop {
            let chunk = self.chunk_for(range);
            match chunk.insert(point) {
                Ok(()) => {
                    self.counters.writes.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(InsertError::Duplicate(existing)) => {
                    self.counters.rejected_duplicates.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::DuplicateKey(format!("{} {:?}", R::KIND, existing.key())));
                }
                Err(InsertError::Sealed) => {
                    self.counters.rejected_sealed.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::ChunkSealed {
                        kind: R::KIND,
                        chunk_start: range.start,
                    });
                }
                Err(InsertError::Retired(rejected)) => {
                    // retention dropped the chunk between lookup and insert
                    point = rejected;
                }
            }
        }
    }

    /// Point-level delete for error correction. Compressed chunks are immutable.
    pub fn delete(&self, key: &R::Key) -> Result<R> {
        let range = self.chunk_range(R::key_time(key))?;
        let not_found = || Error::NotFound(format!("{} {:?}", R::KIND, key));

        let chunk = self.chunk_at(range.start).ok_or_else(not_found)?;
        let removed = chunk.remove(key)?.ok_or_else(not_found)?;
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(removed)
    }

    /// Chunks overlapping `[start, end)`, newest first.
    pub(crate) fn relevant_chunks(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<Arc<Chunk<R>>> {
        let chunks = self.chunks.read();
        chunks
            .values()
            .rev()
            .filter(|chunk| chunk.range.overlaps(start, end))
            .cloned()
            .collect()
    }

    /// Every point in `[start, end)` in key order, uncapped. Used by aggregate refresh.
    pub(crate) fn scan_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<R>> {
        let filter = PointFilter::range(start, end);
        let mut points = Vec::new();
        for chunk in self.relevant_chunks(filter.start, filter.end) {
            points.extend(chunk.collect(&filter)?);
        }
        points.sort_by_key(|p| p.key());
        Ok(points)
    }

    pub fn chunks(&self) -> Vec<ChunkInfo> {
        let chunks: Vec<Arc<Chunk<R>>> = self.chunks.read().values().cloned().collect();
        chunks
            .iter()
            .map(|chunk| {
                let state = chunk.state();
                match chunk.data() {
                    ChunkData::Raw(raw) => ChunkInfo {
                        range: chunk.range,
                        state,
                        rows: raw.len(),
                        segments: 0,
                        encoded_bytes: 0,
                    },
                    ChunkData::Compressed(compressed) => ChunkInfo {
                        range: chunk.range,
                        state,
                        rows: compressed.rows(),
                        segments: compressed.segments().count(),
                        encoded_bytes: compressed.encoded_bytes(),
                    },
                }
            })
            .collect()
    }

    /// The chunk currently accepting writes at the head of the table.
    pub fn newest_chunk(&self) -> Option<ChunkRange> {
        self.chunks.read().values().next_back().map(|c| c.range)
    }

    pub fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            writes: self.counters.writes.load(Ordering::Relaxed),
            rejected_duplicates: self.counters.rejected_duplicates.load(Ordering::Relaxed),
            rejected_sealed: self.counters.rejected_sealed.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            compress_failures: self.counters.compress_failures.load(Ordering::Relaxed),
            ..Default::default()
        };
        for info in self.chunks() {
            stats.chunks += 1;
            match info.state {
                ChunkState::Compressed => {
                    stats.compressed_chunks += 1;
                    stats.compressed_rows += info.rows;
                    stats.encoded_bytes += info.encoded_bytes;
                }
                _ => stats.raw_rows += info.rows,
            }
        }
        stats
    }

    /// The head chunk and the chunk containing `now` are never sealed, so a
    /// skewed or far-future `now` cannot close the interval being written.
    fn is_compressible(
        &self,
        range: &ChunkRange,
        now: DateTime<Utc>,
        head: Option<ChunkRange>,
    ) -> bool {
        now - range.end >= self.config.compress_after
            && head != Some(*range)
            && !range.contains(now)
    }

    /// Compresses the chunk starting at `chunk_start` if its interval closed at
    /// least `compress_after` ago and a newer chunk exists. Re-running on a
    /// compressed chunk is a no-op.
    pub fn compress(
        &self,
        chunk_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CompressOutcome> {
        let chunk = self
            .chunk_at(chunk_start)
            .ok_or_else(|| Error::NotFound(format!("{} chunk starting {}", R::KIND, chunk_start)))?;
        self.compress_chunk(&chunk, now)
    }

    fn compress_chunk(&self, chunk: &Chunk<R>, now: DateTime<Utc>) -> Result<CompressOutcome> {
        if chunk.state() == ChunkState::Compressed {
            return Ok(CompressOutcome::AlreadyCompressed);
        }
        if !self.is_compressible(&chunk.range, now, self.newest_chunk()) {
            return Ok(CompressOutcome::NotEligible);
        }

        // another compressor got here first
        let Some(raw) = chunk.begin_seal() else {
            return Ok(CompressOutcome::AlreadyCompressed);
        };

        let points = raw.snapshot();
        match CompressedChunk::build(
            chunk.range,
            &points,
            &self.config.compression,
            self.config.spill_path.as_deref(),
        ) {
            Ok(compressed) => {
                let outcome = CompressOutcome::Compressed {
                    rows: compressed.rows(),
                    segments: compressed.segments().count(),
                    encoded_bytes: compressed.encoded_bytes(),
                };
                chunk.finish_seal(compressed);
                log::debug!("Compressed {} chunk {} ({:?})", R::KIND, chunk.range.start, outcome);
                Ok(outcome)
            }
            Err(e) => {
                chunk.abort_seal();
                Err(e)
            }
        }
    }

    /// Compresses every eligible chunk, oldest first. A failing chunk is logged
    /// and left raw for the next pass; `cancel` is checked between chunks.
    pub fn compress_due(&self, now: DateTime<Utc>, cancel: &AtomicBool) -> CompressionReport {
        let head = self.newest_chunk();
        let candidates: Vec<Arc<Chunk<R>>> = self
            .chunks
            .read()
            .values()
            .filter(|chunk| self.is_compressible(&chunk.range, now, head))
            .cloned()
            .collect();

        let mut report = CompressionReport::default();
        for chunk in candidates {
            if cancel.load(Ordering::Acquire) {
                report.cancelled = true;
                break;
            }
            match self.compress_chunk(&chunk, now) {
                Ok(CompressOutcome::Compressed { rows, .. }) => {
                    report.compressed += 1;
                    report.rows += rows;
                }
                Ok(_) => {}
                Err(e) => {
                    self.counters.compress_failures.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    log::error!(
                        "Failed to compress {} chunk {}: {}",
                        R::KIND,
                        chunk.range.start,
                        e
                    );
                }
            }
        }
        report
    }

    /// Removes chunks from the index and returns them. Callers guarantee the
    /// head chunk is never passed in.
    pub(crate) fn detach_chunks(&self, starts: &[DateTime<Utc>]) -> Vec<Arc<Chunk<R>>> {
        let mut chunks = self.chunks.write();
        starts.iter().filter_map(|start| chunks.remove(start)).collect()
    }

    pub(crate) fn chunk_ranges(&self) -> Vec<ChunkRange> {
        self.chunks.read().values().map(|c| c.range).collect()
    }
}
