use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::compress::CompressedChunk;
use super::{ChunkRange, Error, PointFilter, Record, Result};

/// Raw, still-writable points of one chunk, sharded so writers on different
/// entities do not contend on a single lock.
pub(crate) struct RawChunk<R: Record> {
    shards: Vec<Mutex<BTreeMap<R::Key, R>>>,
}

impl<R: Record> RawChunk<R> {
    fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(BTreeMap::new())).collect(),
        }
    }

    fn shard(&self, key: &R::Key) -> &Mutex<BTreeMap<R::Key, R>> {
        let idx = R::shard_of(key) % self.shards.len() as u64;
        &self.shards[idx as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Matching points in key order.
    pub(crate) fn matching(&self, filter: &PointFilter) -> Vec<R> {
        let mut points: Vec<R> = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock();
            points.extend(shard.values().filter(|p| p.matches(filter)).cloned());
        }
        points.sort_by_key(|p| p.key());
        points
    }

    pub(crate) fn snapshot(&self) -> Vec<R> {
        self.matching(&PointFilter::default())
    }
}

#[derive(Clone)]
pub(crate) enum ChunkData<R: Record> {
    Raw(Arc<RawChunk<R>>),
    Compressed(Arc<CompressedChunk>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Raw,
    /// Compression in progress; readers still see the raw points, writers are rejected.
    Sealing,
    Compressed,
}

pub(crate) enum InsertError<R> {
    Duplicate(R),
    Sealed,
    /// Dropped by retention; hands the point back so the caller can retry.
    Retired(R),
}

/// One time partition. The representation is swapped from raw to compressed
/// under the write lock, so readers observe either the full raw set or the
/// full compressed set.
pub(crate) struct Chunk<R: Record> {
    pub(crate) range: ChunkRange,
    data: RwLock<ChunkData<R>>,
    sealing: AtomicBool,
    retired: AtomicBool,
}

impl<R: Record> Chunk<R> {
    pub(crate) fn new(range: ChunkRange, shards: usize) -> Self {
        Self {
            range,
            data: RwLock::new(ChunkData::Raw(Arc::new(RawChunk::new(shards)))),
            sealing: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn data(&self) -> ChunkData<R> {
        self.data.read().clone()
    }

    pub(crate) fn state(&self) -> ChunkState {
        match &*self.data.read() {
            ChunkData::Compressed(_) => ChunkState::Compressed,
            ChunkData::Raw(_) if self.sealing.load(Ordering::Acquire) => ChunkState::Sealing,
            ChunkData::Raw(_) => ChunkState::Raw,
        }
    }

    pub(crate) fn insert(&self, point: R) -> std::result::Result<(), InsertError<R>> {
        let data = self.data.read();
        if self.retired.load(Ordering::Acquire) {
            return Err(InsertError::Retired(point));
        }
        match &*data {
            ChunkData::Compressed(_) => Err(InsertError::Sealed),
            ChunkData::Raw(_) if self.sealing.load(Ordering::Acquire) => Err(InsertError::Sealed),
            ChunkData::Raw(raw) => {
                let key = point.key();
                let mut shard = raw.shard(&key).lock();
                if let Some(existing) = shard.get(&key) {
                    return Err(InsertError::Duplicate(existing.clone()));
                }
                shard.insert(key, point);
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&self, key: &R::Key) -> Result<Option<R>> {
        let data = self.data.read();
        match &*data {
            ChunkData::Raw(raw) if !self.sealing.load(Ordering::Acquire) => {
                Ok(raw.shard(key).lock().remove(key))
            }
            _ => Err(Error::ChunkSealed {
                kind: R::KIND,
                chunk_start: self.range.start,
            }),
        }
    }

    /// Matching points, newest first.
    pub(crate) fn collect(&self, filter: &PointFilter) -> Result<Vec<R>> {
        let mut points = match self.data() {
            ChunkData::Raw(raw) => raw.matching(filter),
            ChunkData::Compressed(compressed) => compressed.points::<R>(filter)?,
        };
        points.sort_by(|a, b| b.key().cmp(&a.key()));
        Ok(points)
    }

    /// Stops further writes. Waits for in-flight inserts, which hold the read lock.
    /// Returns the raw points to compress, or `None` if already compressed or sealing.
    pub(crate) fn begin_seal(&self) -> Option<Arc<RawChunk<R>>> {
        let data = self.data.write();
        let ChunkData::Raw(raw) = &*data else {
            return None;
        };
        if self.sealing.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Arc::clone(raw))
    }

    pub(crate) fn abort_seal(&self) {
        self.sealing.store(false, Ordering::Release);
    }

    pub(crate) fn finish_seal(&self, compressed: CompressedChunk) {
        let mut data = self.data.write();
        *data = ChunkData::Compressed(Arc::new(compressed));
        self.sealing.store(false, Ordering::Release);
    }

    /// Marks the chunk as dropped; inserts racing with retention recreate it instead.
    pub(crate) fn retire(&self) -> ChunkData<R> {
        let data = self.data.write();
        self.retired.store(true, Ordering::Release);
        data.clone()
    }
}
