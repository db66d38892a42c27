use std::sync::Arc;

use super::chunk::Chunk;
use super::{PointFilter, Record, Result, Table};

impl<R: Record> Table<R> {
    /// Lazy, newest-first read capped at `max_results` points.
    ///
    /// The set of chunks is fixed when the read starts; a chunk is only
    /// materialized once the iterator reaches it, so a read satisfied by the
    /// newest chunks never touches older (possibly compressed) ones.
    pub fn read(&self, filter: &PointFilter) -> ScanIter<R> {
        ScanIter {
            chunks: self.relevant_chunks(filter.start, filter.end).into_iter(),
            buffer: Vec::new().into_iter(),
            filter: filter.clone(),
            remaining: self.config().max_results,
            failed: false,
        }
    }

    /// Collects a capped read, stopping at the first decode error.
    pub fn query(&self, filter: &PointFilter) -> Result<Vec<R>> {
        self.read(filter).collect()
    }
}

pub struct ScanIter<R: Record> {
    chunks: std::vec::IntoIter<Arc<Chunk<R>>>,
    buffer: std::vec::IntoIter<R>,
    filter: PointFilter,
    remaining: usize,
    failed: bool,
}

impl<R: Record> Iterator for ScanIter<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }

        loop {
            if let Some(point) = self.buffer.next() {
                self.remaining -= 1;
                return Some(Ok(point));
            }

            let chunk = self.chunks.next()?;
            match chunk.collect(&self.filter) {
                Ok(points) => self.buffer = points.into_iter(),
                Err(e) => {
                    log::error!("Failed to scan {} chunk {}: {}", R::KIND, chunk.range.start, e);
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
