//! The unit of work: one digest task per block.
//!
//! A task reads its byte range through the block store, streams it into
//! the hasher and produces exactly one `BlockResult`. Nothing escapes
//! `execute`: every fault becomes a `Failure` tagged with the attempted
//! offset and size. There are no retries.

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use shardsum_core::{Block, BlockResult, DigestError, StreamHasher};

use crate::fabric::{ActivityId, ResultSink};
use crate::store::{BlockStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestTask {
    pub file: String,
    pub block_index: usize,
    pub offset: u64,
    pub length: u64,
    /// Where the result is delivered.
    pub collector: ActivityId,
}

impl DigestTask {
    pub fn for_block(file: &str, block: &Block, collector: ActivityId) -> Self {
        Self {
            file: file.to_string(),
            block_index: block.index,
            offset: block.offset,
            length: block.length,
            collector,
        }
    }

    /// Digest `[offset, offset + length)` with a `buffer_size` read buffer.
    pub fn execute(&self, store: &dyn BlockStore, buffer_size: usize) -> BlockResult {
        match self.digest(store, buffer_size.max(1)) {
            Ok((digest, read_time, compute_time)) => BlockResult::Success {
                file: self.file.clone(),
                block_index: self.block_index,
                size: self.length,
                offset: self.offset,
                read_time_ms: read_time.as_millis() as u64,
                compute_time_ms: compute_time.as_millis() as u64,
                digest,
            },
            Err(cause) => self.failure(cause),
        }
    }

    /// Failure result for this task's range.
    pub fn failure(&self, cause: DigestError) -> BlockResult {
        BlockResult::Failure {
            file: self.file.clone(),
            block_index: self.block_index,
            size: self.length,
            offset: self.offset,
            cause,
        }
    }

    /// Execute and deliver the result. The one report is the task's only
    /// side effect.
    pub fn run(&self, store: &dyn BlockStore, buffer_size: usize, sink: &dyn ResultSink) {
        let result = self.execute(store, buffer_size);
        tracing::debug!(
            file = %self.file,
            block = self.block_index,
            offset = self.offset,
            failed = result.has_failed(),
            "digest task finished"
        );
        if let Err(e) = sink.report(self.collector, result) {
            tracing::warn!(
                collector = %self.collector,
                block = self.block_index,
                error = %e,
                "failed to deliver block result"
            );
        }
    }

    fn digest(
        &self,
        store: &dyn BlockStore,
        buffer_size: usize,
    ) -> Result<(shardsum_core::Digest, Duration, Duration), DigestError> {
        if self.offset.checked_add(self.length).is_none() {
            return Err(DigestError::InvalidRange {
                offset: self.offset,
                length: self.length,
            });
        }

        let read_start = Instant::now();
        let mut reader = store
            .open_range(&self.file, self.offset, self.length)
            .map_err(|e| self.open_error(e))?;
        let mut read_time = read_start.elapsed();
        let mut compute_time = Duration::ZERO;

        let mut hasher = StreamHasher::new();
        let mut buf = vec![0u8; buffer_size.min(self.length.max(1) as usize)];

        while hasher.bytes_hashed() < self.length {
            let want = buf.len().min((self.length - hasher.bytes_hashed()) as usize);

            let t = Instant::now();
            let n = match reader.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(DigestError::ShortRead {
                        expected: self.length,
                        actual: hasher.bytes_hashed(),
                    })
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(DigestError::Read {
                        position: self.offset + hasher.bytes_hashed(),
                        message: e.to_string(),
                    })
                }
            };
            read_time += t.elapsed();

            let t = Instant::now();
            hasher.update(&buf[..n]);
            compute_time += t.elapsed();
        }

        Ok((hasher.finalize(), read_time, compute_time))
    }

    fn open_error(&self, e: StoreError) -> DigestError {
        DigestError::Open {
            file: self.file.clone(),
            message: e.to_string(),
        }
    }
}
