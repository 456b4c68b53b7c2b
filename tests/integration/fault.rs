//! Fault injection at the block store.
//!
//! `FaultyStore` delegates everything to a `LocalBlockStore` and swaps the
//! reader for chosen block offsets: either one that errors partway through
//! or one that stalls before yielding anything.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use shardsum_core::{BlockLocation, FileStatus};
use shardsum_services::{BlockStore, LocalBlockStore, StoreError};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Yield `after` bytes, then fail every read.
    ReadError { after: u64 },
    /// Sleep before delegating to the real reader.
    Stall(Duration),
}

pub struct FaultyStore {
    inner: LocalBlockStore,
    faults: HashMap<u64, Fault>,
}

impl FaultyStore {
    pub fn new(inner: LocalBlockStore) -> Self {
        Self {
            inner,
            faults: HashMap::new(),
        }
    }

    /// Inject `fault` into the block starting at `offset`.
    pub fn with_fault(mut self, offset: u64, fault: Fault) -> Self {
        self.faults.insert(offset, fault);
        self
    }

    pub fn shared(self) -> Arc<dyn BlockStore> {
        Arc::new(self)
    }
}

impl BlockStore for FaultyStore {
    fn file_status(&self, file: &str) -> Result<FileStatus, StoreError> {
        self.inner.file_status(file)
    }

    fn block_locations(
        &self,
        file: &str,
        start: u64,
        len: u64,
    ) -> Result<Vec<BlockLocation>, StoreError> {
        self.inner.block_locations(file, start, len)
    }

    fn open_range(
        &self,
        file: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        let reader = self.inner.open_range(file, offset, length)?;
        match self.faults.get(&offset) {
            None => Ok(reader),
            Some(Fault::ReadError { after }) => Ok(Box::new(BrokenReader {
                inner: reader.take(*after),
            })),
            Some(Fault::Stall(delay)) => Ok(Box::new(StallingReader {
                inner: reader,
                delay: Some(*delay),
            })),
        }
    }
}

struct BrokenReader {
    inner: io::Take<Box<dyn Read + Send>>,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::Other, "injected read fault")),
            n => Ok(n),
        }
    }
}

struct StallingReader {
    inner: Box<dyn Read + Send>,
    delay: Option<Duration>,
}

impl Read for StallingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay.take() {
            std::thread::sleep(delay);
        }
        self.inner.read(buf)
    }
}
