//! File layout types: what the block store reports and what the
//! partitioner hands to the coordinator.

use serde::{Deserialize, Serialize};

/// Metadata for one file in the block store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    /// File length in bytes.
    pub len: u64,
    /// Physical chunk size the store splits the file into.
    pub block_size: u64,
    /// Number of copies the store keeps of each chunk.
    pub replication: u16,
}

/// One physical chunk as reported by the block store.
///
/// Only `offset` and `length` drive the batch. Host and topology
/// fields are carried for logging and placement hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub offset: u64,
    pub length: u64,
    pub hosts: Vec<String>,
    pub cached_hosts: Vec<String>,
    pub names: Vec<String>,
    pub topology_paths: Vec<String>,
}

/// A contiguous byte range of the input file, processed as one unit.
///
/// Blocks are produced in increasing offset order and never change
/// after partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
    /// Hosts holding a local copy. Informational, not binding.
    pub hosts: Vec<String>,
}

impl Block {
    /// Exclusive end of the byte range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}
