//! Block partitioner. Turns a file's physical layout into the ordered
//! list of blocks a batch processes.
//!
//! Pure translation over metadata: block count and sizing are whatever
//! the block store reports. No block contents are read here.

use shardsum_core::Block;

use crate::store::{BlockStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("input file not found: {0}")]
    NotFound(String),
    #[error("failed to read metadata for {file}: {source}")]
    Metadata {
        file: String,
        #[source]
        source: StoreError,
    },
    #[error("block layout for {file} does not tile the file: {reason}")]
    Layout { file: String, reason: String },
}

impl PartitionError {
    fn from_store(file: &str, source: StoreError) -> Self {
        match source {
            StoreError::NotFound(_) => PartitionError::NotFound(file.to_string()),
            source => PartitionError::Metadata {
                file: file.to_string(),
                source,
            },
        }
    }
}

/// Partition `file` into blocks covering `[0, len)` with no gaps and no
/// overlaps, one per physical chunk, in offset order.
pub fn partition(store: &dyn BlockStore, file: &str) -> Result<Vec<Block>, PartitionError> {
    let status = store
        .file_status(file)
        .map_err(|e| PartitionError::from_store(file, e))?;

    tracing::info!(
        file,
        len = status.len,
        block_size = status.block_size,
        replication = status.replication,
        "found input file"
    );

    let locations = store
        .block_locations(file, 0, status.len)
        .map_err(|e| PartitionError::from_store(file, e))?;

    let mut blocks = Vec::with_capacity(locations.len());
    let mut expected_offset = 0u64;

    for (index, loc) in locations.into_iter().enumerate() {
        if loc.offset != expected_offset {
            return Err(PartitionError::Layout {
                file: file.to_string(),
                reason: format!(
                    "block {} starts at {}, expected {}",
                    index, loc.offset, expected_offset
                ),
            });
        }
        if loc.length == 0 {
            return Err(PartitionError::Layout {
                file: file.to_string(),
                reason: format!("block {} at {} is empty", index, loc.offset),
            });
        }

        tracing::debug!(
            index,
            start = loc.offset,
            end = loc.offset + loc.length,
            hosts = ?loc.hosts,
            cached = ?loc.cached_hosts,
            names = ?loc.names,
            topology = ?loc.topology_paths,
            "block location"
        );

        expected_offset = loc.offset + loc.length;
        blocks.push(Block {
            index,
            offset: loc.offset,
            length: loc.length,
            hosts: loc.hosts,
        });
    }

    if expected_offset != status.len {
        return Err(PartitionError::Layout {
            file: file.to_string(),
            reason: format!(
                "blocks end at {}, file length is {}",
                expected_offset, status.len
            ),
        });
    }

    Ok(blocks)
}
