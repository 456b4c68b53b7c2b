//! shardsum-core — shared types for block-parallel file digests.
//! Blocks, digests, per-block results and configuration. Every other
//! shardsum crate depends on this one.

pub mod block;
pub mod config;
pub mod digest;
pub mod result;

pub use block::{Block, BlockLocation, FileStatus};
pub use digest::{Digest, StreamHasher};
pub use result::{BlockResult, DigestError};
