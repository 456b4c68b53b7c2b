//! Per-block results.
//!
//! Every digest task produces exactly one `BlockResult`. Errors inside a
//! task never cross the task boundary: they are captured as a
//! `DigestError` and carried by the `Failure` variant, tagged with the
//! range that was attempted.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Why a block could not be digested.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DigestError {
    #[error("failed to open {file}: {message}")]
    Open { file: String, message: String },
    #[error("read failed at byte {position}: {message}")]
    Read { position: u64, message: String },
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },
    #[error("invalid range: offset {offset} length {length}")]
    InvalidRange { offset: u64, length: u64 },
    #[error("task panicked: {message}")]
    Panicked { message: String },
}

/// Outcome of digesting one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockResult {
    Success {
        file: String,
        block_index: usize,
        size: u64,
        offset: u64,
        read_time_ms: u64,
        compute_time_ms: u64,
        digest: Digest,
    },
    Failure {
        file: String,
        block_index: usize,
        size: u64,
        offset: u64,
        cause: DigestError,
    },
}

impl BlockResult {
    pub fn file(&self) -> &str {
        match self {
            BlockResult::Success { file, .. } | BlockResult::Failure { file, .. } => file,
        }
    }

    pub fn block_index(&self) -> usize {
        match self {
            BlockResult::Success { block_index, .. }
            | BlockResult::Failure { block_index, .. } => *block_index,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            BlockResult::Success { offset, .. } | BlockResult::Failure { offset, .. } => *offset,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            BlockResult::Success { size, .. } | BlockResult::Failure { size, .. } => *size,
        }
    }

    pub fn has_failed(&self) -> bool {
        matches!(self, BlockResult::Failure { .. })
    }

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            BlockResult::Success { digest, .. } => Some(digest),
            BlockResult::Failure { .. } => None,
        }
    }

    pub fn cause(&self) -> Option<&DigestError> {
        match self {
            BlockResult::Success { .. } => None,
            BlockResult::Failure { cause, .. } => Some(cause),
        }
    }

    /// One display line: `"  <offset> <hex>"` or `"  <offset> FAILED"`.
    pub fn render_line(&self) -> String {
        match self {
            BlockResult::Success { offset, digest, .. } => format!("  {} {}", offset, digest),
            BlockResult::Failure { offset, .. } => format!("  {} FAILED", offset),
        }
    }
}
