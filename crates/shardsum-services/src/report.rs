//! Batch report, what the coordinator hands back once every block has
//! reported.

use std::fmt;

use serde::{Deserialize, Serialize};
use shardsum_core::BlockResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub file: String,
    /// Blocks the file was partitioned into.
    pub blocks: usize,
    /// Results in arrival order.
    pub results: Vec<BlockResult>,
    /// Wall clock from fabric start to the last result, when measured.
    pub elapsed_ms: Option<u64>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| !r.has_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.has_failed()).count()
    }

    /// Results ordered by the offset each one carries.
    pub fn by_offset(&self) -> Vec<&BlockResult> {
        let mut sorted: Vec<&BlockResult> = self.results.iter().collect();
        sorted.sort_by_key(|r| r.offset());
        sorted
    }

    /// True when the result ranges tile `[0, file_len)` exactly.
    pub fn coverage_ok(&self, file_len: u64) -> bool {
        let mut next = 0u64;
        for r in self.by_offset() {
            if r.offset() != next {
                return false;
            }
            next = r.offset() + r.size();
        }
        next == file_len
    }

    /// Result lines in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.results.iter().map(BlockResult::render_line).collect()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results: ")?;
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        write!(
            f,
            "{} blocks, {} ok, {} failed",
            self.blocks,
            self.succeeded(),
            self.failed()
        )?;
        if let Some(ms) = self.elapsed_ms {
            write!(f, "\nrun took: {ms} ms.")?;
        }
        Ok(())
    }
}
