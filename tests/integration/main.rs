//! shardsum integration test harness.
//!
//! Every test runs a real coordinator against real files in a scratch
//! directory. Faults are injected at the block store, never inside the
//! coordinator: a `FaultyStore` wraps the local store and breaks reads
//! for chosen block offsets.
//!
//!   cargo test --test integration

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use shardsum_core::config::ShardsumConfig;

mod batch;
mod failures;
mod fault;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

// ── Scratch space ─────────────────────────────────────────────────────────────

/// Scratch directory removed on drop, including after a test panics.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(name: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "shardsum-it-{}-{}-{}",
            name,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path).expect("failed to create scratch dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `len` bytes of a position-dependent pattern and return them.
    pub fn write_patterned(&self, name: &str, len: u64) -> Vec<u8> {
        let data = patterned(len);
        std::fs::write(self.path.join(name), &data).expect("failed to write input file");
        data
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Bytes whose value depends on position, so a block read from the wrong
/// offset produces a different digest.
pub fn patterned(len: u64) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect()
}

// ── Config ────────────────────────────────────────────────────────────────────

pub fn test_config(root: &Path, block_size: u64, workers: u32) -> ShardsumConfig {
    let mut config = ShardsumConfig::default();
    config.store.root = root.to_path_buf();
    config.store.block_size = block_size;
    config.fabric.workers = workers;
    config.fabric.pool_name = "integration".to_string();
    config.digest.buffer_size = 64 * KIB as usize;
    config
}
