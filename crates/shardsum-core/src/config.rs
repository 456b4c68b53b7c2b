//! Configuration system for shardsum.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SHARDSUM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/shardsum/config.toml
//!   3. ~/.config/shardsum/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardsumConfig {
    pub store: StoreConfig,
    pub fabric: FabricConfig,
    pub digest: DigestConfig,
    pub collect: CollectConfig,
    pub launcher: LauncherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory file ids are resolved against. Absolute ids bypass it.
    pub root: PathBuf,
    /// Physical chunk size reported for every file.
    pub block_size: u64,
    /// Hosts advertised as holding each chunk.
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Logical pool every runtime of one batch joins.
    pub pool_name: String,
    /// Rendezvous bind address. Port 0 = OS-assigned.
    pub server_address: String,
    /// Concurrent digest workers. 0 = available parallelism.
    pub workers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Read buffer per task. Bounds task memory regardless of block length.
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Give up waiting for results after N seconds. 0 = wait forever.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Staging directory name, created under the submitter's root path.
    pub staging_dir: String,
    /// Program the launcher starts with `"<inputFile> <workerCount>"`.
    pub entry_point: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            block_size: 64 * 1024 * 1024, // 64 MiB
            hosts: vec!["localhost".to_string()],
        }
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            pool_name: "shardsum".to_string(),
            server_address: "127.0.0.1:0".to_string(),
            workers: 0,
        }
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self { timeout_secs: 0 }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            staging_dir: "shardsum-staging".to_string(),
            entry_point: "shardsumd".to_string(),
        }
    }
}

impl FabricConfig {
    /// Resolved worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers as usize
        }
    }
}

impl CollectConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("shardsum")
}

fn home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid value for {0}: {1:?}")]
    InvalidEnv(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ShardsumConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ShardsumConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SHARDSUM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply SHARDSUM_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHARDSUM_STORE__ROOT") {
            self.store.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHARDSUM_STORE__BLOCK_SIZE") {
            self.store.block_size = parse_env("SHARDSUM_STORE__BLOCK_SIZE", v)?;
        }
        if let Some(v) = lookup("SHARDSUM_FABRIC__POOL_NAME") {
            self.fabric.pool_name = v;
        }
        if let Some(v) = lookup("SHARDSUM_FABRIC__SERVER_ADDRESS") {
            self.fabric.server_address = v;
        }
        if let Some(v) = lookup("SHARDSUM_FABRIC__WORKERS") {
            self.fabric.workers = parse_env("SHARDSUM_FABRIC__WORKERS", v)?;
        }
        if let Some(v) = lookup("SHARDSUM_COLLECT__TIMEOUT_SECS") {
            self.collect.timeout_secs = parse_env("SHARDSUM_COLLECT__TIMEOUT_SECS", v)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv(key, value))
}
