//! Block store: file metadata, physical chunk layout and ranged reads.
//!
//! The coordinator only ever asks for metadata. Digest tasks open the
//! byte range they were assigned and stream it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use shardsum_core::config::StoreConfig;
use shardsum_core::{BlockLocation, FileStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("i/o error on {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn from_io(file: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(file.to_string())
        } else {
            StoreError::Io {
                file: file.to_string(),
                source,
            }
        }
    }
}

/// Source of file layout and block contents.
pub trait BlockStore: Send + Sync {
    /// Length, physical block size and replication of `file`.
    fn file_status(&self, file: &str) -> Result<FileStatus, StoreError>;

    /// Physical chunks overlapping `[start, start + len)`, in offset order.
    fn block_locations(
        &self,
        file: &str,
        start: u64,
        len: u64,
    ) -> Result<Vec<BlockLocation>, StoreError>;

    /// Reader positioned at `offset` yielding at most `length` bytes.
    fn open_range(
        &self,
        file: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn Read + Send>, StoreError>;
}

/// Block store over the local filesystem.
///
/// Files are split into fixed `block_size` chunks, the last one shorter.
/// Every chunk reports the same configured host list.
pub struct LocalBlockStore {
    root: PathBuf,
    block_size: u64,
    hosts: Vec<String>,
}

impl LocalBlockStore {
    pub fn new(root: impl Into<PathBuf>, block_size: u64) -> Self {
        Self {
            root: root.into(),
            block_size: block_size.max(1),
            hosts: vec!["localhost".to_string()],
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let mut store = Self::new(config.root.clone(), config.block_size);
        store.hosts = config.hosts.clone();
        store
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Absolute file ids are used as-is, relative ones live under `root`.
    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl BlockStore for LocalBlockStore {
    fn file_status(&self, file: &str) -> Result<FileStatus, StoreError> {
        let meta =
            std::fs::metadata(self.resolve(file)).map_err(|e| StoreError::from_io(file, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotAFile(file.to_string()));
        }
        Ok(FileStatus {
            len: meta.len(),
            block_size: self.block_size,
            replication: 1,
        })
    }

    fn block_locations(
        &self,
        file: &str,
        start: u64,
        len: u64,
    ) -> Result<Vec<BlockLocation>, StoreError> {
        let status = self.file_status(file)?;
        if start >= status.len {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(len).min(status.len);
        let path = self.resolve(file).to_string_lossy().into_owned();

        let mut locations = Vec::new();
        let mut offset = start - start % self.block_size;
        while offset < end {
            let length = self.block_size.min(status.len - offset);
            locations.push(BlockLocation {
                offset,
                length,
                hosts: self.hosts.clone(),
                cached_hosts: Vec::new(),
                names: self.hosts.iter().map(|h| format!("{h}:{path}")).collect(),
                topology_paths: self.hosts.iter().map(|h| format!("/default/{h}")).collect(),
            });
            offset += length;
        }
        Ok(locations)
    }

    fn open_range(
        &self,
        file: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        let mut handle = File::open(self.resolve(file)).map_err(|e| StoreError::from_io(file, e))?;
        handle
            .seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::from_io(file, e))?;
        Ok(Box::new(handle.take(length)))
    }
}
