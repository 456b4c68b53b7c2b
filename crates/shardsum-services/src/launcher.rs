//! Process launcher. Stages dependencies and starts the coordinator
//! entry point as a child process.
//!
//! Lifecycle: `stage_in` → `submit` → `wait` → `cleanup`. The entry
//! point receives the whitespace-joined argument string split back into
//! positional arguments and runs with the staging directory as its
//! working directory.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::process::{Child, Command};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("dependency directory {0} does not exist")]
    MissingLibDir(PathBuf),
    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start {entry_point}: {source}")]
    Spawn {
        entry_point: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no application has been submitted")]
    NotSubmitted,
    #[error("failed waiting for application: {0}")]
    Wait(#[source] std::io::Error),
    #[error("failed to remove staging directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct ProcessLauncher {
    lib_dir: PathBuf,
    staging: PathBuf,
    child: Option<Child>,
}

impl ProcessLauncher {
    /// `root` is where staging happens, `lib_dir` holds the dependencies to
    /// stage. Nothing touches the filesystem until `stage_in`.
    pub fn new(root: impl AsRef<Path>, lib_dir: impl Into<PathBuf>, staging_dir: &str) -> Self {
        Self {
            lib_dir: lib_dir.into(),
            staging: root.as_ref().join(staging_dir),
            child: None,
        }
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Copy every regular file in the dependency directory into staging.
    /// Returns the number of files staged.
    pub fn stage_in(&self) -> Result<usize, LaunchError> {
        if !self.lib_dir.is_dir() {
            return Err(LaunchError::MissingLibDir(self.lib_dir.clone()));
        }
        std::fs::create_dir_all(&self.staging).map_err(|source| LaunchError::Stage {
            path: self.staging.clone(),
            source,
        })?;

        let entries = std::fs::read_dir(&self.lib_dir).map_err(|source| LaunchError::Stage {
            path: self.lib_dir.clone(),
            source,
        })?;

        let mut staged = 0;
        for entry in entries {
            let entry = entry.map_err(|source| LaunchError::Stage {
                path: self.lib_dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let dest = self.staging.join(entry.file_name());
            std::fs::copy(&path, &dest).map_err(|source| LaunchError::Stage {
                path: path.clone(),
                source,
            })?;
            staged += 1;
        }

        tracing::info!(staging = %self.staging.display(), files = staged, "dependencies staged");
        Ok(staged)
    }

    /// Start `entry_point` with `args`, a whitespace-joined argument string,
    /// and the extra environment in `envs`.
    pub fn submit(
        &mut self,
        entry_point: &str,
        args: &str,
        envs: &[(&str, &str)],
    ) -> Result<(), LaunchError> {
        let child = Command::new(entry_point)
            .args(args.split_whitespace())
            .envs(envs.iter().copied())
            .current_dir(&self.staging)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                entry_point: entry_point.to_string(),
                source,
            })?;
        tracing::info!(entry_point, args, pid = child.id(), "application submitted");
        self.child = Some(child);
        Ok(())
    }

    /// Wait until the submitted process exits.
    pub async fn wait(&mut self) -> Result<ExitStatus, LaunchError> {
        let child = self.child.as_mut().ok_or(LaunchError::NotSubmitted)?;
        let status = child.wait().await.map_err(LaunchError::Wait)?;
        tracing::info!(%status, "application finished");
        self.child = None;
        Ok(status)
    }

    /// Remove the staging directory. Missing staging is not an error.
    pub fn cleanup(&self) -> Result<(), LaunchError> {
        match std::fs::remove_dir_all(&self.staging) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LaunchError::Cleanup {
                path: self.staging.clone(),
                source,
            }),
        }
    }
}
