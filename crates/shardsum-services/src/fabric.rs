//! Execution fabric: where collectors live and digest tasks run.
//!
//! `LocalFabric` is a worker pool on the current tokio runtime. Digest
//! tasks run on blocking threads, at most `workers` at a time. Collectors
//! are registered on the master runtime under an `ActivityId` and results
//! are routed to them by that id. The master never runs digest work on
//! the context that collects.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shardsum_core::config::ShardsumConfig;
use shardsum_core::{BlockResult, DigestError};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::collector::{CollectorError, ResultCollector};
use crate::digest_task::DigestTask;
use crate::rendezvous::{self, RendezvousError};
use crate::store::BlockStore;

/// Identity of a submitted activity. A collector's id is its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(u64);

impl ActivityId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity-{}", self.0)
    }
}

/// Something the fabric can schedule.
pub enum Activity {
    /// Registered on the master; receives reports addressed to its id.
    Collector(Arc<ResultCollector>),
    /// Run once on a worker, fire-and-forget.
    Digest(DigestTask),
}

/// Delivers a result to the collector registered at `to`.
pub trait ResultSink: Send + Sync {
    fn report(&self, to: ActivityId, result: BlockResult) -> Result<(), FabricError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("no tokio runtime available to host the fabric")]
    NoRuntime,
    #[error("fabric is not active")]
    NotActive,
    #[error("fabric is already active")]
    AlreadyActive,
    #[error("fabric has been shut down")]
    Shutdown,
    #[error("collectors can only be submitted to the master runtime")]
    NotMaster,
    #[error("no collector registered at {0}")]
    UnknownCollector(ActivityId),
    #[error("collector {to} rejected result: {source}")]
    Rejected {
        to: ActivityId,
        #[source]
        source: CollectorError,
    },
    #[error("failed to join pool {pool}: {source}")]
    Join {
        pool: String,
        #[source]
        source: RendezvousError,
    },
    #[error("{0} worker task(s) did not finish cleanly")]
    WorkersLost(usize),
    #[error("{pending} worker task(s) still running after {timeout:?}, abandoned")]
    DrainTimeout { pending: usize, timeout: Duration },
}

/// Runtime settings. Mirrors what a worker needs to find its pool.
#[derive(Debug, Clone)]
pub struct FabricSettings {
    /// The master hosts collectors. Workers only run tasks.
    pub is_master: bool,
    pub pool_name: String,
    /// Rendezvous address to join on activation. `None` = standalone.
    pub server_address: Option<String>,
    pub workers: usize,
    pub buffer_size: usize,
}

impl FabricSettings {
    pub fn master(config: &ShardsumConfig, server_address: Option<String>) -> Self {
        Self {
            is_master: true,
            pool_name: config.fabric.pool_name.clone(),
            server_address,
            workers: config.fabric.worker_count(),
            buffer_size: config.digest.buffer_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Active,
    Done,
}

/// Collector registry. Shared with every running task.
#[derive(Clone, Default)]
struct Router {
    collectors: Arc<DashMap<ActivityId, Arc<ResultCollector>>>,
}

impl ResultSink for Router {
    fn report(&self, to: ActivityId, result: BlockResult) -> Result<(), FabricError> {
        let collector = self
            .collectors
            .get(&to)
            .map(|c| c.clone())
            .ok_or(FabricError::UnknownCollector(to))?;
        collector
            .report(result)
            .map_err(|source| FabricError::Rejected { to, source })
    }
}

pub struct LocalFabric {
    settings: FabricSettings,
    store: Arc<dyn BlockStore>,
    runtime: Handle,
    router: Router,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
    phase: Mutex<Phase>,
    running: Mutex<Vec<JoinHandle<()>>>,
    member: Mutex<Option<String>>,
}

impl LocalFabric {
    /// Create a runtime on the current tokio runtime. Nothing runs until
    /// `activate`.
    pub fn create(settings: FabricSettings, store: Arc<dyn BlockStore>) -> Result<Self, FabricError> {
        let runtime = Handle::try_current().map_err(|_| FabricError::NoRuntime)?;
        let workers = settings.workers.max(1);
        Ok(Self {
            permits: Arc::new(Semaphore::new(workers)),
            settings,
            store,
            runtime,
            router: Router::default(),
            next_id: AtomicU64::new(1),
            phase: Mutex::new(Phase::Created),
            running: Mutex::new(Vec::new()),
            member: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &FabricSettings {
        &self.settings
    }

    /// Member name this runtime registered under, once joined.
    pub fn member(&self) -> Option<String> {
        self.member.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Join the pool (when a rendezvous address is configured) and start
    /// accepting activities.
    pub async fn activate(&self) -> Result<(), FabricError> {
        match self.phase() {
            Phase::Created => {}
            Phase::Active => return Err(FabricError::AlreadyActive),
            Phase::Done => return Err(FabricError::Shutdown),
        }

        if let Some(address) = &self.settings.server_address {
            let role = if self.settings.is_master { "master" } else { "worker" };
            let member = format!("{}-{}", role, std::process::id());
            rendezvous::join(address, &self.settings.pool_name, &member)
                .await
                .map_err(|source| FabricError::Join {
                    pool: self.settings.pool_name.clone(),
                    source,
                })?;
            tracing::info!(pool = %self.settings.pool_name, %address, %member, "joined pool");
            *self.member.lock().unwrap_or_else(|e| e.into_inner()) = Some(member);
        }

        self.set_phase(Phase::Active);
        tracing::info!(
            master = self.settings.is_master,
            workers = self.settings.workers,
            "fabric activated"
        );
        Ok(())
    }

    /// Schedule an activity and return its id.
    pub fn submit(&self, activity: Activity) -> Result<ActivityId, FabricError> {
        match self.phase() {
            Phase::Active => {}
            Phase::Created => return Err(FabricError::NotActive),
            Phase::Done => return Err(FabricError::Shutdown),
        }

        let id = ActivityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match activity {
            Activity::Collector(collector) => {
                if !self.settings.is_master {
                    return Err(FabricError::NotMaster);
                }
                tracing::debug!(%id, expected = collector.expected(), "collector registered");
                self.router.collectors.insert(id, collector);
            }
            Activity::Digest(task) => {
                let handle = self.spawn_digest(id, task);
                self.running
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(handle);
            }
        }
        Ok(id)
    }

    fn spawn_digest(&self, id: ActivityId, task: DigestTask) -> JoinHandle<()> {
        let permits = self.permits.clone();
        let store = self.store.clone();
        let router = self.router.clone();
        let buffer_size = self.settings.buffer_size;

        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let fallback = task.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                catch_unwind(AssertUnwindSafe(|| {
                    task.run(store.as_ref(), buffer_size, &router)
                }))
                .map_err(|panic| (panic_message(panic), router))
            })
            .await;

            // A panicking task still owes its collector one result.
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err((message, router))) => {
                    tracing::error!(%id, block = fallback.block_index, %message, "digest task panicked");
                    let result = fallback.failure(DigestError::Panicked { message });
                    if let Err(e) = router.report(fallback.collector, result) {
                        tracing::warn!(%id, error = %e, "failed to deliver panic result");
                    }
                }
                Err(e) => {
                    tracing::error!(%id, block = fallback.block_index, error = %e, "digest worker lost");
                }
            }
        })
    }

    /// Stop accepting work and wait for in-flight tasks to finish.
    pub async fn done(&self) -> Result<(), FabricError> {
        self.shutdown(None).await
    }

    /// `done`, giving in-flight tasks at most `timeout`. Tasks still running
    /// at the deadline are aborted; a task already inside a blocking read
    /// keeps its thread until the read returns, but nothing waits for it.
    pub async fn done_within(&self, timeout: Duration) -> Result<(), FabricError> {
        self.shutdown(Some(timeout)).await
    }

    async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), FabricError> {
        if self.phase() == Phase::Done {
            return Ok(());
        }
        self.set_phase(Phase::Done);

        let mut running =
            std::mem::take(&mut *self.running.lock().unwrap_or_else(|e| e.into_inner()));
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut lost = 0;
        let mut pending = 0;
        for handle in running.iter_mut() {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut *handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        pending += 1;
                        continue;
                    }
                },
                None => handle.await,
            };
            if joined.is_err() {
                lost += 1;
            }
        }
        self.router.collectors.clear();
        self.permits.close();

        tracing::info!(lost, pending, "fabric shut down");
        match timeout {
            Some(timeout) if pending > 0 => {
                return Err(FabricError::DrainTimeout { pending, timeout })
            }
            _ => {}
        }
        if lost > 0 {
            return Err(FabricError::WorkersLost(lost));
        }
        Ok(())
    }
}

impl ResultSink for LocalFabric {
    fn report(&self, to: ActivityId, result: BlockResult) -> Result<(), FabricError> {
        self.router.report(to, result)
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
