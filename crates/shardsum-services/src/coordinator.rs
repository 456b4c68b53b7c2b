//! Drives one batch from fabric start to teardown.
//!
//! ```text
//! Created → Initialized → BatchSubmitted → AwaitingResults → Completed
//!    └──────────┴─────────────┴──────────────┴── Failed
//! ```
//!
//! The coordinator starts the rendezvous service, brings up a master
//! fabric that only collects, partitions the input file, submits one
//! collector plus one digest task per block, and waits for every block
//! to report. Cleanup releases the fabric and the rendezvous service
//! concurrently; neither waits on the other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shardsum_core::config::ShardsumConfig;

use crate::collector::{CollectorError, ResultCollector};
use crate::digest_task::DigestTask;
use crate::fabric::{Activity, FabricError, FabricSettings, LocalFabric};
use crate::partition::{partition, PartitionError};
use crate::rendezvous::{Rendezvous, RendezvousError};
use crate::report::BatchReport;
use crate::store::BlockStore;

/// How long `cleanup` waits for the rendezvous listener to stop.
const RENDEZVOUS_END_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Initialized,
    BatchSubmitted,
    AwaitingResults,
    Completed,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("operation not valid in state {0:?}")]
    InvalidState(CoordinatorState),
    #[error("failed to start rendezvous: {0}")]
    Rendezvous(#[source] RendezvousError),
    #[error("failed to start execution fabric: {0}")]
    Fabric(#[source] FabricError),
    #[error("failed to submit activity: {0}")]
    Submit(#[source] FabricError),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("result collection failed: {0}")]
    Collect(#[from] CollectorError),
}

/// Outcome of each independent cleanup step.
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub fabric: Option<FabricError>,
    pub rendezvous: Option<RendezvousError>,
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        self.fabric.is_none() && self.rendezvous.is_none()
    }
}

struct Batch {
    file: String,
    blocks: usize,
    collector: Arc<ResultCollector>,
}

pub struct Coordinator {
    config: ShardsumConfig,
    store: Arc<dyn BlockStore>,
    state: CoordinatorState,
    rendezvous: Option<Rendezvous>,
    fabric: Option<LocalFabric>,
    batch: Option<Batch>,
    started: Option<Instant>,
    last_cleanup: Option<CleanupOutcome>,
}

impl Coordinator {
    pub fn new(config: ShardsumConfig, store: Arc<dyn BlockStore>) -> Self {
        Self {
            config,
            store,
            state: CoordinatorState::Created,
            rendezvous: None,
            fabric: None,
            batch: None,
            started: None,
            last_cleanup: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Externally reachable rendezvous address, once initialized.
    pub fn address(&self) -> Option<String> {
        self.rendezvous.as_ref().map(|r| r.address().to_string())
    }

    /// What the cleanup at the end of `run` reported, once `run` has returned.
    pub fn last_cleanup(&self) -> Option<&CleanupOutcome> {
        self.last_cleanup.as_ref()
    }

    /// Members that joined the pool so far.
    pub fn members(&self) -> Vec<String> {
        self.rendezvous
            .as_ref()
            .map(Rendezvous::members)
            .unwrap_or_default()
    }

    fn expect_state(&self, expected: CoordinatorState) -> Result<(), CoordinatorError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CoordinatorError::InvalidState(self.state))
        }
    }

    fn fail<T>(&mut self, err: CoordinatorError) -> Result<T, CoordinatorError> {
        tracing::error!(error = %err, "coordinator failed");
        self.state = CoordinatorState::Failed;
        Err(err)
    }

    /// Start the rendezvous service and the master fabric.
    pub async fn initialize(&mut self) -> Result<(), CoordinatorError> {
        self.expect_state(CoordinatorState::Created)?;
        self.started = Some(Instant::now());

        let rendezvous = match Rendezvous::start(
            &self.config.fabric.server_address,
            &self.config.fabric.pool_name,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => return self.fail(CoordinatorError::Rendezvous(e)),
        };
        let address = rendezvous.address().to_string();
        tracing::info!(%address, "started rendezvous");
        self.rendezvous = Some(rendezvous);

        let settings = FabricSettings::master(&self.config, Some(address));
        let fabric = match LocalFabric::create(settings, self.store.clone()) {
            Ok(f) => f,
            Err(e) => return self.fail(CoordinatorError::Fabric(e)),
        };
        if let Err(e) = fabric.activate().await {
            return self.fail(CoordinatorError::Fabric(e));
        }
        self.fabric = Some(fabric);

        if let Some(started) = self.started {
            tracing::info!(
                init_ms = started.elapsed().as_millis() as u64,
                "fabric initialized"
            );
        }
        self.state = CoordinatorState::Initialized;
        Ok(())
    }

    /// Partition `file` and submit one collector and one task per block.
    /// Returns the number of blocks.
    pub fn submit_jobs(&mut self, file: &str) -> Result<usize, CoordinatorError> {
        self.expect_state(CoordinatorState::Initialized)?;

        let blocks = match partition(self.store.as_ref(), file) {
            Ok(b) => b,
            Err(e) => return self.fail(e.into()),
        };
        let Some(fabric) = self.fabric.as_ref() else {
            return Err(CoordinatorError::InvalidState(self.state));
        };

        let collector = Arc::new(ResultCollector::new(blocks.len()));
        let collector_id = match fabric.submit(Activity::Collector(collector.clone())) {
            Ok(id) => id,
            Err(e) => return self.fail(CoordinatorError::Submit(e)),
        };
        tracing::info!(%collector_id, expected = blocks.len(), "submitted result collector");

        for block in &blocks {
            let task = DigestTask::for_block(file, block, collector_id);
            // On failure the collector stays registered and tasks already
            // submitted keep running; `done` drains them and clears the router.
            let id = match fabric.submit(Activity::Digest(task)) {
                Ok(id) => id,
                Err(e) => return self.fail(CoordinatorError::Submit(e)),
            };
            tracing::debug!(
                %id,
                block = block.index,
                start = block.offset,
                end = block.end(),
                "submitted digest task"
            );
        }

        self.batch = Some(Batch {
            file: file.to_string(),
            blocks: blocks.len(),
            collector,
        });
        self.state = CoordinatorState::BatchSubmitted;
        Ok(blocks.len())
    }

    /// Block until every submitted task has reported, then build the report.
    ///
    /// Without `collect.timeout_secs` this waits forever if a task's
    /// context dies before reporting.
    pub async fn await_and_report(&mut self) -> Result<BatchReport, CoordinatorError> {
        self.expect_state(CoordinatorState::BatchSubmitted)?;
        let Some(batch) = self.batch.as_ref() else {
            return Err(CoordinatorError::InvalidState(self.state));
        };
        let collector = batch.collector.clone();
        self.state = CoordinatorState::AwaitingResults;

        let collected = match self.config.collect.timeout() {
            Some(timeout) => collector.wait_for_all_timeout(timeout).await,
            None => collector.wait_for_all().await,
        };
        let results = match collected {
            Ok(r) => r,
            Err(e) => return self.fail(e.into()),
        };

        for result in &results {
            match result.cause() {
                Some(cause) => tracing::warn!(
                    offset = result.offset(),
                    size = result.size(),
                    error = %cause,
                    "block failed"
                ),
                None => tracing::debug!(offset = result.offset(), "block digested"),
            }
        }

        let batch = self.batch.take();
        let report = BatchReport {
            file: batch.as_ref().map(|b| b.file.clone()).unwrap_or_default(),
            blocks: batch.as_ref().map(|b| b.blocks).unwrap_or_default(),
            results,
            elapsed_ms: self.started.map(|s| s.elapsed().as_millis() as u64),
        };
        tracing::info!(
            blocks = report.blocks,
            failed = report.failed(),
            elapsed_ms = report.elapsed_ms,
            "batch complete"
        );
        self.state = CoordinatorState::Completed;
        Ok(report)
    }

    /// Release the fabric and end the rendezvous service. Both steps run
    /// concurrently and each failure is logged and returned.
    ///
    /// With `collect.timeout_secs` set, in-flight tasks get that long to
    /// drain before the fabric abandons them.
    pub async fn cleanup(&mut self) -> CleanupOutcome {
        let fabric = self.fabric.take();
        let rendezvous = self.rendezvous.take();
        let drain = self.config.collect.timeout();

        let release_fabric = async move {
            let Some(fabric) = fabric else {
                return None;
            };
            let released = match drain {
                Some(timeout) => fabric.done_within(timeout).await,
                None => fabric.done().await,
            };
            match released {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "failed to terminate fabric");
                    Some(e)
                }
            }
        };
        let end_rendezvous = async move {
            let Some(rendezvous) = rendezvous else {
                return None;
            };
            match rendezvous.end(RENDEZVOUS_END_TIMEOUT).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "failed to terminate rendezvous");
                    Some(e)
                }
            }
        };

        let (fabric, rendezvous) = tokio::join!(release_fabric, end_rendezvous);
        CleanupOutcome { fabric, rendezvous }
    }

    /// Full lifecycle for one file. Cleanup runs whether or not the batch
    /// succeeded; its outcome is kept in `last_cleanup`.
    pub async fn run(&mut self, file: &str) -> Result<BatchReport, CoordinatorError> {
        let result = async {
            self.initialize().await?;
            self.submit_jobs(file)?;
            self.await_and_report().await
        }
        .await;
        self.last_cleanup = Some(self.cleanup().await);
        result
    }
}
