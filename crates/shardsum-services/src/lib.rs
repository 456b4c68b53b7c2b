//! shardsum-services — the batch protocol.
//!
//! Partitioning a file into blocks, running one digest task per block on
//! the execution fabric, collecting exactly one result per task, and the
//! coordinator that drives a batch from start to teardown.

pub mod collector;
pub mod coordinator;
pub mod digest_task;
pub mod fabric;
pub mod launcher;
pub mod partition;
pub mod rendezvous;
pub mod report;
pub mod store;

pub use collector::{CollectorError, ResultCollector};
pub use coordinator::{CleanupOutcome, Coordinator, CoordinatorError, CoordinatorState};
pub use digest_task::DigestTask;
pub use fabric::{Activity, ActivityId, FabricError, FabricSettings, LocalFabric, ResultSink};
pub use launcher::{LaunchError, ProcessLauncher};
pub use partition::{partition, PartitionError};
pub use rendezvous::{Rendezvous, RendezvousError};
pub use report::BatchReport;
pub use store::{BlockStore, LocalBlockStore, StoreError};
