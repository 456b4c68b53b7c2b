//! Failed blocks, stalled blocks and bad inputs.
//!
//! A failed block still reports, so the batch completes with a failure
//! line in its place. A block that never reports only ends the batch when
//! a collect timeout is configured.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use shardsum_core::digest::hash;
use shardsum_core::DigestError;
use shardsum_services::{
    BatchReport, BlockStore, CollectorError, Coordinator, CoordinatorError, CoordinatorState,
    FabricError, LocalBlockStore, PartitionError,
};

use crate::fault::{Fault, FaultyStore};
use crate::*;

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?)
}

async fn run_with(
    config: shardsum_core::config::ShardsumConfig,
    store: Arc<dyn BlockStore>,
    file: &str,
) -> (Result<BatchReport, CoordinatorError>, CoordinatorState) {
    let mut coordinator = Coordinator::new(config, store);
    let result = coordinator.run(file).await;
    (result, coordinator.state())
}

#[test]
fn read_error_in_middle_block_is_reported_as_failure() -> Result<()> {
    let scratch = ScratchDir::new("midfail");
    let data = scratch.write_patterned("input.bin", 24 * MIB);
    let config = test_config(scratch.path(), 10 * MIB, 3);
    let store = FaultyStore::new(LocalBlockStore::from_config(&config.store))
        .with_fault(10 * MIB, Fault::ReadError { after: MIB })
        .shared();

    let (result, state) = runtime()?.block_on(run_with(config, store, "input.bin"));
    let report = result?;
    assert_eq!(state, CoordinatorState::Completed);

    assert_eq!(report.blocks, 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.coverage_ok(24 * MIB));

    let sizes: Vec<u64> = report.by_offset().iter().map(|r| r.size()).collect();
    assert_eq!(sizes, vec![10 * MIB, 10 * MIB, 4 * MIB]);

    for result in report.by_offset() {
        let start = result.offset() as usize;
        let end = start + result.size() as usize;
        if result.offset() == 10 * MIB {
            assert!(result.has_failed());
            assert_eq!(result.render_line(), format!("  {} FAILED", 10 * MIB));
            match result.cause() {
                Some(DigestError::Read { position, message }) => {
                    assert!((10 * MIB..20 * MIB).contains(position));
                    assert!(message.contains("injected read fault"));
                }
                other => panic!("unexpected cause: {other:?}"),
            }
        } else {
            assert_eq!(result.digest(), Some(&hash(&data[start..end])));
        }
    }
    Ok(())
}

#[test]
fn every_block_failing_still_completes() -> Result<()> {
    let scratch = ScratchDir::new("allfail");
    scratch.write_patterned("input.bin", 3 * 64 * KIB);
    let config = test_config(scratch.path(), 64 * KIB, 2);
    let store = FaultyStore::new(LocalBlockStore::from_config(&config.store))
        .with_fault(0, Fault::ReadError { after: 0 })
        .with_fault(64 * KIB, Fault::ReadError { after: 0 })
        .with_fault(128 * KIB, Fault::ReadError { after: 0 })
        .shared();

    let (result, _) = runtime()?.block_on(run_with(config, store, "input.bin"));
    let report = result?;

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.failed(), 3);
    assert!(report.to_string().contains("3 blocks, 0 ok, 3 failed"));
    Ok(())
}

#[test]
fn stalled_block_hits_collect_timeout() -> Result<()> {
    let scratch = ScratchDir::new("stall");
    scratch.write_patterned("input.bin", 3 * 64 * KIB);
    let mut config = test_config(scratch.path(), 64 * KIB, 3);
    config.collect.timeout_secs = 1;
    let store = FaultyStore::new(LocalBlockStore::from_config(&config.store))
        .with_fault(128 * KIB, Fault::Stall(Duration::from_secs(3)))
        .shared();

    let (result, state) = runtime()?.block_on(run_with(config, store, "input.bin"));

    assert_eq!(state, CoordinatorState::Failed);
    match result {
        Err(CoordinatorError::Collect(e)) => assert_eq!(
            e,
            CollectorError::Timeout {
                received: 2,
                expected: 3
            }
        ),
        other => panic!("expected collect timeout, got {other:?}"),
    }
    Ok(())
}

#[test]
fn collect_timeout_bounds_the_whole_run() -> Result<()> {
    let scratch = ScratchDir::new("stall-run");
    scratch.write_patterned("input.bin", 3 * 64 * KIB);
    let mut config = test_config(scratch.path(), 64 * KIB, 3);
    config.collect.timeout_secs = 1;
    let store = FaultyStore::new(LocalBlockStore::from_config(&config.store))
        .with_fault(128 * KIB, Fault::Stall(Duration::from_secs(8)))
        .shared();

    let rt = runtime()?;
    let (result, elapsed, cleanup) = rt.block_on(async {
        let mut coordinator = Coordinator::new(config, store);
        let started = Instant::now();
        let result = coordinator.run("input.bin").await;
        let elapsed = started.elapsed();
        let cleanup = coordinator
            .last_cleanup()
            .map(|c| {
                let drained_late = matches!(
                    c.fabric,
                    Some(FabricError::DrainTimeout { pending: 1, .. })
                );
                (drained_late, c.rendezvous.is_none())
            });
        (result, elapsed, cleanup)
    });
    // The stalled reader still holds a blocking thread; don't wait for it.
    rt.shutdown_background();

    assert!(matches!(
        result,
        Err(CoordinatorError::Collect(CollectorError::Timeout { .. }))
    ));
    // Collect timeout plus the drain bound, well short of the stall.
    assert!(elapsed < Duration::from_secs(4), "run took {elapsed:?}");

    // The stalled task is reported, and the rendezvous ended regardless.
    assert_eq!(cleanup, Some((true, true)));
    Ok(())
}

#[test]
fn missing_input_fails_before_any_task_runs() -> Result<()> {
    let scratch = ScratchDir::new("missing");
    let config = test_config(scratch.path(), 64 * KIB, 2);
    let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::from_config(&config.store));

    let (result, state) = runtime()?.block_on(run_with(config, store, "nope.bin"));

    assert_eq!(state, CoordinatorState::Failed);
    assert!(matches!(
        result,
        Err(CoordinatorError::Partition(PartitionError::NotFound(ref f))) if f == "nope.bin"
    ));
    Ok(())
}

#[test]
fn directory_input_is_rejected() -> Result<()> {
    let scratch = ScratchDir::new("dir");
    std::fs::create_dir_all(scratch.path().join("sub"))?;
    let config = test_config(scratch.path(), 64 * KIB, 2);
    let store: Arc<dyn BlockStore> = Arc::new(LocalBlockStore::from_config(&config.store));

    let (result, state) = runtime()?.block_on(run_with(config, store, "sub"));

    assert_eq!(state, CoordinatorState::Failed);
    assert!(matches!(
        result,
        Err(CoordinatorError::Partition(PartitionError::Metadata { .. }))
    ));
    Ok(())
}
