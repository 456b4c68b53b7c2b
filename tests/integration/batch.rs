//! Happy-path batches: completeness, coverage and digest correctness.

use std::sync::Arc;

use anyhow::Result;
use shardsum_core::digest::hash;
use shardsum_services::{BatchReport, Coordinator, CoordinatorState, LocalBlockStore};

use crate::*;

fn run(scratch: &ScratchDir, file: &str, block_size: u64, workers: u32) -> Result<BatchReport> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    rt.block_on(async {
        let config = test_config(scratch.path(), block_size, workers);
        let store = Arc::new(LocalBlockStore::from_config(&config.store));
        let mut coordinator = Coordinator::new(config, store);
        let report = coordinator.run(file).await?;
        assert_eq!(coordinator.state(), CoordinatorState::Completed);
        Ok::<_, anyhow::Error>(report)
    })
}

#[test]
fn every_block_reports_exactly_once() -> Result<()> {
    let scratch = ScratchDir::new("complete");
    let data = scratch.write_patterned("input.bin", 10 * 64 * KIB + 123);

    let report = run(&scratch, "input.bin", 64 * KIB, 4)?;

    assert_eq!(report.blocks, 11);
    assert_eq!(report.results.len(), 11);
    assert_eq!(report.failed(), 0);
    assert!(report.coverage_ok(data.len() as u64));

    let mut indices: Vec<usize> = report.results.iter().map(|r| r.block_index()).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..11).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn digests_match_block_contents() -> Result<()> {
    let scratch = ScratchDir::new("digests");
    let data = scratch.write_patterned("input.bin", 3 * MIB + 17);

    let report = run(&scratch, "input.bin", MIB, 3)?;

    for result in report.by_offset() {
        let start = result.offset() as usize;
        let end = start + result.size() as usize;
        assert_eq!(result.digest(), Some(&hash(&data[start..end])));
    }
    let last = report.by_offset().last().map(|r| r.size());
    assert_eq!(last, Some(17));
    Ok(())
}

#[test]
fn worker_count_does_not_change_digests() -> Result<()> {
    let scratch = ScratchDir::new("determinism");
    scratch.write_patterned("input.bin", 5 * 64 * KIB + 9);

    let digests = |workers| -> Result<Vec<String>> {
        let report = run(&scratch, "input.bin", 64 * KIB, workers)?;
        Ok(report
            .by_offset()
            .iter()
            .map(|r| r.render_line())
            .collect())
    };

    assert_eq!(digests(1)?, digests(6)?);
    Ok(())
}

#[test]
fn empty_file_completes_without_tasks() -> Result<()> {
    let scratch = ScratchDir::new("empty");
    std::fs::write(scratch.path().join("empty.bin"), b"")?;

    let report = run(&scratch, "empty.bin", 64 * KIB, 2)?;

    assert_eq!(report.blocks, 0);
    assert!(report.results.is_empty());
    assert!(report.coverage_ok(0));
    assert!(report.to_string().contains("0 blocks, 0 ok, 0 failed"));
    Ok(())
}

#[test]
fn report_serializes_for_machine_consumers() -> Result<()> {
    let scratch = ScratchDir::new("json");
    scratch.write_patterned("input.bin", 2 * 64 * KIB);

    let report = run(&scratch, "input.bin", 64 * KIB, 2)?;
    let value = serde_json::to_value(&report)?;

    assert_eq!(value["blocks"], 2);
    let statuses: Vec<&str> = value["results"]
        .as_array()
        .map(|a| a.iter().filter_map(|r| r["status"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(statuses, vec!["success", "success"]);
    Ok(())
}
