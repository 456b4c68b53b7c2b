//! shardsumd — batch coordinator.
//!
//! Partitions one input file into blocks, digests every block on the
//! worker pool and prints one line per block as results drain.
//!
//!   shardsumd <inputFile> <workerCount>

use std::sync::Arc;

use anyhow::{Context, Result};

use shardsum_core::config::ShardsumConfig;
use shardsum_services::{BatchReport, Coordinator, LocalBlockStore};

fn print_usage() {
    println!("Usage: shardsumd <inputFile> <workerCount>");
    println!();
    println!("  inputFile     File id, resolved under store.root unless absolute");
    println!("  workerCount   Concurrent digest workers (0 = one per core)");
}

async fn run_batch(coordinator: &mut Coordinator, input: &str) -> Result<BatchReport> {
    coordinator
        .initialize()
        .await
        .context("failed to start execution fabric")?;
    if let Some(address) = coordinator.address() {
        println!("Started rendezvous at: {address}");
    }

    let blocks = coordinator
        .submit_jobs(input)
        .with_context(|| format!("failed to submit jobs for {input}"))?;
    println!("Submitted {blocks} digest tasks");

    coordinator
        .await_and_report()
        .await
        .context("failed to collect results")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (input, workers) = match args.as_slice() {
        [input, workers] => {
            let workers: u32 = workers
                .parse()
                .with_context(|| format!("workerCount must be a number, got {workers:?}"))?;
            (input.clone(), workers)
        }
        [flag] if flag == "--help" || flag == "-h" => {
            print_usage();
            return Ok(());
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    let mut config = ShardsumConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ShardsumConfig::default()
    });
    config.fabric.workers = workers;
    tracing::info!(
        input = %input,
        workers = config.fabric.worker_count(),
        block_size = config.store.block_size,
        "shardsumd starting"
    );

    let store = Arc::new(LocalBlockStore::from_config(&config.store));
    let mut coordinator = Coordinator::new(config, store);

    let outcome = run_batch(&mut coordinator, &input).await;

    let cleanup = coordinator.cleanup().await;
    if let Some(e) = &cleanup.fabric {
        println!("Failed to terminate execution fabric! {e}");
    }
    if let Some(e) = &cleanup.rendezvous {
        println!("Failed to terminate rendezvous! {e}");
    }

    let report = outcome?;
    println!("{report}");
    Ok(())
}
