//! shardsum-ctl — submits a shardsumd batch through the process launcher.
//!
//!   shardsum-ctl <root> <libPath> <inputFile> <workerCount>
//!
//! Stages `libPath` under `root`, starts the coordinator entry point with
//! `"<inputFile> <workerCount>"`, waits for it and cleans up. Any failure
//! is printed to stdout with its full cause chain. The exit status stays
//! 0 in that case; callers that need a failure status should read stdout.

use anyhow::{Context, Result};

use shardsum_core::config::ShardsumConfig;
use shardsum_services::ProcessLauncher;

fn print_usage() {
    println!("Usage: shardsum-ctl <root> <libPath> <inputFile> <workerCount>");
    println!();
    println!("  root          Storage root; staging happens here and file ids resolve under it");
    println!("  libPath       Local directory of dependencies to stage");
    println!("  inputFile     File to digest, already present under root");
    println!("  workerCount   Concurrent digest workers");
}

async fn submit(
    config: &ShardsumConfig,
    root: &str,
    lib_path: &str,
    input: &str,
    workers: u32,
) -> Result<()> {
    let mut launcher = ProcessLauncher::new(root, lib_path, &config.launcher.staging_dir);

    launcher.stage_in().context("stage-in failed")?;
    launcher
        .submit(
            &config.launcher.entry_point,
            &format!("{input} {workers}"),
            &[("SHARDSUM_STORE__ROOT", root)],
        )
        .context("submit failed")?;

    let status = launcher.wait().await.context("wait failed")?;
    if !status.success() {
        tracing::warn!(%status, "coordinator exited unsuccessfully");
    }

    launcher.cleanup().context("cleanup failed")?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [root, lib_path, input, workers] = args.as_slice() else {
        print_usage();
        std::process::exit(1);
    };

    let result = async {
        let workers: u32 = workers
            .parse()
            .with_context(|| format!("workerCount must be a number, got {workers:?}"))?;
        let config = ShardsumConfig::load().context("failed to load config")?;
        submit(&config, root, lib_path, input, workers).await
    }
    .await;

    // Failures are reported on stdout only; the exit status stays 0.
    if let Err(e) = result {
        println!("shardsum-ctl failed {e}");
        println!("{e:?}");
    }
}
