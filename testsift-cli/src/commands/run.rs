use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use testsift_core::execute::executor_for;
use testsift_core::pipeline::{RunOptions, RunOrchestrator};
use testsift_core::progress::IndicatifReporter;

/// The run completed and was recorded, but some selected tests failed.
#[derive(thiserror::Error, Debug)]
#[error("{} selected test{} failed", .failed.len(), super::plural(.failed.len()))]
pub struct TestsFailed {
    pub failed: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Project root (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Ignore history and usage graph, run every known test
    #[arg(long)]
    pub force: bool,

    /// Runner id (overrides runner.id)
    #[arg(long)]
    pub runner: Option<String>,

    /// Coverage report to consume (overrides runner.report)
    #[arg(long)]
    pub report: Option<PathBuf>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let (project_root, mut config) = super::load_project(&args.path)?;

    if let Some(report) = &args.report {
        config.runner.report = std::path::absolute(report)
            .with_context(|| format!("Cannot resolve path: {}", report.display()))?;
    }
    let runner_id = args.runner.clone().unwrap_or_else(|| config.runner.id.clone());
    let executor = executor_for(&runner_id, &config, &project_root)
        .with_context(|| format!("Invalid config: runner `{runner_id}`"))?;

    if args.force {
        info!("Force mode: ignoring run history and usage graph");
    }
    let progress = IndicatifReporter::new();
    let orchestrator = RunOrchestrator::new(&project_root, config)
        .with_options(RunOptions { force: args.force });
    let summary = orchestrator
        .run(executor.as_ref(), &progress)
        .await
        .context("Run failed")?;

    println!("testsift run in {}", project_root.display());
    println!();
    println!(
        "  Production files: {} scanned, {} changed",
        summary.production_scanned, summary.production_changed
    );
    println!(
        "  Test files:       {} scanned, {} changed",
        summary.tests_scanned, summary.tests_changed
    );
    println!(
        "  Selected:         {} ({} conservative{})",
        summary.selection.len(),
        summary.selection.conservative_count(),
        if summary.selection.per_test { "" } else { ", full run" }
    );
    println!("  Recorded:         {}", summary.executed);
    println!("  Duration:         {:.2?}", summary.duration);

    if !summary.warnings.is_empty() {
        println!();
        println!("  Warnings ({}):", summary.warnings.len());
        for warning in &summary.warnings {
            println!("    - {warning}");
        }
    }

    if !summary.is_success() {
        println!();
        println!("  Failed ({}):", summary.failed.len());
        for test in &summary.failed {
            println!("    - {test}");
        }
        return Err(TestsFailed {
            failed: summary.failed,
        }
        .into());
    }
    Ok(())
}
