use std::path::{Path, PathBuf};

use chrono::DateTime;
use clap::Args;

use testsift_core::config::CONFIG_FILE_NAME;
use testsift_core::pipeline::StoreLocations;
use testsift_core::store::{LoadOutcome, RunHistoryStore, UsageGraphStore};
use testsift_core::types::EpochMillis;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Project root (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let (project_root, config) = super::load_project(&args.path)?;
    let locations = StoreLocations::from_config(&config, &project_root);

    println!("testsift status for {}", project_root.display());
    println!();
    println!("  Config: {}", project_root.join(CONFIG_FILE_NAME).display());
    println!("  Runner: {}", config.runner.id);
    println!();

    print_history("Run history", &locations.history);
    print_history("Test run history", &locations.test_history);

    let graph = UsageGraphStore::load(&locations.usage);
    println!("  Usage graph: {}", locations.usage.display());
    println!("    State:   {}", describe(graph.load_outcome()));
    println!("    Tests:   {}", graph.test_count());
    println!("    Edges:   {}", graph.edge_count());
    let failing: Vec<&str> = graph.failing().collect();
    if !failing.is_empty() {
        println!("    Failing ({}):", failing.len());
        for test in failing {
            println!("      - {test}");
        }
    }
    println!();

    let report = config.report_path(&project_root);
    if report.exists() {
        println!("  Coverage report: {}", report.display());
    } else {
        println!("  Coverage report: not present ({})", report.display());
    }

    Ok(())
}

fn print_history(label: &str, path: &Path) {
    let history = RunHistoryStore::load(path);
    println!("  {label}: {}", path.display());
    println!("    State:   {}", describe(history.load_outcome()));
    println!("    Files:   {}", history.len());
    if let Some((oldest, newest)) = history.time_range() {
        println!("    Oldest:  {}", format_millis(oldest));
        println!("    Newest:  {}", format_millis(newest));
    }
    println!();
}

fn describe(outcome: &LoadOutcome) -> String {
    match outcome {
        LoadOutcome::Loaded => "ok".to_string(),
        LoadOutcome::Missing => "not written yet".to_string(),
        LoadOutcome::Corrupt(reason) => format!("unusable ({reason}), next run starts over"),
    }
}

fn format_millis(millis: EpochMillis) -> String {
    DateTime::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
