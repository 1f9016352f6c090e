use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, ValueEnum};

use testsift_core::pipeline::{RunOptions, RunOrchestrator, RunPlan};
use testsift_core::progress::NoopReporter;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// One test name per line
    #[default]
    Text,
    /// Selection with reasons and change counts
    Json,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Project root (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write the selection to a file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Ignore history and select every known test
    #[arg(long)]
    pub force: bool,
}

pub async fn run(args: SelectArgs) -> anyhow::Result<()> {
    let (project_root, config) = super::load_project(&args.path)?;

    let orchestrator = RunOrchestrator::new(&project_root, config)
        .with_options(RunOptions { force: args.force });
    let plan = orchestrator
        .plan(&NoopReporter)
        .await
        .context("Selection failed")?;

    let rendered = match args.format {
        OutputFormat::Text => render_text(&plan),
        OutputFormat::Json => render_json(&plan)?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Cannot write selection: {}", path.display()))?;
            eprintln!(
                "{} test{} selected, written to {}",
                plan.selection.len(),
                super::plural(plan.selection.len()),
                path.display()
            );
        }
        None => print!("{rendered}"),
    }

    for warning in &plan.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn render_text(plan: &RunPlan) -> String {
    let mut out = String::new();
    for name in plan.selection.names() {
        out.push_str(name);
        out.push('\n');
    }
    out
}

fn render_json(plan: &RunPlan) -> anyhow::Result<String> {
    let value = serde_json::json!({
        "per_test": plan.selection.per_test,
        "tests": plan.selection.tests,
        "changed": {
            "production": plan.changes.production,
            "tests": plan.changes.tests,
        },
        "known_tests": plan.known_tests.len(),
        "pruned_tests": plan.pruned_tests,
    });
    let mut text = serde_json::to_string_pretty(&value).context("Cannot serialize selection")?;
    text.push('\n');
    Ok(text)
}
