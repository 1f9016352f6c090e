pub mod init;
pub mod reset;
pub mod run;
pub mod select;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Subcommand;

use testsift_core::config::{CONFIG_FILE_NAME, TestsiftConfig};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default testsift.toml for a project
    Init(init::InitArgs),
    /// Show which tests would run, without running or recording anything
    Select(select::SelectArgs),
    /// Select, hand off to the runner, and record the results
    Run(run::RunArgs),
    /// Show the state of the persisted stores
    Status(status::StatusArgs),
    /// Delete the persisted stores so the next run selects everything
    Reset(reset::ResetArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args),
        Command::Select(args) => select::run(args).await,
        Command::Run(args) => run::run(args).await,
        Command::Status(args) => status::run(args),
        Command::Reset(args) => reset::run(args),
    }
}

/// Canonicalize the project path and load its `testsift.toml`.
pub(crate) fn load_project(path: &Path) -> anyhow::Result<(PathBuf, TestsiftConfig)> {
    let project_root = std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve path: {}", path.display()))?;

    let config_path = project_root.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        anyhow::bail!(
            "testsift is not initialized in {}. Run `testsift init` first.",
            project_root.display()
        );
    }
    let config = TestsiftConfig::load(&config_path)
        .with_context(|| format!("Cannot load config: {}", config_path.display()))?;
    Ok((project_root, config))
}

pub(crate) fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
