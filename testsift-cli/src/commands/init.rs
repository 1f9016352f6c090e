use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use testsift_core::config::{CONFIG_FILE_NAME, TestsiftConfig};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project root (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing testsift.toml
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let project_root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let config_path = project_root.join(CONFIG_FILE_NAME);

    if config_path.exists() && !args.force {
        println!(
            "testsift is already initialized in {} (use --force to overwrite {CONFIG_FILE_NAME})",
            project_root.display()
        );
        return Ok(());
    }

    let config = TestsiftConfig::default();
    let text = config
        .to_toml_string()
        .context("Cannot serialize default config")?;
    std::fs::write(&config_path, text)
        .with_context(|| format!("Cannot write config: {}", config_path.display()))?;

    println!("Initialized testsift in {}", project_root.display());
    println!();
    println!("  Config: {}", config_path.display());
    for (label, roots) in [
        ("Source roots", config.source_roots(&project_root)),
        ("Test roots", config.test_source_roots(&project_root)),
    ] {
        println!("  {label}:");
        for root in roots {
            let marker = if root.is_dir() { "" } else { " (missing)" };
            println!("    {}{marker}", root.display());
        }
    }
    println!();
    println!("  Runner: {}", config.runner.id);
    println!(
        "  Coverage report expected at {}",
        config.report_path(&project_root).display()
    );

    Ok(())
}
