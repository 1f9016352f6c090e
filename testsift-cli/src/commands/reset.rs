use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use testsift_core::pipeline::StoreLocations;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Project root (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub fn run(args: ResetArgs) -> anyhow::Result<()> {
    let (project_root, config) = super::load_project(&args.path)?;
    let locations = StoreLocations::from_config(&config, &project_root);

    let mut removed = 0usize;
    for path in locations.all() {
        if !path.exists() {
            continue;
        }
        std::fs::remove_file(path)
            .with_context(|| format!("Cannot remove store: {}", path.display()))?;
        info!(path = %path.display(), "Removed store");
        println!("  removed {}", path.display());
        removed += 1;
    }

    if removed == 0 {
        println!("No stores to remove in {}", project_root.display());
    } else {
        println!(
            "Removed {removed} store{}; the next run selects every test",
            super::plural(removed)
        );
    }
    Ok(())
}
