//! Build hook entry point.
//!
//! Run by the packaging tool without arguments. Reads `cystage.toml` from the
//! working directory when present.

use anyhow::Context;
use cystage::{BuildConfig, Orchestrator, CONFIG_FILE};
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cystage=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match build() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Build failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn build() -> anyhow::Result<()> {
    let config = BuildConfig::load_or_default(Path::new(CONFIG_FILE))
        .with_context(|| format!("loading {}", CONFIG_FILE))?;

    tracing::info!(
        "cystage {}: {} -> {}",
        cystage::VERSION,
        config.source_root.display(),
        config.build_dir.display()
    );

    let report = Orchestrator::cython(config).run()?;
    for artifact in &report.staged {
        tracing::debug!("{} -> {}", artifact.name, artifact.path.display());
    }
    Ok(())
}
