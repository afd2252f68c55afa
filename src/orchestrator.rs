//! Build orchestrator: discover, compile, stage

use crate::cython::CythonToolchain;
use crate::discovery;
use crate::module::{CompilationUnit, CompiledArtifact};
use crate::stage::{self, StagedArtifact};
use crate::toolchain::{CompileRequest, Toolchain};
use crate::{BuildConfig, BuildError, BuildResult};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Result of a full pipeline run
#[derive(Debug)]
pub struct BuildReport {
    /// Number of discovered source modules
    pub discovered: usize,
    /// Artifacts placed in the source tree, in discovery order
    pub staged: Vec<StagedArtifact>,
    /// Total size of the compiled sources
    pub total_source_size: u64,
    /// Total size of the staged binaries
    pub total_artifact_size: u64,
    pub elapsed: Duration,
}

/// Runs the build pipeline against one configuration
pub struct Orchestrator<T: Toolchain> {
    config: BuildConfig,
    toolchain: T,
}

impl Orchestrator<CythonToolchain> {
    /// Orchestrator driving Cython through the configured interpreter
    pub fn cython(config: BuildConfig) -> Self {
        let toolchain = CythonToolchain::new(config.python.clone());
        Self::new(config, toolchain)
    }
}

impl<T: Toolchain> Orchestrator<T> {
    pub fn new(config: BuildConfig, toolchain: T) -> Self {
        Self { config, toolchain }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Enumerate compilation units under the source root
    pub fn discover(&self) -> BuildResult<Vec<CompilationUnit>> {
        discovery::discover(&self.config)
    }

    /// Compile the batch; returns one artifact per unit, in unit order
    pub fn compile(&self, units: &[CompilationUnit]) -> BuildResult<Vec<CompiledArtifact>> {
        let request = CompileRequest {
            source_root: &self.config.source_root,
            units,
            build_dir: &self.config.build_dir,
            jobs: self.config.jobs,
            options: &self.config.compiler,
        };
        let artifacts = self.toolchain.compile(&request)?;
        match_artifacts(units, artifacts)
    }

    /// Copy artifacts into the source tree and record them for the next
    /// build and `clean`
    pub fn stage(&self, artifacts: &[CompiledArtifact]) -> BuildResult<Vec<StagedArtifact>> {
        let staged = stage::stage(artifacts, &self.config.source_root)?;
        stage::record(&staged, &self.config.source_root, &self.config.build_dir)?;
        Ok(staged)
    }

    /// Run the whole pipeline once
    ///
    /// Binaries from the previous build are removed before compiling, so
    /// the tree only ever holds binaries of the sources in this build, and
    /// none at all when it fails.
    pub fn run(&self) -> BuildResult<BuildReport> {
        let start = Instant::now();
        self.config.validate()?;

        let units = self.discover()?;
        if units.is_empty() {
            tracing::info!(
                "No .{} files under {}",
                self.config.source_suffix,
                self.config.source_root.display()
            );
        }

        let mut total_source_size = 0u64;
        for unit in &units {
            total_source_size += fs::metadata(self.config.source_root.join(&unit.source))?.len();
        }

        let stale = stage::unstage(&self.config.source_root, &self.config.build_dir)?;
        if !stale.is_empty() {
            tracing::debug!("Removed {} binaries from the previous build", stale.len());
        }

        fs::create_dir_all(&self.config.build_dir)?;
        tracing::debug!(
            "Building {} units with {} into {}",
            units.len(),
            self.toolchain.name(),
            self.config.build_dir.display()
        );
        let artifacts = self.compile(&units)?;
        let staged = self.stage(&artifacts)?;

        let total_artifact_size = staged.iter().map(|s| s.size).sum();
        let report = BuildReport {
            discovered: units.len(),
            staged,
            total_source_size,
            total_artifact_size,
            elapsed: start.elapsed(),
        };

        tracing::info!(
            "Staged {} of {} modules ({} -> {} bytes) in {:.2?}",
            report.staged.len(),
            report.discovered,
            report.total_source_size,
            report.total_artifact_size,
            report.elapsed
        );
        Ok(report)
    }

    /// Remove staged binaries and the build directory
    pub fn clean(&self) -> BuildResult<Vec<PathBuf>> {
        stage::clean(&self.config.source_root, &self.config.build_dir)
    }
}

/// Pair toolchain output with the submitted units, one to one
fn match_artifacts(
    units: &[CompilationUnit],
    artifacts: Vec<CompiledArtifact>,
) -> BuildResult<Vec<CompiledArtifact>> {
    let mut by_name: HashMap<String, CompiledArtifact> = HashMap::with_capacity(artifacts.len());
    for artifact in artifacts {
        if by_name.contains_key(&artifact.name) {
            return Err(BuildError::ArtifactMismatch(format!(
                "module {} was produced twice",
                artifact.name
            )));
        }
        by_name.insert(artifact.name.clone(), artifact);
    }

    let mut ordered = Vec::with_capacity(units.len());
    for unit in units {
        let mut artifact = by_name.remove(&unit.name).ok_or_else(|| {
            BuildError::ArtifactMismatch(format!("no artifact for module {}", unit.name))
        })?;
        if !artifact.path.is_file() {
            return Err(BuildError::ArtifactMismatch(format!(
                "artifact for {} does not exist: {}",
                unit.name,
                artifact.path.display()
            )));
        }
        artifact.source = unit.source.clone();
        ordered.push(artifact);
    }

    if let Some(extra) = by_name.keys().next() {
        return Err(BuildError::ArtifactMismatch(format!(
            "compiler produced unknown module {}",
            extra
        )));
    }

    Ok(ordered)
}
