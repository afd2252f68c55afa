//! Compiler toolchain interface

use crate::module::{CompilationUnit, CompiledArtifact};
use crate::{BuildResult, CompilerOptions};
use std::path::Path;

/// One batch of work for a toolchain
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Root the unit source paths are relative to
    pub source_root: &'a Path,
    pub units: &'a [CompilationUnit],
    /// Intermediate directory the toolchain may write to
    pub build_dir: &'a Path,
    /// Upper bound on concurrent compiler workers
    pub jobs: usize,
    pub options: &'a CompilerOptions,
}

/// An ahead-of-time compiler that turns source units into native modules
///
/// Implementations compile the whole batch or fail it: an error for any unit
/// is an error for all of them. An empty batch must succeed with no
/// artifacts.
pub trait Toolchain {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Compile every unit of the request into the build directory
    fn compile(&self, request: &CompileRequest<'_>) -> BuildResult<Vec<CompiledArtifact>>;
}
