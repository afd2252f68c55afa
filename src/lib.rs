//! cystage - ship Python packages as compiled extension modules
//!
//! Compiles every `.py` file of a source tree to a native extension module
//! (`.so`/`.pyd`) with Cython and puts the binaries back next to their
//! sources, so a packaging tool can publish the binaries and leave the plain
//! sources out of the distribution.
//!
//! ```text
//! ┌──────────────┐    ┌─────────────────────────┐    ┌──────────────────────┐
//! │  discover    │    │  compile                │    │  stage               │
//! │  SRC/**/*.py │──► │  cythonize + build_ext  │──► │  BUILD/lib/pkg/m.so  │
//! │  -> pkg.mod  │    │  -> BUILD/lib/...       │    │  -> SRC/pkg/m.so     │
//! └──────────────┘    └─────────────────────────┘    └──────────────────────┘
//! ```
//!
//! The build is all-or-nothing: if any module fails to compile, nothing is
//! staged. Files without the source suffix are never touched.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cystage::{BuildConfig, Orchestrator};
//!
//! let config = BuildConfig::new("src", "build").exclude("**/conftest.py");
//! let report = Orchestrator::cython(config).run()?;
//! println!("staged {} modules", report.staged.len());
//! # Ok::<(), cystage::BuildError>(())
//! ```
//!
//! Custom compilers plug in through the [`Toolchain`] trait.

mod config;
pub mod cython;
pub mod discovery;
mod error;
pub mod module;
mod orchestrator;
pub mod stage;
mod toolchain;

pub use config::{BuildConfig, CompilerOptions, CONFIG_FILE};
pub use cython::CythonToolchain;
pub use discovery::discover;
pub use error::{BuildError, BuildResult};
pub use module::{CompilationUnit, CompiledArtifact, SourceModule};
pub use orchestrator::{BuildReport, Orchestrator};
pub use stage::StagedArtifact;
pub use toolchain::{CompileRequest, Toolchain};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
