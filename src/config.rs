//! Configuration for the build pipeline

use crate::discovery::ExcludeSet;
use crate::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the config file the build hook looks for
pub const CONFIG_FILE: &str = "cystage.toml";

/// Options handed to the compiler for every unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerOptions {
    /// Cython `language_level` directive
    pub language_level: String,

    /// Emit the HTML annotation report next to the generated C
    pub annotate: bool,

    /// Let Cython use PEP 484 annotations as C types
    pub annotation_typing: bool,

    /// Rebuild every unit even if its output looks up to date
    pub force: bool,

    /// Additional compiler directives, passed through verbatim
    pub directives: BTreeMap<String, String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            language_level: "3".to_string(),
            annotate: false,
            annotation_typing: false,
            force: true,
            directives: BTreeMap::new(),
        }
    }
}

impl CompilerOptions {
    /// Add a compiler directive
    pub fn directive(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(name.into(), value.into());
        self
    }
}

/// Configuration for one build invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Root of the source tree
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Intermediate build directory
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Suffix (without dot) of files to compile
    #[serde(default = "default_source_suffix")]
    pub source_suffix: String,

    /// Parallelism degree handed to the toolchain
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Python interpreter driving Cython
    #[serde(default = "default_python")]
    pub python: String,

    /// Glob patterns of source files to leave untouched
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub compiler: CompilerOptions,
}

fn default_source_root() -> PathBuf {
    PathBuf::from("SRC")
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("BUILD")
}

fn default_source_suffix() -> String {
    "py".to_string()
}

fn default_jobs() -> usize {
    num_cpus::get() * 2
}

fn default_python() -> String {
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            build_dir: default_build_dir(),
            source_suffix: default_source_suffix(),
            jobs: default_jobs(),
            python: default_python(),
            exclude: vec![],
            compiler: CompilerOptions::default(),
        }
    }
}

impl BuildConfig {
    /// Create a config for the given source root and build directory
    pub fn new(source_root: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            build_dir: build_dir.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing keys fall back to defaults
    pub fn from_toml_str(text: &str) -> BuildResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML config file
    pub fn from_toml_file(path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BuildError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> BuildResult<Self> {
        if path.is_file() {
            tracing::debug!("Loading config from {}", path.display());
            Self::from_toml_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Set parallelism degree
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set Python interpreter
    pub fn python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Set source suffix
    pub fn source_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.source_suffix = suffix.into();
        self
    }

    /// Add exclude pattern
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Replace compiler options
    pub fn compiler(mut self, options: CompilerOptions) -> Self {
        self.compiler = options;
        self
    }

    /// Check the config before any filesystem work happens
    pub fn validate(&self) -> BuildResult<()> {
        if self.jobs == 0 {
            return Err(BuildError::Config("jobs must be at least 1".to_string()));
        }
        if self.source_suffix.is_empty() || self.source_suffix.starts_with('.') {
            return Err(BuildError::Config(format!(
                "source_suffix must be a bare extension, got {:?}",
                self.source_suffix
            )));
        }
        if self.python.trim().is_empty() {
            return Err(BuildError::Config("python must not be empty".to_string()));
        }
        ExcludeSet::new(&self.exclude)?;
        Ok(())
    }
}
