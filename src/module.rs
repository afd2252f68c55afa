//! Units of work flowing through the pipeline

use crate::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Separator between components of a logical module identifier
pub const NAMESPACE_SEPARATOR: char = '.';

/// A discovered source file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceModule {
    /// Path relative to the source root
    pub relative_path: PathBuf,
    /// Dotted module identifier, e.g. `pkg.mod`
    pub module_name: String,
}

impl SourceModule {
    /// Build a module from a root-relative path, deriving its identifier
    pub fn from_relative_path(relative_path: &Path, suffix: &str) -> BuildResult<Self> {
        let module_name = module_name_for(relative_path, suffix)?;
        Ok(Self {
            relative_path: relative_path.to_path_buf(),
            module_name,
        })
    }

    pub fn into_unit(self) -> CompilationUnit {
        CompilationUnit {
            name: self.module_name,
            source: self.relative_path,
        }
    }
}

/// An (identifier, source path) pair submitted to the compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub name: String,
    /// Source path relative to the source root
    pub source: PathBuf,
}

/// Binary produced by the toolchain for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub name: String,
    /// Source path of the unit, relative to the source root
    pub source: PathBuf,
    /// Location in the intermediate build directory
    pub path: PathBuf,
}

impl CompiledArtifact {
    /// Where staging puts this artifact: next to its source, same file name
    /// as in the build directory
    pub fn staged_path(&self, source_root: &Path) -> BuildResult<PathBuf> {
        let file_name = self.path.file_name().ok_or_else(|| {
            BuildError::ArtifactMismatch(format!(
                "artifact for {} has no file name: {}",
                self.name,
                self.path.display()
            ))
        })?;
        let dir = match self.source.parent() {
            Some(parent) => source_root.join(parent),
            None => source_root.to_path_buf(),
        };
        Ok(dir.join(file_name))
    }
}

/// Derive the dotted identifier for a root-relative source path
///
/// `pkg/sub/mod.py` becomes `pkg.sub.mod`. Every component must be a valid
/// Python identifier, otherwise the name could not be imported (or could
/// collide with a nested package).
pub fn module_name_for(relative_path: &Path, suffix: &str) -> BuildResult<String> {
    let invalid = |reason: String| BuildError::InvalidModule {
        path: relative_path.to_path_buf(),
        reason,
    };

    if relative_path.extension().and_then(|e| e.to_str()) != Some(suffix) {
        return Err(invalid(format!("expected a .{} file", suffix)));
    }

    let stem_path = relative_path.with_extension("");
    let mut parts = Vec::new();
    for component in stem_path.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| invalid("path is not valid UTF-8".to_string()))?;
                if !is_identifier(part) {
                    return Err(invalid(format!("{:?} is not a valid identifier", part)));
                }
                parts.push(part);
            }
            _ => return Err(invalid("path must be relative to the source root".to_string())),
        }
    }

    if parts.is_empty() {
        return Err(invalid("empty module path".to_string()));
    }

    Ok(parts.join(&NAMESPACE_SEPARATOR.to_string()))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}
