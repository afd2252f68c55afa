//! Error types for cystage

use std::path::PathBuf;
use thiserror::Error;

/// Build error types
#[derive(Debug, Error)]
pub enum BuildError {
    /// Source root is missing or not a directory
    #[error("Source root {path} is not readable: {reason}")]
    SourceRoot { path: PathBuf, reason: String },

    /// Directory walk failed
    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// Source file does not map to a valid module identifier
    #[error("Invalid module {path}: {reason}")]
    InvalidModule { path: PathBuf, reason: String },

    /// Compiler rejected the batch
    #[error("Compilation failed: {0}")]
    Compilation(String),

    /// Toolchain could not be launched or returned garbage
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// Toolchain output does not match the submitted units
    #[error("Artifact mismatch: {0}")]
    ArtifactMismatch(String),

    /// Copying an artifact into the source tree failed
    #[error("Failed to stage {module} to {dest}: {error}")]
    Staging {
        module: String,
        dest: PathBuf,
        error: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for build operations
pub type BuildResult<T> = Result<T, BuildError>;
