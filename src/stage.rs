//! Placing compiled artifacts back into the source tree
//!
//! Every staged binary is recorded in `BUILD/cystage-staged.json` (paths
//! relative to the source root), so the next build and `clean` can remove
//! exactly what an earlier build put into the tree.

use crate::module::CompiledArtifact;
use crate::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Record of binaries staged by the last successful build
pub const STAGED_MANIFEST: &str = "cystage-staged.json";

const TEMP_SUFFIX: &str = "cystage-tmp";

/// An artifact copied into the source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub name: String,
    /// Source path relative to the source root
    pub source: PathBuf,
    /// Where the binary now lives
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StagedManifest {
    artifacts: Vec<PathBuf>,
}

/// Copy every artifact next to the source it was compiled from
///
/// All-or-nothing: if any copy fails, the files this call already wrote are
/// removed again before the error is returned.
pub fn stage(artifacts: &[CompiledArtifact], source_root: &Path) -> BuildResult<Vec<StagedArtifact>> {
    let mut plan = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if !artifact.path.is_file() {
            return Err(BuildError::ArtifactMismatch(format!(
                "artifact for {} is missing: {}",
                artifact.name,
                artifact.path.display()
            )));
        }
        plan.push((artifact, artifact.staged_path(source_root)?));
    }

    let mut staged: Vec<StagedArtifact> = Vec::with_capacity(plan.len());
    for (artifact, dest) in plan {
        match copy_artifact(&artifact.path, &dest) {
            Ok(size) => {
                tracing::info!("Staged: {} -> {} ({} bytes)", artifact.name, dest.display(), size);
                staged.push(StagedArtifact {
                    name: artifact.name.clone(),
                    source: artifact.source.clone(),
                    path: dest,
                    size,
                });
            }
            Err(error) => {
                rollback(&staged);
                return Err(BuildError::Staging {
                    module: artifact.name.clone(),
                    dest,
                    error,
                });
            }
        }
    }

    Ok(staged)
}

/// Copy through a sibling temp file so `to` is either the old file or the
/// complete new one, never a truncated copy
fn copy_artifact(from: &Path, to: &Path) -> io::Result<u64> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = to
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"))?;
    let temp = to.with_file_name(format!(
        ".{}.{}",
        file_name.to_string_lossy(),
        TEMP_SUFFIX
    ));

    let result = fs::copy(from, &temp).and_then(|size| fs::rename(&temp, to).map(|()| size));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn rollback(staged: &[StagedArtifact]) {
    for artifact in staged {
        if let Err(e) = fs::remove_file(&artifact.path) {
            tracing::warn!(
                "Failed to remove partially staged {}: {}",
                artifact.path.display(),
                e
            );
        }
    }
    if !staged.is_empty() {
        tracing::warn!("Rolled back {} staged artifacts", staged.len());
    }
}

/// Write the staged manifest for a finished build
pub fn record(staged: &[StagedArtifact], source_root: &Path, build_dir: &Path) -> BuildResult<()> {
    let artifacts = staged
        .iter()
        .map(|s| s.path.strip_prefix(source_root).unwrap_or(&s.path).to_path_buf())
        .collect();
    fs::create_dir_all(build_dir)?;
    fs::write(
        build_dir.join(STAGED_MANIFEST),
        serde_json::to_string_pretty(&StagedManifest { artifacts })?,
    )?;
    Ok(())
}

/// Remove every binary an earlier build staged, then forget the manifest
///
/// Entries that would point outside the source root are ignored.
pub fn unstage(source_root: &Path, build_dir: &Path) -> BuildResult<Vec<PathBuf>> {
    let manifest_path = build_dir.join(STAGED_MANIFEST);
    let manifest: StagedManifest = match fs::read_to_string(&manifest_path) {
        Ok(text) => serde_json::from_str(&text)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut removed = Vec::new();
    for rel in manifest.artifacts {
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            tracing::warn!("Ignoring staged entry outside the source root: {}", rel.display());
            continue;
        }
        let path = source_root.join(rel);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed {}", path.display());
                removed.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    fs::remove_file(&manifest_path)?;

    removed.sort();
    Ok(removed)
}

/// Remove staged binaries and the build directory. Returns the removed
/// binaries.
pub fn clean(source_root: &Path, build_dir: &Path) -> BuildResult<Vec<PathBuf>> {
    let removed = unstage(source_root, build_dir)?;
    if build_dir.exists() {
        fs::remove_dir_all(build_dir)?;
        tracing::debug!("Removed build directory {}", build_dir.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_missing_artifact_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("SRC");
        fs::create_dir_all(root.join("pkg")).unwrap();

        let present = dir.path().join("a.so");
        fs::write(&present, b"bin").unwrap();
        let artifacts = vec![
            CompiledArtifact {
                name: "pkg.a".to_string(),
                source: PathBuf::from("pkg/a.py"),
                path: present,
            },
            CompiledArtifact {
                name: "pkg.b".to_string(),
                source: PathBuf::from("pkg/b.py"),
                path: dir.path().join("b.so"),
            },
        ];

        let err = stage(&artifacts, &root).unwrap_err();
        assert!(matches!(err, BuildError::ArtifactMismatch(_)));
        assert!(!root.join("pkg/a.so").exists());
    }

    #[test]
    fn test_copy_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("SRC");
        fs::create_dir_all(root.join("pkg")).unwrap();
        // A directory where the second artifact should land: its bytes reach
        // the temp file, then the rename into place fails
        fs::create_dir_all(root.join("pkg/b.so")).unwrap();

        let a = dir.path().join("a.so");
        let b = dir.path().join("b.so");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        let artifacts = vec![
            CompiledArtifact {
                name: "pkg.a".to_string(),
                source: PathBuf::from("pkg/a.py"),
                path: a,
            },
            CompiledArtifact {
                name: "pkg.b".to_string(),
                source: PathBuf::from("pkg/b.py"),
                path: b,
            },
        ];

        let err = stage(&artifacts, &root).unwrap_err();
        match err {
            BuildError::Staging { module, dest, .. } => {
                assert_eq!(module, "pkg.b");
                assert_eq!(dest, root.join("pkg/b.so"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!root.join("pkg/a.so").exists());
        // The failing copy leaves no temp file behind either
        let mut left: Vec<_> = fs::read_dir(root.join("pkg"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        left.sort();
        assert_eq!(left, vec![std::ffi::OsString::from("b.so")]);
    }

    #[test]
    fn test_failed_copy_keeps_previous_binary() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("SRC");
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/a.so"), b"previous build").unwrap();

        // Source is a directory, so the copy fails
        let broken = dir.path().join("a.so");
        fs::create_dir_all(&broken).unwrap();

        assert!(copy_artifact(&broken, &root.join("pkg/a.so")).is_err());
        assert_eq!(fs::read(root.join("pkg/a.so")).unwrap(), b"previous build");
        assert_eq!(fs::read_dir(root.join("pkg")).unwrap().count(), 1);
    }

    #[test]
    fn test_record_then_unstage() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("SRC");
        let build = dir.path().join("BUILD");
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/a.so"), b"a").unwrap();
        fs::write(root.join("pkg/other.so"), b"not staged by us").unwrap();

        let staged = vec![StagedArtifact {
            name: "pkg.a".to_string(),
            source: PathBuf::from("pkg/a.py"),
            path: root.join("pkg/a.so"),
            size: 1,
        }];
        record(&staged, &root, &build).unwrap();

        assert_eq!(unstage(&root, &build).unwrap(), vec![root.join("pkg/a.so")]);
        assert!(!root.join("pkg/a.so").exists());
        assert!(root.join("pkg/other.so").exists());
        assert!(!build.join(STAGED_MANIFEST).exists());
        assert!(unstage(&root, &build).unwrap().is_empty());
    }

    #[test]
    fn test_unstage_ignores_entries_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("SRC");
        let build = dir.path().join("BUILD");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&build).unwrap();
        let outside = dir.path().join("precious.so");
        fs::write(&outside, b"keep").unwrap();
        fs::write(
            build.join(STAGED_MANIFEST),
            r#"{"artifacts": ["../precious.so"]}"#,
        )
        .unwrap();

        assert!(unstage(&root, &build).unwrap().is_empty());
        assert!(outside.exists());
    }
}
