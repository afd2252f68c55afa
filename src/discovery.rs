//! Source tree discovery

use crate::module::{CompilationUnit, SourceModule};
use crate::{BuildConfig, BuildError, BuildResult};
use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Compiled exclude globs, matched against root-relative paths
#[derive(Debug, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    pub fn new(globs: &[String]) -> BuildResult<Self> {
        let patterns = globs
            .iter()
            .map(|glob| {
                Regex::new(&glob_to_regex(glob)).map_err(|e| {
                    BuildError::Config(format!("invalid exclude pattern {:?}: {}", glob, e))
                })
            })
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        // Normalize to forward slashes for matching consistency
        let path_str = relative_path.to_string_lossy().replace('\\', "/");
        self.patterns.iter().any(|re| re.is_match(&path_str))
    }
}

/// Find every source file under the root and turn it into a compilation unit
///
/// Files with another suffix, and excluded files, are left alone. The result
/// is sorted by relative path.
pub fn discover(config: &BuildConfig) -> BuildResult<Vec<CompilationUnit>> {
    let root = &config.source_root;
    if !root.is_dir() {
        return Err(BuildError::SourceRoot {
            path: root.clone(),
            reason: "not a directory".to_string(),
        });
    }
    let excludes = ExcludeSet::new(&config.exclude)?;

    let mut modules = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        // Follows symlinked files, not symlinked directories
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .extension()
            .map_or(true, |ext| ext != config.source_suffix.as_str())
        {
            continue;
        }

        let rel_path = path.strip_prefix(root).map_err(|_| BuildError::SourceRoot {
            path: root.clone(),
            reason: format!("{} escaped the source root", path.display()),
        })?;

        if excludes.is_excluded(rel_path) {
            tracing::debug!("Skipping excluded file: {}", rel_path.display());
            continue;
        }

        modules.push(SourceModule::from_relative_path(
            rel_path,
            &config.source_suffix,
        )?);
    }

    modules.sort();

    tracing::debug!(
        "Discovered {} source modules under {}",
        modules.len(),
        root.display()
    );
    Ok(modules.into_iter().map(SourceModule::into_unit).collect())
}

/// Translate a path glob (`**`, `*`, `?`) into an anchored regex
fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.replace('\\', "/");
    let chars: Vec<char> = pattern.chars().collect();

    let mut out = String::from("^");
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `**/` matches zero or more whole directories
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let set = ExcludeSet::new(&[
            "**/test_*.py".to_string(),
            "scripts/*.py".to_string(),
            "conf?.py".to_string(),
        ])
        .unwrap();

        assert!(set.is_excluded(Path::new("test_main.py")));
        assert!(set.is_excluded(Path::new("pkg/deep/test_io.py")));
        assert!(set.is_excluded(Path::new("scripts/run.py")));
        assert!(!set.is_excluded(Path::new("scripts/sub/run.py")));
        assert!(set.is_excluded(Path::new("conf1.py")));
        assert!(!set.is_excluded(Path::new("conf12.py")));
        assert!(!set.is_excluded(Path::new("pkg/main.py")));
    }

    #[test]
    fn test_glob_escapes_metacharacters() {
        let set = ExcludeSet::new(&["pkg/a+b(c).py".to_string()]).unwrap();
        assert!(set.is_excluded(Path::new("pkg/a+b(c).py")));
        assert!(!set.is_excluded(Path::new("pkg/aab(c).py")));
    }

    #[test]
    fn test_empty_exclude_set() {
        let set = ExcludeSet::default();
        assert!(!set.is_excluded(Path::new("anything.py")));
    }
}
