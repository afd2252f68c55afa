//! Cython + setuptools toolchain
//!
//! The batch is described in a JSON manifest and handed to a small generated
//! Python driver, which runs `cythonize` and setuptools `build_ext` in one
//! interpreter process:
//!
//! ```text
//! BUILD/
//! ├── cystage-manifest.json   units, directories, options
//! ├── cystage_driver.py       generated driver
//! ├── cystage-result.json     [{name, path}] written on success
//! ├── c/                      generated C sources
//! ├── temp/                   object files
//! └── lib/pkg/mod.cpython-312-x86_64-linux-gnu.so
//! ```

use crate::module::CompiledArtifact;
use crate::toolchain::{CompileRequest, Toolchain};
use crate::{BuildError, BuildResult, CompilerOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const MANIFEST_FILE: &str = "cystage-manifest.json";
const RESULT_FILE: &str = "cystage-result.json";
const DRIVER_FILE: &str = "cystage_driver.py";

/// Lines of compiler stderr kept in error messages
const STDERR_TAIL: usize = 40;

const DRIVER_SCRIPT: &str = r#"# Generated by cystage. Do not edit.
import json
import os
import sys


def main(manifest_path):
    with open(manifest_path, encoding="utf-8") as f:
        manifest = json.load(f)

    from setuptools import Distribution, Extension
    from Cython.Build import cythonize
    from Cython.Compiler.Options import parse_directive_value
    from Cython.Distutils.build_ext import new_build_ext

    options = manifest["options"]
    directives = {
        name: parse_directive_value(name, value)
        for name, value in options["directives"].items()
    }
    directives["language_level"] = options["language_level"]
    directives["annotation_typing"] = options["annotation_typing"]

    extensions = [
        Extension(name=unit["name"], sources=[unit["source"]])
        for unit in manifest["units"]
    ]
    extensions = cythonize(
        module_list=extensions,
        build_dir=manifest["c_dir"],
        annotate=options["annotate"],
        nthreads=manifest["jobs"],
        compiler_directives=directives,
        force=options["force"],
        quiet=True,
    )

    distribution = Distribution({
        "ext_modules": extensions,
        "cmdclass": {"build_ext": new_build_ext},
    })
    build_ext = distribution.get_command_obj("build_ext")
    build_ext.build_lib = manifest["lib_dir"]
    build_ext.build_temp = manifest["temp_dir"]
    build_ext.inplace = 0
    build_ext.force = 1 if options["force"] else 0
    build_ext.parallel = manifest["jobs"]
    build_ext.ensure_finalized()
    build_ext.run()

    artifacts = [
        {"name": ext.name, "path": os.path.abspath(build_ext.get_ext_fullpath(ext.name))}
        for ext in build_ext.extensions
    ]
    with open(manifest["result_path"], "w", encoding="utf-8") as f:
        json.dump(artifacts, f)


if __name__ == "__main__":
    main(sys.argv[1])
"#;

#[derive(Serialize)]
struct DriverManifest<'a> {
    units: &'a [crate::CompilationUnit],
    c_dir: PathBuf,
    lib_dir: PathBuf,
    temp_dir: PathBuf,
    result_path: PathBuf,
    jobs: usize,
    options: &'a CompilerOptions,
}

#[derive(Deserialize)]
struct DriverArtifact {
    name: String,
    path: PathBuf,
}

/// Compiles units with Cython through a Python interpreter
#[derive(Debug, Clone)]
pub struct CythonToolchain {
    python: String,
}

impl CythonToolchain {
    /// Create a toolchain using the given interpreter
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    /// Check that the interpreter can import Cython and setuptools
    pub fn probe(&self) -> BuildResult<()> {
        self.run_snippet("import Cython, setuptools").map(|_| ())
    }

    /// Platform suffix of compiled modules, e.g. `.cpython-312-x86_64-linux-gnu.so`
    pub fn extension_suffix(&self) -> BuildResult<String> {
        let out = self.run_snippet(
            "import sysconfig; print(sysconfig.get_config_var('EXT_SUFFIX') or '')",
        )?;
        let suffix = out.trim().to_string();
        if suffix.is_empty() {
            return Err(BuildError::Toolchain(
                "interpreter reports no EXT_SUFFIX".to_string(),
            ));
        }
        Ok(suffix)
    }

    /// Interpreter to launch. A relative path like `venv/bin/python` is
    /// resolved against the current directory, since the driver runs with the
    /// source root as its working directory. Bare names go through `PATH`.
    fn interpreter(&self) -> BuildResult<PathBuf> {
        let python = Path::new(&self.python);
        if python.components().count() > 1 {
            absolute(python)
        } else {
            Ok(python.to_path_buf())
        }
    }

    fn run_snippet(&self, code: &str) -> BuildResult<String> {
        let output = Command::new(self.interpreter()?)
            .args(["-c", code])
            .output()
            .map_err(|e| BuildError::Toolchain(format!("Failed to run {}: {}", self.python, e)))?;

        if !output.status.success() {
            return Err(BuildError::Toolchain(format!(
                "{} exited with {}: {}",
                self.python,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for CythonToolchain {
    fn default() -> Self {
        Self::new(crate::BuildConfig::default().python)
    }
}

impl Toolchain for CythonToolchain {
    fn name(&self) -> &str {
        "cython"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> BuildResult<Vec<CompiledArtifact>> {
        if request.units.is_empty() {
            return Ok(Vec::new());
        }

        // The interpreter runs inside the source root, so every path we hand
        // it has to be absolute.
        let build_dir = absolute(request.build_dir)?;
        fs::create_dir_all(&build_dir)?;

        let manifest = DriverManifest {
            units: request.units,
            c_dir: build_dir.join("c"),
            lib_dir: build_dir.join("lib"),
            temp_dir: build_dir.join("temp"),
            result_path: build_dir.join(RESULT_FILE),
            jobs: request.jobs.max(1),
            options: request.options,
        };

        match fs::remove_file(&manifest.result_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let manifest_path = build_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        let driver_path = build_dir.join(DRIVER_FILE);
        fs::write(&driver_path, DRIVER_SCRIPT)?;

        tracing::info!(
            "Compiling {} modules with {} ({} jobs)",
            request.units.len(),
            self.python,
            manifest.jobs
        );

        let output = Command::new(self.interpreter()?)
            .arg(&driver_path)
            .arg(&manifest_path)
            .current_dir(request.source_root)
            .output()
            .map_err(|e| BuildError::Toolchain(format!("Failed to run {}: {}", self.python, e)))?;

        if !output.status.success() {
            return Err(BuildError::Compilation(format!(
                "{} exited with {}: {}",
                self.python,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let result = fs::read_to_string(&manifest.result_path).map_err(|e| {
            BuildError::Toolchain(format!(
                "driver produced no result file {}: {}",
                manifest.result_path.display(),
                e
            ))
        })?;
        let produced: Vec<DriverArtifact> = serde_json::from_str(&result)?;

        let sources: HashMap<&str, &Path> = request
            .units
            .iter()
            .map(|u| (u.name.as_str(), u.source.as_path()))
            .collect();

        produced
            .into_iter()
            .map(|artifact| -> BuildResult<CompiledArtifact> {
                let source = sources.get(artifact.name.as_str()).ok_or_else(|| {
                    BuildError::ArtifactMismatch(format!(
                        "compiler produced unknown module {}",
                        artifact.name
                    ))
                })?;
                Ok(CompiledArtifact {
                    source: source.to_path_buf(),
                    name: artifact.name,
                    path: artifact.path,
                })
            })
            .collect()
    }
}

fn absolute(path: &Path) -> BuildResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompilationUnit;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert_eq!(tail.lines().count(), STDERR_TAIL);
        assert!(tail.starts_with("line 60"));
        assert!(tail.ends_with("line 99"));
    }

    #[test]
    fn test_interpreter_resolution() {
        let bare = CythonToolchain::new("python3");
        assert_eq!(bare.interpreter().unwrap(), PathBuf::from("python3"));

        let venv = CythonToolchain::new("venv/bin/python");
        let resolved = venv.interpreter().unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(
            resolved,
            env::current_dir().unwrap().join("venv/bin/python")
        );

        if cfg!(unix) {
            let abs = CythonToolchain::new("/usr/bin/python3");
            assert_eq!(abs.interpreter().unwrap(), PathBuf::from("/usr/bin/python3"));
        }
    }

    #[test]
    fn test_empty_batch_never_launches_python() {
        let toolchain = CythonToolchain::new("definitely-not-a-python-binary");
        let dir = tempfile::tempdir().unwrap();
        let request = CompileRequest {
            source_root: dir.path(),
            units: &[],
            build_dir: &dir.path().join("BUILD"),
            jobs: 4,
            options: &CompilerOptions::default(),
        };
        assert!(toolchain.compile(&request).unwrap().is_empty());
        assert!(!dir.path().join("BUILD").exists());
    }

    #[test]
    fn test_missing_interpreter_is_toolchain_error() {
        let toolchain = CythonToolchain::new("definitely-not-a-python-binary");
        let dir = tempfile::tempdir().unwrap();
        let units = vec![CompilationUnit {
            name: "mod".to_string(),
            source: PathBuf::from("mod.py"),
        }];
        let request = CompileRequest {
            source_root: dir.path(),
            units: &units,
            build_dir: &dir.path().join("BUILD"),
            jobs: 1,
            options: &CompilerOptions::default(),
        };
        let err = toolchain.compile(&request).unwrap_err();
        assert!(matches!(err, BuildError::Toolchain(_)));

        let manifest = fs::read_to_string(dir.path().join("BUILD").join(MANIFEST_FILE)).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["units"][0]["name"], "mod");
        assert_eq!(manifest["options"]["language_level"], "3");
        assert_eq!(manifest["options"]["force"], true);
        assert_eq!(manifest["jobs"], 1);
    }
}
