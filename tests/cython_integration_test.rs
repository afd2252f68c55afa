//! End-to-end tests with a real Cython toolchain

use cystage::{BuildConfig, BuildError, CythonToolchain, Orchestrator};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn toolchain_or_skip() -> Option<CythonToolchain> {
    let toolchain = CythonToolchain::default();
    if let Err(e) = toolchain.probe() {
        eprintln!("Skipping test: Cython not available ({})", e);
        return None;
    }
    Some(toolchain)
}

/// Compile a small package and import the staged binary
#[test]
fn test_compile_stage_and_import() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    let suffix = toolchain.extension_suffix().unwrap();

    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("SRC");
    fs::create_dir_all(root.join("pkg")).unwrap();
    fs::write(root.join("pkg/__init__.py"), "").unwrap();
    fs::write(
        root.join("pkg/calc.py"),
        r#"
def add(a: int, b: int) -> int:
    return a + b

class Calculator:
    def multiply(self, x, y):
        return x * y
"#,
    )
    .unwrap();
    fs::write(root.join("pkg/data.txt"), "payload").unwrap();

    let config = BuildConfig::new(&root, temp_dir.path().join("BUILD"))
        .python(toolchain.python())
        .exclude("**/__init__.py")
        .jobs(2);
    let report = Orchestrator::new(config, toolchain.clone()).run().unwrap();

    assert_eq!(report.discovered, 1);
    assert_eq!(report.staged.len(), 1);
    let calc = report
        .staged
        .iter()
        .find(|s| s.name == "pkg.calc")
        .unwrap();
    assert_eq!(calc.path, root.join(format!("pkg/calc{}", suffix)));
    assert!(calc.size > 0);
    assert_eq!(
        fs::read_to_string(root.join("pkg/data.txt")).unwrap(),
        "payload"
    );

    // Import from the binary alone
    fs::remove_file(root.join("pkg/calc.py")).unwrap();
    let output = Command::new(toolchain.python())
        .args([
            "-c",
            "import pkg.calc as c; assert not c.__file__.endswith('.py'); print(c.add(2, 3))",
        ])
        .current_dir(&root)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "5");
}

/// A single broken module fails the batch and stages nothing
#[test]
fn test_syntax_error_fails_whole_build() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };

    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("SRC");
    fs::create_dir_all(root.join("pkg")).unwrap();
    fs::write(root.join("pkg/good.py"), "value = 42\n").unwrap();
    fs::write(root.join("pkg/bad.py"), "def broken(:\n    pass\n").unwrap();

    let config = BuildConfig::new(&root, temp_dir.path().join("BUILD")).python(toolchain.python());
    let err = Orchestrator::new(config, toolchain).run().unwrap_err();
    assert!(matches!(err, BuildError::Compilation(_)), "{}", err);

    let staged: Vec<PathBuf> = fs::read_dir(root.join("pkg"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "so" || ext == "pyd"))
        .collect();
    assert!(staged.is_empty(), "unexpected artifacts: {:?}", staged);
}
