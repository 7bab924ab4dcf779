use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, content).expect("write fixture");
}

fn sandtest(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sandtest"))
        .args(args)
        .env_remove("SANDTEST_TIMEOUT_MS")
        .output()
        .expect("spawn sandtest")
}

fn project() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "src/sum.js", "export const sum = (a, b) => a + b;\n");
    write(
        dir.path(),
        "src/sum.test.js",
        "import { sum } from './sum';\ndescribe('sum', () => { it('adds', () => expect(sum(2, 3)).toBe(5)); });\n",
    );
    write(dir.path(), "node_modules/pkg/index.test.js", "throw new Error('must be skipped');\n");
    dir
}

#[test]
fn run_discovers_test_files_and_succeeds() {
    let dir = project();
    let output = sandtest(&["run", dir.path().to_str().expect("utf8 path")]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}\nstderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("1 passed, 0 failed, 1 total"), "{stdout}");
}

#[test]
fn json_output_is_the_result_payload() {
    let dir = project();
    let output = sandtest(&["run", dir.path().to_str().expect("utf8 path"), "--json"]);
    assert!(output.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(payload["numTotalTests"], 1);
    assert_eq!(payload["testResults"][0]["assertionResults"][0]["fullName"], "sum > adds");
}

#[test]
fn failing_tests_exit_with_one() {
    let dir = project();
    write(
        dir.path(),
        "src/fail.spec.js",
        "it('fails', () => expect(1).toBe(2));\n",
    );
    let output = sandtest(&["run", dir.path().to_str().expect("utf8 path"), "--entry", "src/fail.spec.js"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unknown_flags_are_rejected() {
    let output = sandtest(&["run", ".", "--bogus"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E-SANDTEST-0503"));
}
