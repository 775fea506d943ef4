use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn volley(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("volley").unwrap();
    cmd.current_dir(dir);
    cmd
}

fn write(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn sh_config(test_dir: &str) -> String {
    format!(
        r#"
[run]
test_files_directory = "{}"

[engine]
program = "sh"
arguments = ["{{test}}", "{{results}}"]
results_dir = "out/results"
"#,
        test_dir
    )
}

#[test]
fn test_init_writes_valid_config() {
    let temp = TempDir::new().unwrap();

    volley(temp.path())
        .args(["init", "--scheduler", "command"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created volley.toml"));

    volley(temp.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Scheduler: command"));

    volley(temp.path()).arg("init").assert().failure();
}

#[test]
fn test_validate_rejects_bad_config() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "volley.toml", "[engine]\nresults_format = \"xml\"\n");

    volley(temp.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_collect_lists_tests_in_order() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "volley.toml", &sh_config("plans"));
    write(temp.path(), "plans/zeta.jmx", "exit 0\n");
    write(temp.path(), "plans/alpha.jmx", "exit 0\n");
    write(temp.path(), "plans/notes.txt", "");

    volley(temp.path())
        .arg("collect")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tests (2):"))
        .stdout(predicate::str::is_match("(?s)alpha\\.jmx.*zeta\\.jmx").unwrap())
        .stdout(predicate::str::contains("notes.txt").not());
}

#[test]
fn test_collect_json() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "volley.toml", &sh_config("plans"));
    write(temp.path(), "plans/api/orders.jmx", "exit 0\n");

    let output = volley(temp.path())
        .args(["collect", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let listing: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listing["tests"][0]["relative_path"], "api/orders.jmx");
    assert_eq!(listing["includes"][0], "**/*.jmx");
}

#[test]
fn test_run_skipped_when_directory_missing() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "volley.toml", &sh_config("missing"));

    volley(temp.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("skipping load tests"));
}

#[test]
fn test_run_executes_tests_and_writes_manifest() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "volley.toml", &sh_config("plans"));
    write(temp.path(), "plans/a.jmx", "echo a > \"$1\"\n");
    write(temp.path(), "plans/b.jmx", "echo b > \"$1\"\n");

    volley(temp.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("All tests executed."));

    assert!(temp.path().join("out/results/a.jtl").is_file());
    assert!(temp.path().join("out/results/b.jtl").is_file());

    let manifest = std::fs::read_to_string(temp.path().join("out/results/result-files.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["result_files"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_fails_on_non_zero_exit() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "volley.toml", &sh_config("plans"));
    write(temp.path(), "plans/broken.jmx", "exit 2\n");

    volley(temp.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Load test run failed"));
}
