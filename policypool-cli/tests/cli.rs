//! End-to-end tests running the `policypool` binary.

use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn policypool() -> Command {
    Command::new(env!("CARGO_BIN_EXE_policypool"))
}

#[test]
fn test_config_path_honours_flag() {
    let output = policypool()
        .args(["config", "path", "--config", "/tmp/somewhere/config.ini"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "/tmp/somewhere/config.ini"
    );
}

#[test]
fn test_config_init_then_show() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.ini");
    let path_arg = path.to_str().unwrap();

    let init = policypool()
        .args(["config", "init", "--config", path_arg])
        .output()
        .unwrap();
    assert!(init.status.success());
    assert!(fs::read_to_string(&path).unwrap().contains("[executor]"));

    let again = policypool()
        .args(["config", "init", "--config", path_arg])
        .output()
        .unwrap();
    assert_eq!(again.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&again.stderr).contains("--force"));

    let show = policypool()
        .args(["config", "show", "--config", path_arg])
        .output()
        .unwrap();
    assert!(show.status.success());
    let stdout = String::from_utf8_lossy(&show.stdout);
    assert!(stdout.contains("[controller]"));
    assert!(stdout.contains("max_threads"));
}

#[test]
fn test_invalid_config_value_fails_with_hint() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.ini");
    fs::write(&path, "[executor]\nmax_threads = many\n").unwrap();

    let output = policypool()
        .args(["config", "show", "--config", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("executor.max_threads"));
    assert!(stderr.contains("[executor]"));
}

#[test]
fn test_demo_runs_small_workload() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.ini");
    let log = temp.path().join("demo.log");
    fs::write(
        &path,
        format!(
            "[executor]\ncore_threads = 2\nmax_threads = 4\n\n[logging]\nfile = {}\n\n[policy.work]\nmax_concurrency = 2\n",
            log.display()
        ),
    )
    .unwrap();

    let output = policypool()
        .args([
            "demo",
            "--config",
            path.to_str().unwrap(),
            "--tasks",
            "20",
            "--task-ms",
            "1",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("succeeded: 20"));
    assert!(stdout.contains("work"));
    assert!(log.exists());
}

#[test]
fn test_demo_rejects_bad_failure_rate() {
    let output = policypool()
        .args(["demo", "--failure-rate", "2"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}
