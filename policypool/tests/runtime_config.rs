//! Integration tests for building a runtime from a config file on disk.
//!
//! These tests verify:
//! - A hand-written config file loads into a working runtime
//! - Saved configuration reloads unchanged
//! - Invalid values name the offending section and key
//! - Reapplying configuration updates running executors

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use policypool::config::{ConfigFile, ConfigFileError};
use policypool::policy::{MaxPolicy, QueueFullAction};
use policypool::pool::QueueKind;
use policypool::runtime::{Runtime, RuntimeError};
use policypool::telemetry::NullTelemetrySink;
use tempfile::TempDir;

const SAMPLE_CONFIG: &str = r#"
[executor]
name = it-pool
core_threads = 2
max_threads = 6
keep_alive = 30s
queue = bounded:64

[controller]
enabled = false

[logging]
file = /tmp/policypool-it.log

[policy.io]
max_concurrency = 3
max_queue_size = 100
queue_full_action = caller_runs
start_timeout = 2s

[policy.batch]
core_concurrency = 1
max_concurrency = 2
max_policy = strict
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.ini");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_runtime_from_config_file() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, SAMPLE_CONFIG);

    let runtime = Runtime::from_config_file(&path).unwrap();
    assert_eq!(runtime.global().name(), "it-pool");
    assert_eq!(runtime.global().core_threads(), 2);
    assert_eq!(runtime.global().max_threads(), 6);
    assert!(runtime.controller().is_none());

    let io = runtime.policy("io").unwrap();
    let settings = io.settings();
    assert_eq!(settings.max_concurrency, 3);
    assert_eq!(settings.max_queue_size, 100);
    assert_eq!(settings.queue_full_action, QueueFullAction::CallerRuns);
    assert_eq!(settings.start_timeout, Some(Duration::from_secs(2)));

    let batch = runtime.policy("batch").unwrap();
    assert_eq!(batch.settings().max_policy, MaxPolicy::Strict);

    let counter = Arc::new(AtomicUsize::new(0));
    let futures: Vec<_> = (0..10)
        .map(|_| {
            let counter = Arc::clone(&counter);
            io.submit(move || counter.fetch_add(1, Ordering::SeqCst))
                .unwrap()
        })
        .collect();
    for future in futures {
        future.get_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 10);

    assert!(runtime.shutdown(Duration::from_secs(5)).unwrap());
    assert!(io.is_terminated());
}

#[test]
fn test_saved_config_reloads_unchanged() {
    let temp = TempDir::new().unwrap();
    let original = ConfigFile::from_ini_str(SAMPLE_CONFIG).unwrap();
    assert_eq!(original.executor.queue, QueueKind::Bounded(64));

    let path = temp.path().join("nested").join("config.ini");
    original.save_to(&path).unwrap();
    let reloaded = ConfigFile::load_from(&path).unwrap();
    assert_eq!(reloaded, original);
}

#[test]
fn test_invalid_value_names_key() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[policy.io]\nmax_concurrency = lots\n");

    match Runtime::from_config_file(&path) {
        Err(RuntimeError::Config(ConfigFileError::InvalidValue { section, key, .. })) => {
            assert_eq!(section, "policy.io");
            assert_eq!(key, "max_concurrency");
        }
        other => panic!("expected an invalid value error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_reapplied_config_updates_running_executors() {
    let config = ConfigFile::from_ini_str(SAMPLE_CONFIG).unwrap();
    let runtime = Runtime::with_telemetry(&config, Arc::new(NullTelemetrySink)).unwrap();

    let updated = ConfigFile::from_ini_str(
        &SAMPLE_CONFIG
            .replace("max_concurrency = 3", "max_concurrency = 5")
            .replace("[controller]\nenabled = false", "[controller]\nenabled = true\nmin_threads = 2"),
    )
    .unwrap();
    runtime.apply_config(&updated).unwrap();

    assert_eq!(runtime.policy("io").unwrap().settings().max_concurrency, 5);
    let controller = runtime.controller().expect("controller started");
    assert!(controller.is_active());
    assert_eq!(controller.config().min_threads, 2);
    assert_eq!(controller.config().max_threads, 6);
    assert_eq!(runtime.config(), updated);

    let report = runtime.introspect();
    assert_eq!(report.policies.len(), 2);
    assert!(report.controller.is_some());

    runtime.shutdown_now();
}
