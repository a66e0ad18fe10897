//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::fmt::Write as _;
use std::path::Path;

use super::duration::format_duration;
use super::parser::POLICY_SECTION_PREFIX;
use super::settings::ConfigFile;
use crate::policy::display_limit;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let e = &config.executor;
    let c = &config.controller;

    let mut out = format!(
        r#"[executor]
; Global pool shared by every policy executor.
; Pool name, also the worker thread name prefix
name = {}
; Threads kept alive while idle (default: 4)
core_threads = {}
; Upper bound on worker threads (default: 64)
max_threads = {}
; Idle time before a non-core worker exits. Supports ms, s, m suffixes.
keep_alive = {}
; Queue backing the pool: unbounded, or bounded:<capacity>
queue = {}

[controller]
; Adaptive pool sizing. When enabled the controller moves the pool size
; between min_threads and the executor's max_threads towards the size with
; the best measured throughput.
enabled = {}
min_threads = {}
; Time between samples while healthy (default: 1500ms)
interval = {}
; Time between samples while breaking a hang (default: 500ms)
hang_interval = {}
; Threads added or removed per step (default: 1)
pool_increment = {}
; Neighbouring sizes compared on each side (default: 2)
compare_range = {}
; Threads a hang may add above max_threads (default: 32)
hang_buffer = {}
; Minimum score for a move (default: 0.5)
threshold = {}
; Lead one direction needs over the other (default: 0.1)
margin = {}
; Holds before a forced move (default: 5)
stagnation_limit = {}
; CPU usage (0.0-1.0) at which growth is vetoed (default: 0.9)
high_cpu = {}

[logging]
; Log file path
file = {}
"#,
        e.name,
        e.core_threads,
        e.max_threads,
        format_duration(e.keep_alive),
        e.queue,
        c.enabled,
        c.min_threads,
        format_duration(c.interval),
        format_duration(c.hang_interval),
        c.pool_increment,
        c.compare_range,
        c.hang_buffer,
        c.threshold,
        c.margin,
        c.stagnation_limit,
        c.high_cpu,
        path_to_string(&config.logging.file),
    );

    if config.policies.is_empty() {
        out.push_str(
            r#"
; Policy executors are declared one section each, for example:
;
; [policy.io]
; core_concurrency = 0
; max_concurrency = 8
; max_queue_size = 100
; max_wait_for_enqueue = 0s
; queue_full_action = abort   ; or caller_runs
; start_timeout = 5s          ; optional
; max_policy = loose          ; or strict
"#,
        );
    }

    for (id, p) in &config.policies {
        let _ = write!(
            out,
            "\n[{}{}]\ncore_concurrency = {}\nmax_concurrency = {}\nmax_queue_size = {}\nmax_wait_for_enqueue = {}\nqueue_full_action = {}\n",
            POLICY_SECTION_PREFIX,
            id,
            display_limit(p.core_concurrency),
            display_limit(p.max_concurrency),
            display_limit(p.max_queue_size),
            format_duration(p.max_wait_for_enqueue),
            p.queue_full_action,
        );
        if let Some(timeout) = p.start_timeout {
            let _ = writeln!(out, "start_timeout = {}", format_duration(timeout));
        }
        let _ = writeln!(out, "max_policy = {}", p.max_policy);
    }

    out
}

/// Render a path, abbreviating the home directory to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
