//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::duration::parse_duration;
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::policy::{PolicySettings, UNBOUNDED};

/// Prefix of per-executor sections, e.g. `[policy.io]`.
pub(super) const POLICY_SECTION_PREFIX: &str = "policy.";

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [executor] section
    if let Some(section) = ini.section(Some("executor")) {
        let s = Section::new("executor", section);
        if let Some(v) = section.get("name") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("executor", "name", v, "must not be empty"));
            }
            config.executor.name = v.to_string();
        }
        if let Some(v) = s.parsed("core_threads", "must be a non-negative integer")? {
            config.executor.core_threads = v;
        }
        if let Some(v) = s.parsed("max_threads", "must be a positive integer")? {
            config.executor.max_threads = v;
        }
        if let Some(v) = s.duration("keep_alive")? {
            config.executor.keep_alive = v;
        }
        if let Some(v) = section.get("queue") {
            config.executor.queue = v
                .parse()
                .map_err(|reason: String| invalid("executor", "queue", v, &reason))?;
        }
        if config.executor.max_threads == 0 {
            return Err(invalid("executor", "max_threads", "0", "must be at least 1"));
        }
        if config.executor.core_threads > config.executor.max_threads {
            return Err(invalid(
                "executor",
                "core_threads",
                &config.executor.core_threads.to_string(),
                "must not exceed max_threads",
            ));
        }
    }

    // [controller] section
    if let Some(section) = ini.section(Some("controller")) {
        let s = Section::new("controller", section);
        let c = &mut config.controller;
        if let Some(v) = s.boolean("enabled")? {
            c.enabled = v;
        }
        if let Some(v) = s.parsed("min_threads", "must be a positive integer")? {
            c.min_threads = v;
        }
        if let Some(v) = s.duration("interval")? {
            c.interval = v;
        }
        if let Some(v) = s.duration("hang_interval")? {
            c.hang_interval = v;
        }
        if let Some(v) = s.parsed("pool_increment", "must be a positive integer")? {
            c.pool_increment = v;
        }
        if let Some(v) = s.parsed("compare_range", "must be a positive integer")? {
            c.compare_range = v;
        }
        if let Some(v) = s.parsed("hang_buffer", "must be a non-negative integer")? {
            c.hang_buffer = v;
        }
        if let Some(v) = s.fraction("threshold")? {
            c.threshold = v;
        }
        if let Some(v) = s.fraction("margin")? {
            c.margin = v;
        }
        if let Some(v) = s.parsed("stagnation_limit", "must be a positive integer")? {
            c.stagnation_limit = v;
        }
        if let Some(v) = s.fraction("high_cpu")? {
            c.high_cpu = v;
        }
        if let Err(e) = config.controller_config().validate() {
            return Err(invalid("controller", "*", "", &e.to_string()));
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    // [policy.<id>] sections
    for (name, section) in ini.iter() {
        let Some(id) = name.and_then(|n| n.strip_prefix(POLICY_SECTION_PREFIX)) else {
            continue;
        };
        let section_name = format!("{POLICY_SECTION_PREFIX}{id}");
        let id = id.trim();
        if id.is_empty() {
            return Err(invalid(&section_name, "", "", "policy id must not be empty"));
        }
        let settings = parse_policy(&Section::new(&section_name, section))?;
        config.policies.insert(id.to_string(), settings);
    }

    Ok(config)
}

fn parse_policy(s: &Section<'_>) -> Result<PolicySettings, ConfigFileError> {
    let mut settings = PolicySettings::default();
    if let Some(v) = s.limit("core_concurrency")? {
        settings.core_concurrency = v;
    }
    if let Some(v) = s.limit("max_concurrency")? {
        settings.max_concurrency = v;
    }
    if let Some(v) = s.limit("max_queue_size")? {
        settings.max_queue_size = v;
    }
    if let Some(v) = s.duration("max_wait_for_enqueue")? {
        settings.max_wait_for_enqueue = v;
    }
    if let Some(v) = s.props.get("queue_full_action") {
        settings.queue_full_action = v
            .parse()
            .map_err(|reason: String| invalid(s.name, "queue_full_action", v, &reason))?;
    }
    if let Some(v) = s.props.get("start_timeout") {
        let v = v.trim();
        settings.start_timeout = if v.is_empty() || v.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(parse_duration(v).map_err(|e| invalid(s.name, "start_timeout", v, &e.to_string()))?)
        };
    }
    if let Some(v) = s.props.get("max_policy") {
        settings.max_policy = v
            .parse()
            .map_err(|reason: String| invalid(s.name, "max_policy", v, &reason))?;
    }
    settings
        .validate()
        .map_err(|e| invalid(s.name, "*", "", &e.to_string()))?;
    Ok(settings)
}

/// One INI section together with its name, for error reporting.
struct Section<'a> {
    name: &'a str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'a str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    fn parsed<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        self.props
            .get(key)
            .map(|v| v.trim().parse().map_err(|_| invalid(self.name, key, v, reason)))
            .transpose()
    }

    fn duration(&self, key: &str) -> Result<Option<Duration>, ConfigFileError> {
        self.props
            .get(key)
            .map(|v| parse_duration(v).map_err(|e| invalid(self.name, key, v, &e.to_string())))
            .transpose()
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, ConfigFileError> {
        self.props
            .get(key)
            .map(|v| match v.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(invalid(self.name, key, v, "must be 'true' or 'false'")),
            })
            .transpose()
    }

    fn fraction(&self, key: &str) -> Result<Option<f64>, ConfigFileError> {
        let reason = "must be a number between 0.0 and 1.0";
        self.props
            .get(key)
            .map(|v| match v.trim().parse::<f64>() {
                Ok(f) if (0.0..=1.0).contains(&f) => Ok(f),
                _ => Err(invalid(self.name, key, v, reason)),
            })
            .transpose()
    }

    /// A count that may also be `unbounded`.
    fn limit(&self, key: &str) -> Result<Option<usize>, ConfigFileError> {
        self.props
            .get(key)
            .map(|v| {
                let t = v.trim();
                if t.eq_ignore_ascii_case("unbounded") {
                    Ok(UNBOUNDED)
                } else {
                    t.parse::<usize>().map_err(|_| {
                        invalid(self.name, key, v, "must be a non-negative integer or 'unbounded'")
                    })
                }
            })
            .transpose()
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::QueueFullAction;
    use crate::pool::QueueKind;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_executor_section() {
        let config = parse(
            "[executor]\nname = work\ncore_threads = 2\nmax_threads = 16\nkeep_alive = 30s\nqueue = bounded:128\n",
        )
        .unwrap();
        assert_eq!(config.executor.name, "work");
        assert_eq!(config.executor.core_threads, 2);
        assert_eq!(config.executor.max_threads, 16);
        assert_eq!(config.executor.keep_alive, Duration::from_secs(30));
        assert_eq!(config.executor.queue, QueueKind::Bounded(128));
    }

    #[test]
    fn test_controller_section() {
        let config = parse(
            "[controller]\nenabled = false\ninterval = 2s\nhang_interval = 250ms\npool_increment = 2\ncompare_range = 3\nhang_buffer = 8\n",
        )
        .unwrap();
        let c = &config.controller;
        assert!(!c.enabled);
        assert_eq!(c.interval, Duration::from_secs(2));
        assert_eq!(c.hang_interval, Duration::from_millis(250));
        assert_eq!(c.pool_increment, 2);
        assert_eq!(c.compare_range, 3);
        assert_eq!(c.hang_buffer, 8);
        assert_eq!(config.controller_config().hard_cap(), config.executor.max_threads + 8);
    }

    #[test]
    fn test_policy_sections() {
        let config = parse(
            "[policy.io]\nmax_concurrency = 8\nmax_queue_size = 100\nqueue_full_action = caller_runs\nstart_timeout = 5s\n\n[policy.cpu]\nmax_concurrency = 2\nmax_queue_size = unbounded\n",
        )
        .unwrap();
        assert_eq!(config.policies.len(), 2);
        let io = &config.policies["io"];
        assert_eq!(io.max_concurrency, 8);
        assert_eq!(io.max_queue_size, 100);
        assert_eq!(io.queue_full_action, QueueFullAction::CallerRuns);
        assert_eq!(io.start_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.policies["cpu"].max_queue_size, UNBOUNDED);
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let err = parse("[executor]\nkeep_alive = soon\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, value, .. } => {
                assert_eq!(section, "executor");
                assert_eq!(key, "keep_alive");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse("[executor]\nqueue = ring\n").is_err());
        assert!(parse("[controller]\nthreshold = 1.5\n").is_err());
        assert!(parse("[policy.x]\nqueue_full_action = drop\n").is_err());
    }

    #[test]
    fn test_policy_core_above_max_rejected() {
        let err = parse("[policy.x]\ncore_concurrency = 4\nmax_concurrency = 2\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { ref section, .. } if section == "policy.x"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/logs/run.log");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("logs/run.log"));
        }
        assert_eq!(expand_tilde("/var/log/x.log"), PathBuf::from("/var/log/x.log"));
    }
}
