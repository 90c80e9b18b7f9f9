use std::path::PathBuf;
use std::str::FromStr;

use camdrop_core::{IngestConfig, OverflowPolicy};
use serde::{Deserialize, Serialize};

use super::loader::ConfigLoadError;

/// Raw configuration as defined in a TOML file.
///
/// Pipeline sections (`[watch]`, `[queue]`, ...) sit at the top level next to
/// the server-only `[redis]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    pub redis: Option<FileRedisConfig>,
    pub shutdown_grace_secs: Option<u64>,
    #[serde(flatten)]
    pub pipeline: IngestConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

/// Environment-derived overrides. Every field is optional; set ones win over
/// the file.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub shutdown_grace_secs: Option<u64>,
    pub watch_root: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
    pub use_polling: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub stability_window_ms: Option<u64>,
    pub stability_poll_ms: Option<u64>,
    pub min_file_size: Option<u64>,
    pub queue_name: Option<String>,
    pub queue_max_size: Option<usize>,
    pub backpressure_threshold: Option<f64>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub dedupe_enabled: Option<bool>,
    pub dedupe_ttl_secs: Option<u64>,
    pub compression_threshold: Option<usize>,
    pub breaker_failure_threshold: Option<u32>,
    pub breaker_recovery_ms: Option<u64>,
    pub breaker_half_open_calls: Option<u32>,
    pub breaker_success_threshold: Option<u32>,
    pub camera_timeout_ms: Option<u64>,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Malformed values are errors
    /// naming the variable; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        Ok(Self {
            config_path: var("CAMDROP_CONFIG").map(PathBuf::from),
            redis_url: var("REDIS_URL"),
            shutdown_grace_secs: parse_var(&var, "CAMDROP_SHUTDOWN_GRACE_SECS")?,
            watch_root: var("CAMDROP_WATCH_ROOT").map(PathBuf::from),
            debounce_ms: parse_var(&var, "CAMDROP_DEBOUNCE_MS")?,
            use_polling: parse_bool_var(&var, "CAMDROP_USE_POLLING")?,
            poll_interval_ms: parse_var(&var, "CAMDROP_POLL_INTERVAL_MS")?,
            stability_window_ms: parse_var(&var, "CAMDROP_STABILITY_WINDOW_MS")?,
            stability_poll_ms: parse_var(&var, "CAMDROP_STABILITY_POLL_MS")?,
            min_file_size: parse_var(&var, "CAMDROP_MIN_FILE_SIZE")?,
            queue_name: var("CAMDROP_QUEUE_NAME"),
            queue_max_size: parse_var(&var, "CAMDROP_QUEUE_MAX_SIZE")?,
            backpressure_threshold: parse_var(&var, "CAMDROP_BACKPRESSURE_THRESHOLD")?,
            overflow_policy: parse_var(&var, "CAMDROP_OVERFLOW_POLICY")?,
            dedupe_enabled: parse_bool_var(&var, "CAMDROP_DEDUPE_ENABLED")?,
            dedupe_ttl_secs: parse_var(&var, "CAMDROP_DEDUPE_TTL_SECS")?,
            compression_threshold: parse_var(&var, "CAMDROP_COMPRESSION_THRESHOLD")?,
            breaker_failure_threshold: parse_var(&var, "CAMDROP_BREAKER_FAILURE_THRESHOLD")?,
            breaker_recovery_ms: parse_var(&var, "CAMDROP_BREAKER_RECOVERY_MS")?,
            breaker_half_open_calls: parse_var(&var, "CAMDROP_BREAKER_HALF_OPEN_CALLS")?,
            breaker_success_threshold: parse_var(&var, "CAMDROP_BREAKER_SUCCESS_THRESHOLD")?,
            camera_timeout_ms: parse_var(&var, "CAMDROP_CAMERA_TIMEOUT_MS")?,
        })
    }

    /// Overlay every set value onto `config`.
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(root) = &self.watch_root {
            config.watch.root = root.clone();
        }
        set(&mut config.watch.debounce_ms, self.debounce_ms);
        set(&mut config.watch.use_polling, self.use_polling);
        set(&mut config.watch.poll_interval_ms, self.poll_interval_ms);
        set(&mut config.stability.window_ms, self.stability_window_ms);
        set(&mut config.stability.poll_interval_ms, self.stability_poll_ms);
        set(&mut config.validation.min_file_size, self.min_file_size);
        if let Some(name) = &self.queue_name {
            config.queue.name = name.clone();
        }
        set(&mut config.queue.max_size, self.queue_max_size);
        set(
            &mut config.queue.backpressure_threshold,
            self.backpressure_threshold,
        );
        set(&mut config.queue.overflow_policy, self.overflow_policy);
        set(
            &mut config.queue.compression_threshold,
            self.compression_threshold,
        );
        set(&mut config.dedupe.enabled, self.dedupe_enabled);
        set(&mut config.dedupe.ttl_secs, self.dedupe_ttl_secs);
        set(
            &mut config.breaker.failure_threshold,
            self.breaker_failure_threshold,
        );
        set(
            &mut config.breaker.recovery_timeout_ms,
            self.breaker_recovery_ms,
        );
        set(
            &mut config.breaker.half_open_max_calls,
            self.breaker_half_open_calls,
        );
        set(
            &mut config.breaker.success_threshold,
            self.breaker_success_threshold,
        );
        set(
            &mut config.camera.registration_timeout_ms,
            self.camera_timeout_ms,
        );
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn parse_var<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| ConfigLoadError::InvalidEnv {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        })
}

fn parse_bool_var<F>(var: &F, name: &'static str) -> Result<Option<bool>, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigLoadError::InvalidEnv {
            name,
            value: raw,
            reason: "expected a boolean (true/false, 1/0, yes/no, on/off)".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parses_known_variables() {
        let env = EnvConfig::from_lookup(lookup(&[
            ("CAMDROP_WATCH_ROOT", "/data/ftp"),
            ("CAMDROP_DEBOUNCE_MS", "250"),
            ("CAMDROP_USE_POLLING", "yes"),
            ("CAMDROP_OVERFLOW_POLICY", "DROP_OLDEST"),
            ("CAMDROP_BACKPRESSURE_THRESHOLD", "0.5"),
            ("CAMDROP_CAMERA_TIMEOUT_MS", "1500"),
            ("REDIS_URL", "redis://cache:6379"),
        ]))
        .unwrap();

        assert_eq!(env.watch_root, Some(PathBuf::from("/data/ftp")));
        assert_eq!(env.debounce_ms, Some(250));
        assert_eq!(env.use_polling, Some(true));
        assert_eq!(env.overflow_policy, Some(OverflowPolicy::DropOldest));
        assert_eq!(env.backpressure_threshold, Some(0.5));
        assert_eq!(env.camera_timeout_ms, Some(1_500));
        assert_eq!(env.redis_url.as_deref(), Some("redis://cache:6379"));

        let mut config = IngestConfig::default();
        env.apply(&mut config);
        assert_eq!(config.camera.registration_timeout_ms, 1_500);
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = EnvConfig::from_lookup(lookup(&[("CAMDROP_QUEUE_MAX_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("CAMDROP_QUEUE_MAX_SIZE"));

        let err = EnvConfig::from_lookup(lookup(&[("CAMDROP_DEDUPE_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("CAMDROP_DEDUPE_ENABLED"));

        let err = EnvConfig::from_lookup(lookup(&[("CAMDROP_OVERFLOW_POLICY", "discard")]))
            .unwrap_err();
        assert!(err.to_string().contains("CAMDROP_OVERFLOW_POLICY"));
    }

    #[test]
    fn empty_values_are_unset() {
        let env = EnvConfig::from_lookup(lookup(&[("CAMDROP_DEBOUNCE_MS", "  ")])).unwrap();
        assert_eq!(env.debounce_ms, None);
    }

    #[test]
    fn apply_overrides_only_set_fields() {
        let env = EnvConfig {
            queue_max_size: Some(42),
            dedupe_enabled: Some(false),
            ..EnvConfig::default()
        };
        let mut config = IngestConfig::default();
        env.apply(&mut config);
        assert_eq!(config.queue.max_size, 42);
        assert!(!config.dedupe.enabled);
        assert_eq!(config.watch.debounce_ms, 500);
    }
}
