//! Environment-driven configuration
//!
//! | Variable                           | Default     |
//! |------------------------------------|-------------|
//! | `ROLLCALL_SERVICES`                | `*`         |
//! | `ROLLCALL_IGNORED_SERVICES`        | (empty)     |
//! | `ROLLCALL_FAILURE_POLICY`          | `preserve`  |
//! | `ROLLCALL_MANAGEMENT_CONTEXT_PATH` | `/actuator` |
//! | `ROLLCALL_HEALTH_PATH`             | `health`    |
//! | `ROLLCALL_REGISTER_RETRIES`        | `0`         |
//! | `ROLLCALL_LOG_LEVEL`               | `info`      |
//! | `ROLLCALL_LOG_FORMAT`              | `pretty`    |
//!
//! Pattern lists are comma separated; blank entries are ignored.

use crate::convert::{
    DEFAULT_HEALTH_PATH, DEFAULT_MANAGEMENT_CONTEXT_PATH, DefaultInstanceConverter,
};
use crate::error::{Result, RollcallError};
use crate::reconciler::{FailurePolicy, ReconcilerBuilder};
use crate::retry::BackoffConfig;
use rollcall_core::{InstanceStore, RegistrationSink};
use std::str::FromStr;
use std::sync::Arc;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for terminals
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected 'pretty' or 'json'")),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Include patterns
    pub services: Vec<String>,
    /// Exclude patterns
    pub ignored_services: Vec<String>,
    /// Pruning behaviour for services with failed instances
    pub failure_policy: FailurePolicy,
    /// Default management context path for the stock converter
    pub management_context_path: String,
    /// Default health path for the stock converter
    pub health_path: String,
    /// Registration retries; 0 disables the retry wrapper
    pub register_retries: u32,
    /// Log filter directive, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: vec!["*".to_string()],
            ignored_services: Vec::new(),
            failure_policy: FailurePolicy::default(),
            management_context_path: DEFAULT_MANAGEMENT_CONTEXT_PATH.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            register_retries: 0,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    ///
    /// Unset or blank variables keep their defaults; unparsable values are
    /// rejected with [`RollcallError::Config`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("ROLLCALL_SERVICES") {
            config.services = split_list(&value);
        }
        if let Some(value) = get("ROLLCALL_IGNORED_SERVICES") {
            config.ignored_services = split_list(&value);
        }
        if let Some(value) = get("ROLLCALL_FAILURE_POLICY") {
            config.failure_policy = value
                .parse()
                .map_err(|e| RollcallError::Config(format!("ROLLCALL_FAILURE_POLICY: {e}")))?;
        }
        if let Some(value) = get("ROLLCALL_MANAGEMENT_CONTEXT_PATH") {
            config.management_context_path = value.trim().to_string();
        }
        if let Some(value) = get("ROLLCALL_HEALTH_PATH") {
            config.health_path = value.trim().to_string();
        }
        if let Some(value) = get("ROLLCALL_REGISTER_RETRIES") {
            config.register_retries = value.trim().parse().map_err(|e| {
                RollcallError::Config(format!("ROLLCALL_REGISTER_RETRIES: '{value}': {e}"))
            })?;
        }
        if let Some(value) = get("ROLLCALL_LOG_LEVEL") {
            config.log_level = value.trim().to_string();
        }
        if let Some(value) = get("ROLLCALL_LOG_FORMAT") {
            config.log_format = value
                .parse()
                .map_err(|e| RollcallError::Config(format!("ROLLCALL_LOG_FORMAT: {e}")))?;
        }

        if config.services.is_empty() {
            return Err(RollcallError::Config(
                "ROLLCALL_SERVICES: at least one pattern is required".to_string(),
            ));
        }
        Ok(config)
    }

    /// Reconciler builder pre-configured from this config
    pub fn reconciler_builder(
        &self,
        sink: Arc<dyn RegistrationSink>,
        store: Arc<dyn InstanceStore>,
    ) -> ReconcilerBuilder {
        let converter = DefaultInstanceConverter::new()
            .management_context_path(self.management_context_path.clone())
            .health_path(self.health_path.clone());

        let builder = ReconcilerBuilder::new(sink, store)
            .include(self.services.iter().cloned())
            .exclude(self.ignored_services.iter().cloned())
            .converter(converter)
            .failure_policy(self.failure_policy);

        if self.register_retries > 0 {
            builder.retry(BackoffConfig::with_retries(self.register_retries))
        } else {
            builder
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::InstanceRegistry;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.services, vec!["*"]);
        assert_eq!(config.failure_policy, FailurePolicy::Preserve);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_lists_are_split_and_trimmed() {
        let config = load(&[
            ("ROLLCALL_SERVICES", "orders-*, billing-* ,"),
            ("ROLLCALL_IGNORED_SERVICES", "orders-test"),
        ])
        .unwrap();
        assert_eq!(config.services, vec!["orders-*", "billing-*"]);
        assert_eq!(config.ignored_services, vec!["orders-test"]);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = load(&[("ROLLCALL_SERVICES", "  "), ("ROLLCALL_LOG_LEVEL", "")]).unwrap();
        assert_eq!(config.services, vec!["*"]);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_only_commas_is_rejected() {
        let err = load(&[("ROLLCALL_SERVICES", ",,")]).unwrap_err();
        assert!(matches!(err, RollcallError::Config(_)));
    }

    #[test]
    fn test_parsed_values() {
        let config = load(&[
            ("ROLLCALL_FAILURE_POLICY", "prune"),
            ("ROLLCALL_REGISTER_RETRIES", "4"),
            ("ROLLCALL_LOG_FORMAT", "JSON"),
            ("ROLLCALL_LOG_LEVEL", "rollcall=debug"),
            ("ROLLCALL_HEALTH_PATH", "status"),
        ])
        .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Prune);
        assert_eq!(config.register_retries, 4);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level, "rollcall=debug");
        assert_eq!(config.health_path, "status");
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for (key, value) in [
            ("ROLLCALL_FAILURE_POLICY", "sometimes"),
            ("ROLLCALL_REGISTER_RETRIES", "-1"),
            ("ROLLCALL_LOG_FORMAT", "xml"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            assert!(err.to_string().contains(key), "{key}: {err}");
        }
    }

    #[test]
    fn test_reconciler_builder_applies_config() {
        let config = load(&[
            ("ROLLCALL_SERVICES", "orders-*"),
            ("ROLLCALL_IGNORED_SERVICES", "orders-test"),
            ("ROLLCALL_FAILURE_POLICY", "prune"),
        ])
        .unwrap();
        let registry = Arc::new(InstanceRegistry::in_memory());
        let reconciler = config
            .reconciler_builder(registry.clone(), registry)
            .build();

        assert_eq!(reconciler.policy(), FailurePolicy::Prune);
        assert!(reconciler.filter().should_register("orders-api"));
        assert!(!reconciler.filter().should_register("orders-test"));
    }
}
