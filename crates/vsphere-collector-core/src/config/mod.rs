//! Environment-driven configuration for the collector.

pub mod env_utils;
pub mod error;

pub use env_utils::{EnvLoader, EnvValidator};
pub use error::{ConfigError, ConfigResult};

use std::time::Duration;

/// Default inventory refresh period, matching `ZBX_VMWARE_CACHE_UPDATE_PERIOD`.
pub const DEFAULT_FREQUENCY_SECS: u64 = 60;
/// Default performance-counter refresh period, matching `ZBX_VMWARE_PERF_UPDATE_PERIOD`.
pub const DEFAULT_PERF_FREQUENCY_SECS: u64 = 60;
/// Idle service eviction TTL, matching `ZBX_VMWARE_SERVICE_TTL`.
pub const DEFAULT_SERVICE_TTL_SECS: u64 = 3600;
/// Default SOAP request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default `maxQueryMetrics` cap used when the endpoint's `OptionManager`
/// value is absent, matching `ZBX_VPXD_STATS_MAXQUERYMETRICS`.
pub const DEFAULT_MAX_QUERY_METRICS: i32 = 64;
/// Sentinel cap substituted for `-1`/`0`, matching `ZBX_MAXQUERYMETRICS_UNLIMITED`.
pub const MAX_QUERY_METRICS_UNLIMITED: i32 = 1000;
/// How often the scheduler offers the shared arena a chance to `compact`,
/// matching `ZBX_VMWARE_CACHE_UPDATE_PERIOD`'s `COMPRESS_PERIOD` sibling
/// constant (24 hours, §4.1).
pub const COMPRESS_PERIOD_SECS: u64 = 24 * 60 * 60;

/// Configuration for one vCenter/ESXi endpoint the collector polls.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub tls_verify: bool,
}

/// Top-level configuration loaded once at process start.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub frequency: Duration,
    pub perf_frequency: Duration,
    pub service_ttl: Duration,
    pub timeout: Duration,
    pub max_query_metrics_default: i32,
    pub log_level: String,
}

impl CollectorConfig {
    /// Loads configuration from the process environment. A single endpoint
    /// is read from `VMWARE_URL`/`VMWARE_USERNAME`/`VMWARE_PASSWORD`;
    /// multi-endpoint deployments are expected to invoke the collector once
    /// per endpoint, matching the source's one-service-per-URL model.
    pub fn from_env() -> ConfigResult<Self> {
        EnvValidator::validate_collector_vars()?;

        let url: String = EnvLoader::load_required("VMWARE_URL")?;
        let username: String = EnvLoader::load_required("VMWARE_USERNAME")?;
        let password: String = EnvLoader::load_required("VMWARE_PASSWORD")?;
        let tls_verify = EnvLoader::load_bool("VMWARE_TLS_VERIFY", false);

        let frequency = EnvLoader::load_duration_seconds("VMWARE_FREQUENCY", DEFAULT_FREQUENCY_SECS)?;
        let perf_frequency =
            EnvLoader::load_duration_seconds("VMWARE_PERF_FREQUENCY", DEFAULT_PERF_FREQUENCY_SECS)?;
        let service_ttl =
            EnvLoader::load_duration_seconds("VMWARE_SERVICE_TTL", DEFAULT_SERVICE_TTL_SECS)?;
        let timeout = EnvLoader::load_duration_seconds("VMWARE_TIMEOUT", DEFAULT_TIMEOUT_SECS)?;
        let max_query_metrics_default: i32 =
            EnvLoader::load_with_default("VMWARE_MAX_QUERY_METRICS", DEFAULT_MAX_QUERY_METRICS)?;
        let log_level: String = EnvLoader::load_with_default("LOG_LEVEL", "info".to_string())?;

        let config = Self {
            endpoints: vec![EndpointConfig { url, username, password, tls_verify }],
            frequency,
            perf_frequency,
            service_ttl,
            timeout,
            max_query_metrics_default,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::validation_failed(
                "no endpoints configured",
                "collector config",
                "set VMWARE_URL/VMWARE_USERNAME/VMWARE_PASSWORD",
                vec![],
            ));
        }
        for endpoint in &self.endpoints {
            if !endpoint.url.starts_with("http://") && !endpoint.url.starts_with("https://") {
                return Err(ConfigError::invalid_value(
                    "VMWARE_URL",
                    &endpoint.url,
                    "URL starting with http:// or https://",
                    "environment variable",
                ));
            }
        }
        if self.frequency.is_zero() || self.perf_frequency.is_zero() {
            return Err(ConfigError::validation_failed(
                "refresh periods must be non-zero",
                "collector config",
                "set VMWARE_FREQUENCY / VMWARE_PERF_FREQUENCY to a positive number of seconds",
                vec![],
            ));
        }
        Ok(())
    }

    /// Resolves the effective `maxQueryMetrics` cap for a given raw value
    /// reported by the endpoint's `OptionManager` (`None` when the key is
    /// absent). Negative values and zero are treated as "unlimited".
    pub fn resolve_max_query_metrics(&self, reported: Option<i32>) -> i32 {
        match reported {
            None => self.max_query_metrics_default,
            Some(v) if v <= 0 => MAX_QUERY_METRICS_UNLIMITED,
            Some(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_when_option_absent() {
        let cfg = CollectorConfig {
            endpoints: vec![],
            frequency: Duration::from_secs(60),
            perf_frequency: Duration::from_secs(60),
            service_ttl: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
            max_query_metrics_default: 64,
            log_level: "info".into(),
        };
        assert_eq!(cfg.resolve_max_query_metrics(None), 64);
        assert_eq!(cfg.resolve_max_query_metrics(Some(-1)), MAX_QUERY_METRICS_UNLIMITED);
        assert_eq!(cfg.resolve_max_query_metrics(Some(0)), MAX_QUERY_METRICS_UNLIMITED);
        assert_eq!(cfg.resolve_max_query_metrics(Some(128)), 128);
    }

    #[test]
    fn validate_rejects_empty_endpoints() {
        let cfg = CollectorConfig {
            endpoints: vec![],
            frequency: Duration::from_secs(60),
            perf_frequency: Duration::from_secs(60),
            service_ttl: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
            max_query_metrics_default: 64,
            log_level: "info".into(),
        };
        assert!(cfg.validate().is_err());
    }
}
