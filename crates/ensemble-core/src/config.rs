//! Engine configuration loaded from TOML.
//!
//! Deserialization goes through `RawEngineConfig` (every field defaulted),
//! then `TryFrom` performs semantic validation so a bad file fails at load
//! time rather than mid-run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::app::RankPolicy;
use crate::domain::{ConfigError, ResourceDescription};

/// Wait window between a heartbeat request and checking for its response.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

pub const DEFAULT_IDLE_POLL_MS: u64 = 10;

pub const DEFAULT_RUNTIME_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawEngineConfig {
    pub heartbeat_interval_ms: u64,
    pub idle_poll_ms: u64,
    /// `0` disables the bound.
    pub runtime_timeout_ms: u64,
    pub rank_policy: RankPolicy,
    pub log_level: Option<String>,
    /// Validated separately so shape errors read like resource errors.
    pub resource: Option<serde_json::Value>,
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            runtime_timeout_ms: DEFAULT_RUNTIME_TIMEOUT_MS,
            rank_policy: RankPolicy::default(),
            log_level: None,
            resource: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub heartbeat_interval: Duration,
    pub idle_poll: Duration,
    pub runtime_timeout: Option<Duration>,
    pub rank_policy: RankPolicy,
    pub log_level: Option<String>,
    pub resource: Option<ResourceDescription>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            idle_poll: Duration::from_millis(DEFAULT_IDLE_POLL_MS),
            runtime_timeout: Some(Duration::from_millis(DEFAULT_RUNTIME_TIMEOUT_MS)),
            rank_policy: RankPolicy::default(),
            log_level: None,
            resource: None,
        }
    }
}

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawEngineConfig) -> Result<Self, Self::Error> {
        if raw.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }

        let resource = raw
            .resource
            .as_ref()
            .map(ResourceDescription::from_value)
            .transpose()?;

        Ok(Self {
            heartbeat_interval: Duration::from_millis(raw.heartbeat_interval_ms),
            idle_poll: Duration::from_millis(raw.idle_poll_ms),
            runtime_timeout: (raw.runtime_timeout_ms > 0)
                .then(|| Duration::from_millis(raw.runtime_timeout_ms)),
            rank_policy: raw.rank_policy,
            log_level: raw.log_level,
            resource,
        })
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawEngineConfig = toml::from_str(contents)?;
        Self::try_from(raw)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Ensemble.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn full_file_is_parsed() {
        let config = EngineConfig::from_toml_str(
            r#"
            heartbeat_interval_ms = 500
            idle_poll_ms = 1
            runtime_timeout_ms = 0
            rank_policy = "reject"
            log_level = "debug"

            [resource]
            resource = "local.localhost"
            walltime = 40
            cores = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.runtime_timeout, None);
        assert_eq!(config.rank_policy, RankPolicy::Reject);
        assert_eq!(config.resource.unwrap().cores, 20);
    }

    #[test]
    fn bad_resource_table_is_a_validation_error() {
        let err = EngineConfig::from_toml_str(
            r#"
            [resource]
            resource = "local.localhost"
            walltime = "forty"
            cores = 20
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Resource(_)));
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let err = EngineConfig::from_toml_str("heartbeat_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let err = EngineConfig::from_toml_str("heartbeat = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "idle_poll_ms = 25").unwrap();

        let config = EngineConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.idle_poll, Duration::from_millis(25));

        let missing = EngineConfig::load_from_path("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
