//! Configuration file loading.
//!
//! The file is a YAML mapping whose schema belongs to the caller. The only
//! section read here is the optional `retry` block that tunes the request
//! retry policy.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error};
use serde::Deserialize;

use crate::http::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_ATTEMPTS,
    Method, PolicyError, RETRY_METHODS, RETRY_STATUS_CODES, RetryPolicy,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/kvm-autotester/config.yaml";

/// Top-level key of the retry section.
pub const RETRY_SECTION: &str = "retry";

/// Parsed configuration: string keys, arbitrary values.
pub type ConfigMap = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unable to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl LoadError {
    pub fn path(&self) -> &Path {
        match self {
            LoadError::Read { path, .. } | LoadError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid 'retry' section: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid 'retry' section: {0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid 'retry' section: {field} must be a non-negative number of seconds")]
    Duration { field: &'static str },
}

/// Reads `path` as a YAML mapping. An empty file is an empty mapping.
pub fn load(path: &Path) -> Result<ConfigMap, LoadError> {
    let data = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if data.trim().is_empty() {
        debug!("Config file {} is empty", path.display());
        return Ok(ConfigMap::new());
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(&data).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if value.is_null() {
        return Ok(ConfigMap::new());
    }

    serde_yaml::from_value(value).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Like [`load`], but logs the failure and carries on with no configuration.
pub fn load_or_empty(path: &Path) -> ConfigMap {
    match load(path) {
        Ok(config) => {
            debug!("Loaded {} key(s) from {}", config.len(), path.display());
            config
        }
        Err(e) => {
            error!("{}", e);
            ConfigMap::new()
        }
    }
}

/// Retry knobs as written in the config file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
    pub backoff_multiplier: f64,
    pub backoff_max_secs: f64,
    pub status_forcelist: Vec<u16>,
    pub allowed_methods: Vec<Method>,
    pub respect_retry_after: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE.as_secs_f64(),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff_max_secs: DEFAULT_BACKOFF_MAX.as_secs_f64(),
            status_forcelist: RETRY_STATUS_CODES.to_vec(),
            allowed_methods: RETRY_METHODS.to_vec(),
            respect_retry_after: true,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> Result<RetryPolicy, SettingsError> {
        let base = seconds(self.backoff_base_secs, "backoff_base_secs")?;
        let max = seconds(self.backoff_max_secs, "backoff_max_secs")?;

        Ok(
            RetryPolicy::new(self.max_attempts, base, self.backoff_multiplier)?
                .with_backoff_max(max)
                .with_status_codes(self.status_forcelist.iter().copied())
                .with_methods(self.allowed_methods.iter().copied())
                .with_retry_after(self.respect_retry_after),
        )
    }
}

fn seconds(value: f64, field: &'static str) -> Result<Duration, SettingsError> {
    Duration::try_from_secs_f64(value).map_err(|_| SettingsError::Duration { field })
}

/// Builds the retry policy from the `retry` section, or the default policy
/// when the section is absent.
pub fn retry_policy(config: &ConfigMap) -> Result<RetryPolicy, SettingsError> {
    let settings = match config.get(RETRY_SECTION) {
        None | Some(serde_yaml::Value::Null) => RetrySettings::default(),
        Some(section) => serde_yaml::from_value(section.clone())?,
    };
    settings.to_policy()
}
