//! Configuration management for the resolver.
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then environment variables (highest priority).

use crate::protocol::{ChannelMethod, TwoFactorConfig};
use crate::utils::logging::LogLevel;
use crate::{ResolverError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "GDK_RESOLVER";

/// Backoff used while waiting for the session to reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Number of connectivity checks before giving up
    pub max_attempts: u32,
    /// Delay after the first failed check, in milliseconds
    pub interval_ms: u64,
    /// Growth factor applied to the delay after each failed check
    pub multiplier: f64,
    /// Upper bound for a single delay, in milliseconds
    pub max_interval_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 3_000,
            multiplier: 1.0,
            max_interval_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval_ms: interval.as_millis() as u64,
            multiplier: 1.0,
            max_interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Delay to sleep after the failed check number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.interval_ms as f64 * self.multiplier.powi(exponent);
        std::cmp::min(
            Duration::from_millis(millis.round() as u64),
            self.max_interval(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ResolverError::Config("max_attempts must be at least 1".to_string()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ResolverError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_interval_ms < self.interval_ms {
            return Err(ResolverError::Config(
                "max_interval_ms must not be smaller than interval_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// When the code prompt may offer "call me instead".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "method")]
pub enum CallMethodPolicy {
    Disabled,
    /// Offer the upgrade when this is the only enabled method.
    SingleEnabledMethod(ChannelMethod),
}

impl Default for CallMethodPolicy {
    fn default() -> Self {
        CallMethodPolicy::SingleEnabledMethod(ChannelMethod::Sms)
    }
}

impl CallMethodPolicy {
    pub fn allows_upgrade(&self, config: &TwoFactorConfig) -> bool {
        match self {
            CallMethodPolicy::Disabled => false,
            CallMethodPolicy::SingleEnabledMethod(method) => {
                config.enabled_methods.len() == 1 && config.enabled_methods.contains(method)
            }
        }
    }
}

/// Resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub backoff: BackoffConfig,
    pub call_method_policy: CallMethodPolicy,
    /// Network identifier handed to prompts and devices
    pub network: String,
    /// Directory holding persisted device whitelists. None keeps them in memory.
    #[serde(rename = "datadir", skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            call_method_policy: CallMethodPolicy::default(),
            network: "mainnet".to_string(),
            data_dir: None,
            log_level: None,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        if self.network.is_empty() {
            return Err(ResolverError::Config("network must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Loads [`ResolverConfig`] from file and environment.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            environment_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.environment_prefix = prefix.to_string();
        self
    }

    /// Load using the process environment.
    pub fn load(&self) -> Result<ResolverConfig> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Load using `lookup` for environment values.
    pub fn load_with<F>(&self, lookup: F) -> Result<ResolverConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.file {
            Some(path) if path.exists() => {
                log::debug!("Loading resolver configuration from {:?}", path);
                Self::load_from_file(path)?
            }
            _ => ResolverConfig::default(),
        };

        self.apply_environment(&mut config, lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON.
    pub fn save(config: &ResolverConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        fs::write(path, json)?;
        log::info!("Resolver configuration saved to {:?}", path);
        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<ResolverConfig> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| ResolverError::Config(format!("Invalid config file {:?}: {}", path, e)))
    }

    fn env_key(&self, name: &str) -> String {
        format!("{}_{}", self.environment_prefix, name)
    }

    fn apply_environment<F>(&self, config: &mut ResolverConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(&self.env_key("MAX_ATTEMPTS")) {
            config.backoff.max_attempts = parse_env("MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup(&self.env_key("INTERVAL_MS")) {
            config.backoff.interval_ms = parse_env("INTERVAL_MS", &value)?;
            config.backoff.max_interval_ms = config.backoff.max_interval_ms.max(config.backoff.interval_ms);
        }
        if let Some(value) = lookup(&self.env_key("MULTIPLIER")) {
            config.backoff.multiplier = parse_env("MULTIPLIER", &value)?;
        }
        if let Some(value) = lookup(&self.env_key("NETWORK")) {
            config.network = value;
        }
        if let Some(value) = lookup(&self.env_key("DATA_DIR")) {
            config.data_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(&self.env_key("LOG_LEVEL")) {
            config.log_level = Some(value.parse()?);
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ResolverError::Config(format!("Invalid value for {}: '{}'", name, value)))
}
