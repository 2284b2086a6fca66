//! Engine configuration.
//!
//! Every operational tunable the architecture leaves open (retry budget,
//! backoff constants, worker-pool size, external-call timeout, vault key
//! material) is configuration with documented defaults, loaded from a TOML
//! file. Secret material is never stored in the file itself: the vault
//! section names an environment variable holding the base64-encoded master
//! key.

use crate::orchestrator::RetryPolicy;
use crate::vault::crypto::MASTER_KEY_LEN;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

/// Dispatch tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Total attempts for a transient-failing external call (default: 3)
    #[serde(default = "default_max_submit_retries")]
    pub max_submit_retries: u32,
    /// First backoff delay; doubles per retry (default: 500 ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff cap (default: 30 s)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Concurrently in-flight dispatches system-wide (default: 8)
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Timeout around every external call (default: 30 s)
    #[serde(default = "default_external_call_timeout_secs")]
    pub external_call_timeout_secs: u64,
}

fn default_max_submit_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_external_call_timeout_secs() -> u64 {
    30
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_submit_retries: default_max_submit_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            worker_pool_size: default_worker_pool_size(),
            external_call_timeout_secs: default_external_call_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_submit_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.max_submit_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_submit_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultConfig {
    /// Environment variable holding the base64-encoded 32-byte master key
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

fn default_master_key_env() -> String {
    "DEMARCHE_VAULT_MASTER_KEY".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key_env: default_master_key_env(),
        }
    }
}

impl VaultConfig {
    /// Resolve the master key from the environment at runtime. The key never
    /// appears in the config file or in error messages.
    pub fn master_key(&self) -> Result<[u8; MASTER_KEY_LEN], ConfigError> {
        let encoded = std::env::var(&self.master_key_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.master_key_env.clone()))?;

        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|_| ConfigError::InvalidKeyMaterial(self.master_key_env.clone()))?;

        decoded
            .try_into()
            .map_err(|_| ConfigError::InvalidKeyMaterial(self.master_key_env.clone()))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Environment variable {0} does not hold a base64-encoded 32-byte key")]
    InvalidKeyMaterial(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.dispatch.validate()?;
        Ok(config)
    }
}
