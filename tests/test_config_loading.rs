//! Configuration file loading tests.

use demarche::config::{ConfigError, EngineConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_load_full_config_from_file() {
    let file = write_config(
        r#"
[dispatch]
max_submit_retries = 4
retry_base_delay_ms = 250
retry_max_delay_ms = 10000
worker_pool_size = 16
external_call_timeout_secs = 20

[vault]
master_key_env = "PROD_VAULT_KEY"
"#,
    );

    let config = EngineConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.dispatch.max_submit_retries, 4);
    assert_eq!(config.dispatch.retry_base_delay_ms, 250);
    assert_eq!(config.dispatch.worker_pool_size, 16);
    assert_eq!(config.vault.master_key_env, "PROD_VAULT_KEY");
}

#[test]
fn test_load_empty_file_yields_defaults() {
    let file = write_config("");

    let config = EngineConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.dispatch.worker_pool_size, 8);
}

#[test]
fn test_load_rejects_invalid_toml() {
    let file = write_config("[dispatch\nmax_submit_retries = ");

    let result = EngineConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_load_rejects_zero_worker_pool() {
    let file = write_config(
        r#"
[dispatch]
worker_pool_size = 0
"#,
    );

    let result = EngineConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_load_missing_file() {
    let result = EngineConfig::load_from_file(std::path::Path::new("/nonexistent/engine.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
