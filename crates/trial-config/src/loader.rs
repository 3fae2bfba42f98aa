// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{validate_config, ConfigError, ConfigResult, LogFormat, TrialSdkConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "trial_sdk.toml";

/// Find the configuration file
///
/// Search order:
/// 1. `TRIAL_SDK_CONFIG_PATH` environment variable
/// 2. Current working directory: `./trial_sdk.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("TRIAL_SDK_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by TRIAL_SDK_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet TRIAL_SDK_CONFIG_PATH to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found, contains invalid TOML, or fails validation
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<TrialSdkConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: TrialSdkConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    validate_config(&config)?;
    Ok(config)
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `TRIAL_SDK_INCOMING_QUEUE_CAPACITY` -> `session.incoming_queue_capacity`
/// - `TRIAL_SDK_OUTGOING_QUEUE_CAPACITY` -> `session.outgoing_queue_capacity`
/// - `TRIAL_SDK_PRODUCED_QUEUE_CAPACITY` -> `session.produced_queue_capacity`
/// - `TRIAL_SDK_AUTO_ACK` -> `session.default_auto_ack`
/// - `TRIAL_SDK_LOG_LEVEL` -> `logging.level`
/// - `TRIAL_SDK_LOG_FORMAT` -> `logging.format`
pub fn apply_environment_overrides(config: &mut TrialSdkConfig) {
    if let Ok(value) = env::var("TRIAL_SDK_INCOMING_QUEUE_CAPACITY") {
        if let Ok(capacity) = value.parse::<usize>() {
            config.session.incoming_queue_capacity = capacity;
        }
    }
    if let Ok(value) = env::var("TRIAL_SDK_OUTGOING_QUEUE_CAPACITY") {
        if let Ok(capacity) = value.parse::<usize>() {
            config.session.outgoing_queue_capacity = capacity;
        }
    }
    if let Ok(value) = env::var("TRIAL_SDK_PRODUCED_QUEUE_CAPACITY") {
        if let Ok(capacity) = value.parse::<usize>() {
            config.session.produced_queue_capacity = capacity;
        }
    }
    if let Ok(value) = env::var("TRIAL_SDK_AUTO_ACK") {
        config.session.default_auto_ack = parse_bool(&value);
    }

    if let Ok(value) = env::var("TRIAL_SDK_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = env::var("TRIAL_SDK_LOG_FORMAT") {
        if let Ok(format) = value.parse::<LogFormat>() {
            config.logging.format = format;
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"log_level": "debug", "auto_ack": "false"}`)
pub fn apply_cli_overrides(config: &mut TrialSdkConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("incoming_queue_capacity") {
        if let Ok(capacity) = value.parse::<usize>() {
            config.session.incoming_queue_capacity = capacity;
        }
    }
    if let Some(value) = cli_args.get("outgoing_queue_capacity") {
        if let Ok(capacity) = value.parse::<usize>() {
            config.session.outgoing_queue_capacity = capacity;
        }
    }
    if let Some(value) = cli_args.get("produced_queue_capacity") {
        if let Ok(capacity) = value.parse::<usize>() {
            config.session.produced_queue_capacity = capacity;
        }
    }
    if let Some(value) = cli_args.get("auto_ack") {
        config.session.default_auto_ack = parse_bool(value);
    }

    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
    if let Some(value) = cli_args.get("log_format") {
        if let Ok(format) = value.parse::<LogFormat>() {
            config.logging.format = format;
        }
    }
    if let Some(value) = cli_args.get("log_file") {
        config.logging.file_path = Some(PathBuf::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("TRIAL_SDK_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("TRIAL_SDK_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_missing_env_path_is_reported() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("TRIAL_SDK_CONFIG_PATH", "/nonexistent/trial_sdk.toml");
        let result = find_config_file();
        env::remove_var("TRIAL_SDK_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[session]").unwrap();
        writeln!(file, "incoming_queue_capacity = 64").unwrap();
        writeln!(file, "default_auto_ack = false").unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "format = \"json\"").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.session.incoming_queue_capacity, 64);
        assert_eq!(config.session.outgoing_queue_capacity, 0);
        assert!(!config.session.default_auto_ack);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[session\nincoming_queue_capacity = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = TrialSdkConfig::default();

        env::set_var("TRIAL_SDK_OUTGOING_QUEUE_CAPACITY", "128");
        env::set_var("TRIAL_SDK_AUTO_ACK", "no");
        env::set_var("TRIAL_SDK_LOG_LEVEL", "debug");

        apply_environment_overrides(&mut config);

        env::remove_var("TRIAL_SDK_OUTGOING_QUEUE_CAPACITY");
        env::remove_var("TRIAL_SDK_AUTO_ACK");
        env::remove_var("TRIAL_SDK_LOG_LEVEL");

        assert_eq!(config.session.outgoing_queue_capacity, 128);
        assert!(!config.session.default_auto_ack);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = TrialSdkConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("produced_queue_capacity".to_string(), "16".to_string());
        cli_args.insert("log_format".to_string(), "json".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert_eq!(config.session.produced_queue_capacity, 16);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[logging]").unwrap();
        writeln!(file, "level = \"warn\"").unwrap();
        writeln!(file, "[session]").unwrap();
        writeln!(file, "incoming_queue_capacity = 8").unwrap();

        env::set_var("TRIAL_SDK_LOG_LEVEL", "error");
        env::set_var("TRIAL_SDK_INCOMING_QUEUE_CAPACITY", "32");

        let mut cli_args = HashMap::new();
        cli_args.insert("log_level".to_string(), "trace".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("TRIAL_SDK_LOG_LEVEL");
        env::remove_var("TRIAL_SDK_INCOMING_QUEUE_CAPACITY");

        // CLI wins for the level, env wins for the capacity (no CLI override)
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.session.incoming_queue_capacity, 32);
    }
}
