// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Ensures configuration values are within valid ranges and consistent with
//! each other.

use crate::{ConfigError, ConfigResult, TrialSdkConfig};

/// Largest bounded queue capacity accepted
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    QueueCapacityTooLarge { queue: String, capacity: usize },
    InvalidLogLevel { level: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueCapacityTooLarge { queue, capacity } => {
                write!(
                    f,
                    "{} = {} exceeds the maximum of {} (use 0 for unbounded)",
                    queue, capacity, MAX_QUEUE_CAPACITY
                )
            }
            Self::InvalidLogLevel { level } => {
                write!(
                    f,
                    "logging.level = '{}' is not one of {}",
                    level,
                    LOG_LEVELS.join(", ")
                )
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` with details if validation fails
pub fn validate_config(config: &TrialSdkConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_queue_capacities(config, &mut errors);
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_queue_capacities(config: &TrialSdkConfig, errors: &mut Vec<ConfigValidationError>) {
    let session = &config.session;
    let queues = [
        ("session.incoming_queue_capacity", session.incoming_queue_capacity),
        ("session.outgoing_queue_capacity", session.outgoing_queue_capacity),
        ("session.produced_queue_capacity", session.produced_queue_capacity),
    ];
    for (queue, capacity) in queues {
        if capacity > MAX_QUEUE_CAPACITY {
            errors.push(ConfigValidationError::QueueCapacityTooLarge {
                queue: queue.to_string(),
                capacity,
            });
        }
    }
}

fn validate_logging(config: &TrialSdkConfig, errors: &mut Vec<ConfigValidationError>) {
    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigValidationError::InvalidLogLevel {
            level: config.logging.level.clone(),
        });
    }

    if let Some(path) = &config.logging.file_path {
        if path.file_name().is_none() {
            errors.push(ConfigValidationError::InvalidValue {
                field: "logging.file_path".to_string(),
                reason: format!("'{}' does not name a file", path.display()),
            });
        }
    }
}
