// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! Each struct maps to a section of `trial_sdk.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrialSdkConfig {
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Session engine configuration
///
/// A queue capacity of `0` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub incoming_queue_capacity: usize,
    pub outgoing_queue_capacity: usize,
    pub produced_queue_capacity: usize,
    /// Acknowledge the end of the trial on the participant's behalf unless
    /// `start()` says otherwise
    pub default_auto_ack: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            incoming_queue_capacity: 0,
            outgoing_queue_capacity: 0,
            produced_queue_capacity: 0,
            default_auto_ack: true,
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
    /// Also write daily-rotated logs to this file (requires the `file-logging` feature)
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file_path: None,
        }
    }
}
