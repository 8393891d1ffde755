// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration, with loading from environment variables.

use std::time::Duration;

/// Default step retry schedule in milliseconds.
pub const DEFAULT_RETRY_INTERVALS_MS: [u64; 10] =
    [100, 250, 500, 1000, 2000, 4000, 8000, 15000, 15000, 15000];

/// Steadfast engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retry schedule for steps that do not give their own
    pub default_retry_intervals: Vec<Duration>,
    /// Log a summary of every attempt
    pub log_results: bool,
    /// Return final save failures to the caller instead of only logging them
    pub propagate_final_save_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retry_intervals: DEFAULT_RETRY_INTERVALS_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            log_results: true,
            propagate_final_save_errors: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `STEADFAST_RETRY_INTERVALS_MS`: comma-separated retry schedule
    ///   (default: 100,250,500,1000,2000,4000,8000,15000,15000,15000)
    /// - `STEADFAST_LOG_RESULTS`: log a summary of every attempt (default: true)
    /// - `STEADFAST_PROPAGATE_SAVE_ERRORS`: surface final save failures (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_retry_intervals = match std::env::var("STEADFAST_RETRY_INTERVALS_MS") {
            Ok(raw) => parse_intervals(&raw).ok_or(ConfigError::Invalid(
                "STEADFAST_RETRY_INTERVALS_MS",
                "must be a comma-separated list of milliseconds",
            ))?,
            Err(_) => defaults.default_retry_intervals,
        };

        let log_results = match std::env::var("STEADFAST_LOG_RESULTS") {
            Ok(raw) => parse_bool(&raw)
                .ok_or(ConfigError::Invalid("STEADFAST_LOG_RESULTS", "must be true or false"))?,
            Err(_) => defaults.log_results,
        };

        let propagate_final_save_errors = match std::env::var("STEADFAST_PROPAGATE_SAVE_ERRORS") {
            Ok(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid(
                "STEADFAST_PROPAGATE_SAVE_ERRORS",
                "must be true or false",
            ))?,
            Err(_) => defaults.propagate_final_save_errors,
        };

        Ok(Self {
            default_retry_intervals,
            log_results,
            propagate_final_save_errors,
        })
    }

    /// Set the default retry schedule.
    pub fn with_default_retry_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.default_retry_intervals = intervals;
        self
    }

    /// Turn per-attempt summary logging on or off.
    pub fn with_log_results(mut self, enabled: bool) -> Self {
        self.log_results = enabled;
        self
    }

    /// Return final save failures to the caller.
    pub fn with_propagate_final_save_errors(mut self, enabled: bool) -> Self {
        self.propagate_final_save_errors = enabled;
        self
    }
}

fn parse_intervals(raw: &str) -> Option<Vec<Duration>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Vec::new());
    }
    raw.split(',')
        .map(|part| part.trim().parse::<u64>().ok().map(Duration::from_millis))
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
