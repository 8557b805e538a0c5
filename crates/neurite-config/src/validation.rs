// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Collects every problem before failing so a bad file is fixed in one pass.

use crate::{ConfigError, ConfigResult, NeuriteConfig};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    OutOfRange { field: String, value: String, range: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { field, value, range } => {
                write!(f, "{} = {} is outside valid range {}", field, value, range)
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
/// Returns `ConfigError::ValidationError` listing every failed check
pub fn validate_config(config: &NeuriteConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();
    validate_engine(config, &mut errors);
    validate_compute(config, &mut errors);
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

fn out_of_range(field: &str, value: impl ToString, range: &str) -> ConfigValidationError {
    ConfigValidationError::OutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        range: range.to_string(),
    }
}

fn validate_engine(config: &NeuriteConfig, errors: &mut Vec<ConfigValidationError>) {
    let e = &config.engine;
    if e.ndata == 0 {
        errors.push(out_of_range("engine.ndata", e.ndata, ">= 1"));
    }
    if e.theta_cycles < 2 {
        errors.push(out_of_range("engine.theta_cycles", e.theta_cycles, ">= 2"));
    }
    if e.plus_cycles < 1 || e.plus_cycles >= e.theta_cycles {
        errors.push(out_of_range(
            "engine.plus_cycles",
            e.plus_cycles,
            &format!("[1, {})", e.theta_cycles),
        ));
    }
    if e.slow_interval < 1 {
        errors.push(out_of_range("engine.slow_interval", e.slow_interval, ">= 1"));
    }
}

fn validate_compute(config: &NeuriteConfig, errors: &mut Vec<ConfigValidationError>) {
    let c = &config.compute;
    if c.chunk_size == 0 {
        errors.push(out_of_range("compute.chunk_size", c.chunk_size, ">= 1"));
    }
    if c.gpu_neuron_threshold == 0 {
        errors.push(out_of_range("compute.gpu_neuron_threshold", c.gpu_neuron_threshold, ">= 1"));
    }
    if c.gpu_synapse_threshold == 0 {
        errors.push(out_of_range("compute.gpu_synapse_threshold", c.gpu_synapse_threshold, ">= 1"));
    }
}

fn validate_logging(config: &NeuriteConfig, errors: &mut Vec<ConfigValidationError>) {
    let l = &config.logging;
    if !LOG_LEVELS.contains(&l.level.to_lowercase().as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("'{}' is not one of {}", l.level, LOG_LEVELS.join(", ")),
        });
    }
    if l.file && l.dir.as_os_str().is_empty() {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.dir".to_string(),
            reason: "required when logging.file is on".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&NeuriteConfig::default()).is_ok());
    }

    #[test]
    fn test_plus_cycles_must_fit_in_theta() {
        let mut config = NeuriteConfig::default();
        config.engine.plus_cycles = config.engine.theta_cycles;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("engine.plus_cycles"));
    }

    #[test]
    fn test_all_errors_reported() {
        let mut config = NeuriteConfig::default();
        config.engine.ndata = 0;
        config.compute.chunk_size = 0;
        config.logging.level = "loud".to_string();
        let err = validate_config(&config).unwrap_err();
        let ConfigError::ValidationError(msg) = err else {
            panic!("expected a validation error");
        };
        assert!(msg.contains("engine.ndata"));
        assert!(msg.contains("compute.chunk_size"));
        assert!(msg.contains("logging.level"));
    }

    #[test]
    fn test_file_logging_needs_dir() {
        let mut config = NeuriteConfig::default();
        config.logging.file = true;
        config.logging.dir = std::path::PathBuf::new();
        assert!(validate_config(&config).is_err());
    }
}
