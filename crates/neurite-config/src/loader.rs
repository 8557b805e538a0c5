// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Three tiers, later ones win:
//! 1. TOML file (base values; missing keys take defaults)
//! 2. Environment variables
//! 3. CLI arguments (`section.key=value`)

use crate::{ConfigError, ConfigResult, NeuriteConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CONFIG_FILE_NAME: &str = "neurite_configuration.toml";

/// Find the configuration file
///
/// Search order:
/// 1. `NEURITE_CONFIG_PATH` environment variable
/// 2. Current working directory
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("NEURITE_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by NEURITE_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet NEURITE_CONFIG_PATH to specify a custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file and apply overrides
///
/// * `config_path` - explicit file; `None` searches with [`find_config_file`]
/// * `cli_args` - `section.key` -> value overrides
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<NeuriteConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };
    let content = fs::read_to_string(&config_file)?;
    let mut config: NeuriteConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config)?;
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }
    Ok(config)
}

fn parse<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!("{} = '{}'", key, value))),
    }
}

/// Set one dotted key. Unknown keys are an error.
fn set_key(config: &mut NeuriteConfig, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "engine.ndata" => config.engine.ndata = parse(key, value)?,
        "engine.theta_cycles" => config.engine.theta_cycles = parse(key, value)?,
        "engine.plus_cycles" => config.engine.plus_cycles = parse(key, value)?,
        "engine.slow_interval" => config.engine.slow_interval = parse(key, value)?,
        "engine.seed" => config.engine.seed = parse(key, value)?,
        "engine.learning" => config.engine.learning = parse_bool(key, value)?,
        "compute.backend" => config.compute.backend = value.parse()?,
        "compute.threads" => config.compute.threads = parse(key, value)?,
        "compute.partition" => config.compute.partition = value.parse()?,
        "compute.chunk_size" => config.compute.chunk_size = parse(key, value)?,
        "compute.gpu_neuron_threshold" => config.compute.gpu_neuron_threshold = parse(key, value)?,
        "compute.gpu_synapse_threshold" => config.compute.gpu_synapse_threshold = parse(key, value)?,
        "logging.level" => config.logging.level = value.to_string(),
        "logging.file" => config.logging.file = parse_bool(key, value)?,
        "logging.dir" => config.logging.dir = PathBuf::from(value),
        _ => {
            return Err(ConfigError::InvalidValue(format!(
                "unknown configuration key '{}'",
                key
            )))
        }
    }
    Ok(())
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `NEURITE_THREADS` -> `compute.threads`
/// - `NEURITE_BACKEND` -> `compute.backend`
/// - `NEURITE_NDATA` -> `engine.ndata`
/// - `NEURITE_SEED` -> `engine.seed`
/// - `NEURITE_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut NeuriteConfig) -> ConfigResult<()> {
    const ENV_KEYS: [(&str, &str); 5] = [
        ("NEURITE_THREADS", "compute.threads"),
        ("NEURITE_BACKEND", "compute.backend"),
        ("NEURITE_NDATA", "engine.ndata"),
        ("NEURITE_SEED", "engine.seed"),
        ("NEURITE_LOG_LEVEL", "logging.level"),
    ];
    for (var, key) in ENV_KEYS {
        if let Ok(value) = env::var(var) {
            set_key(config, key, &value)?;
        }
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// Keys are dotted paths, e.g. `{"compute.threads": "4"}`.
pub fn apply_cli_overrides(
    config: &mut NeuriteConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    // sorted so the first reported error does not depend on hash order
    let mut keys: Vec<&String> = cli_args.keys().collect();
    keys.sort();
    for key in keys {
        set_key(config, key, &cli_args[key])?;
    }
    Ok(())
}

/// Collect `section.key=value` arguments; other arguments are ignored
pub fn parse_cli_overrides<S: AsRef<str>>(args: &[S]) -> ConfigResult<HashMap<String, String>> {
    let mut out = HashMap::new();
    for arg in args {
        let arg = arg.as_ref();
        let Some((key, value)) = arg.split_once('=') else {
            continue;
        };
        let key = key.trim_start_matches("--").trim();
        if !key.contains('.') {
            continue;
        }
        if value.is_empty() {
            return Err(ConfigError::InvalidValue(format!("empty value for '{}'", key)));
        }
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}
