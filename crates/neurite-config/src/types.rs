// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! Each struct maps to a section of `neurite_configuration.toml`. Every
//! field has a default, so a partial file (or none) is valid input.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NeuriteConfig {
    pub engine: EngineConfig,
    pub compute: ComputeConfig,
    pub logging: LoggingConfig,
}

/// Trial timing, data replicas and the random seed
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Independent input replicas processed in lock step
    pub ndata: u32,
    /// Cycles per trial (minus + plus phase)
    pub theta_cycles: i32,
    pub plus_cycles: i32,
    /// Trials between slow adaptation passes
    pub slow_interval: i32,
    pub seed: u64,
    /// Run DWt / WtFromDWt at the end of each trial
    pub learning: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ndata: 1,
            theta_cycles: 200,
            plus_cycles: 50,
            slow_interval: 100,
            seed: 1,
            learning: true,
        }
    }
}

/// Compute backend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Wgpu,
    #[default]
    Auto,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Wgpu => write!(f, "wgpu"),
            BackendKind::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = crate::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "wgpu" | "gpu" => Ok(BackendKind::Wgpu),
            "auto" => Ok(BackendKind::Auto),
            _ => Err(crate::ConfigError::InvalidValue(format!(
                "compute.backend: unknown backend '{}'",
                s
            ))),
        }
    }
}

/// How host-side work is split across threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Sequential,
    #[default]
    Rayon,
    Atomic,
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKind::Sequential => write!(f, "sequential"),
            PartitionKind::Rayon => write!(f, "rayon"),
            PartitionKind::Atomic => write!(f, "atomic"),
        }
    }
}

impl std::str::FromStr for PartitionKind {
    type Err = crate::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(PartitionKind::Sequential),
            "rayon" => Ok(PartitionKind::Rayon),
            "atomic" => Ok(PartitionKind::Atomic),
            _ => Err(crate::ConfigError::InvalidValue(format!(
                "compute.partition: unknown mode '{}'",
                s
            ))),
        }
    }
}

/// Backend, threading and GPU selection thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub backend: BackendKind,
    /// Worker threads (0 = all cores)
    pub threads: usize,
    pub partition: PartitionKind,
    /// Entities per work chunk
    pub chunk_size: usize,
    /// Auto-select the GPU at or above this many neurons x replicas
    pub gpu_neuron_threshold: usize,
    /// Auto-select the GPU at or above this many synapses
    pub gpu_synapse_threshold: usize,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            threads: 0,
            partition: PartitionKind::Rayon,
            chunk_size: 64,
            gpu_neuron_threshold: 200_000,
            gpu_synapse_threshold: 20_000_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`
    pub level: String,
    /// Also write logs to files under `dir`
    pub file: bool,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
            dir: PathBuf::from("logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: NeuriteConfig = toml::from_str(
            r#"
            [engine]
            ndata = 4

            [compute]
            backend = "cpu"
            partition = "atomic"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.ndata, 4);
        assert_eq!(config.engine.theta_cycles, 200);
        assert_eq!(config.compute.backend, BackendKind::Cpu);
        assert_eq!(config.compute.partition, PartitionKind::Atomic);
        assert_eq!(config.compute.chunk_size, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("GPU".parse::<BackendKind>().unwrap(), BackendKind::Wgpu);
        assert_eq!("seq".parse::<PartitionKind>().unwrap(), PartitionKind::Sequential);
        assert!("tpu".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(NeuriteConfig::default()).unwrap();
        assert_eq!(json["compute"]["backend"], "auto");
        assert_eq!(json["compute"]["partition"], "rayon");
    }
}
