// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Compute Backend Abstraction
//!
//! The scheduler drives every per-cycle and per-trial phase through a
//! [`ComputeBackend`]. Each phase has a default body that runs the shared
//! kernel functions on the backend's [`WorkPartitioner`]; a backend only
//! overrides the phases it moves to other hardware.
//!
//! All backends produce bit-identical state: phase order is fixed, every
//! index writes only its own storage, and ring-buffer accumulation is
//! integer addition.

mod cpu;
#[cfg(feature = "gpu")]
mod wgpu_backend;

pub use cpu::CPUBackend;
#[cfg(feature = "gpu")]
pub use wgpu_backend::WGPUBackend;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::network::NetRef;
use crate::partition::WorkPartitioner;
use crate::{activation, conductance_router, inhibition_pool, learning};
use neurite_npu_runtime::StateStore;
use tracing::info;

/// Per-phase timing of one cycle (microseconds)
#[derive(Debug, Clone, Default)]
pub struct CycleTiming {
    pub gather_us: f64,
    pub inhibition_us: f64,
    pub activation_us: f64,
    pub send_us: f64,
    pub synapse_ca_us: f64,
    pub total_us: f64,
}

/// Compute backend trait (CPU, GPU)
pub trait ComputeBackend: Send {
    /// Backend name for logging
    fn backend_name(&self) -> &str;

    /// Partitioner used for the phases that run on the host
    fn partitioner(&self) -> &WorkPartitioner;

    /// Upload structure and weights. CPU backends have nothing to do.
    fn initialize_persistent_data(&mut self, _net: NetRef<'_>, _store: &StateStore) -> Result<()> {
        Ok(())
    }

    /// Drain this cycle's ring-buffer slots into per-neuron conductances
    fn gather_spikes(&mut self, net: NetRef<'_>, store: &mut StateStore, ctx: &Context) -> Result<()> {
        conductance_router::gather_spikes(net, store, ctx, self.partitioner());
        Ok(())
    }

    fn pool_inhibition(&mut self, net: NetRef<'_>, store: &mut StateStore, _ctx: &Context) -> Result<()> {
        inhibition_pool::pool_inhibition(net, store, self.partitioner());
        Ok(())
    }

    fn cycle_neurons(&mut self, net: NetRef<'_>, store: &mut StateStore, ctx: &Context) -> Result<()> {
        activation::cycle_neurons(net, store, ctx, self.partitioner());
        Ok(())
    }

    /// Enqueue this cycle's spikes into the ring buffers
    fn send_spikes(&mut self, net: NetRef<'_>, store: &StateStore, ctx: &Context) -> Result<()> {
        conductance_router::send_spikes(net, store, ctx, self.partitioner());
        Ok(())
    }

    fn synapse_ca(&mut self, net: NetRef<'_>, store: &mut StateStore, ctx: &Context) -> Result<()> {
        learning::synapse_ca(net, store, ctx, self.partitioner());
        Ok(())
    }

    fn dwt(&mut self, net: NetRef<'_>, store: &mut StateStore, ctx: &Context) -> Result<()> {
        learning::dwt(net, store, ctx, self.partitioner());
        Ok(())
    }

    fn wt_from_dwt(&mut self, net: NetRef<'_>, store: &mut StateStore) -> Result<()> {
        learning::wt_from_dwt(net, store, self.partitioner());
        Ok(())
    }

    /// Called after the host store cleared its conductance buffers
    fn reset_conductances(&mut self) -> Result<()> {
        Ok(())
    }

    /// Weights were changed outside `wt_from_dwt` (load, failure, slow adaptation)
    fn on_weights_changed(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backend type enum for construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Multi-threaded CPU
    CPU,

    /// GPU via WGPU (Metal/Vulkan/DirectX)
    #[cfg(feature = "gpu")]
    WGPU,

    /// Pick by network size and hardware availability
    #[default]
    Auto,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::CPU => write!(f, "CPU"),
            #[cfg(feature = "gpu")]
            BackendType::WGPU => write!(f, "WGPU"),
            BackendType::Auto => write!(f, "Auto"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendType::CPU),
            #[cfg(feature = "gpu")]
            "wgpu" | "gpu" => Ok(BackendType::WGPU),
            "auto" => Ok(BackendType::Auto),
            _ => Err(Error::InvalidBackend(s.to_string())),
        }
    }
}

/// Size thresholds and overrides for [`select_backend`]
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Neuron-replicas at which the GPU is considered
    pub gpu_neuron_threshold: usize,
    /// Synapses at which the GPU is considered
    pub gpu_synapse_threshold: usize,
    pub force_cpu: bool,
    pub force_gpu: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            gpu_neuron_threshold: 200_000,
            gpu_synapse_threshold: 20_000_000,
            force_cpu: false,
            force_gpu: false,
        }
    }
}

/// Outcome of [`select_backend`]
#[derive(Debug, Clone)]
pub struct BackendDecision {
    pub backend_type: BackendType,
    pub reason: String,
    /// Modeled cycle-time ratio CPU / chosen backend
    pub estimated_speedup: f32,
}

impl BackendDecision {
    fn cpu(reason: impl Into<String>) -> Self {
        Self {
            backend_type: BackendType::CPU,
            reason: reason.into(),
            estimated_speedup: 1.0,
        }
    }
}

/// Pick a backend for `neuron_count` neuron-replicas and `synapse_count`
/// synapses. Force flags win (`force_cpu` first); otherwise the GPU needs
/// the `gpu` feature, an adapter, one threshold met and a modeled speedup
/// above 1.5.
pub fn select_backend(neuron_count: usize, synapse_count: usize, config: &BackendConfig) -> BackendDecision {
    if config.force_cpu {
        return BackendDecision::cpu("force_cpu set");
    }
    let large =
        neuron_count >= config.gpu_neuron_threshold || synapse_count >= config.gpu_synapse_threshold;

    #[cfg(feature = "gpu")]
    if config.force_gpu || large {
        if !is_gpu_available() {
            if config.force_gpu {
                tracing::warn!("[WGPU-BACKEND] force_gpu set but no adapter found");
            }
            return BackendDecision::cpu("no GPU adapter");
        }
        let speedup = estimate_gpu_speedup(neuron_count, synapse_count);
        if config.force_gpu || speedup > 1.5 {
            return BackendDecision {
                backend_type: BackendType::WGPU,
                reason: if config.force_gpu {
                    "force_gpu set".to_string()
                } else {
                    format!("{} neuron-replicas, {} synapses", neuron_count, synapse_count)
                },
                estimated_speedup: speedup,
            };
        }
    }

    if large {
        BackendDecision::cpu(format!(
            "{} neuron-replicas, {} synapses; GPU unavailable or not faster",
            neuron_count, synapse_count
        ))
    } else {
        BackendDecision::cpu(format!(
            "{} neuron-replicas, {} synapses below GPU thresholds",
            neuron_count, synapse_count
        ))
    }
}

/// Check if a GPU adapter can be obtained
#[cfg(feature = "gpu")]
pub fn is_gpu_available() -> bool {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .is_some()
}

/// Estimate the speedup of moving spike routing to the GPU
///
/// Only gather and send run on the device; the remaining phases stay on
/// the host, so the per-cycle transfer (sender values up, drained slots
/// down) bounds the gain.
#[cfg(feature = "gpu")]
pub fn estimate_gpu_speedup(neuron_count: usize, synapse_count: usize) -> f32 {
    let neurons = neuron_count as f32;
    let synapses = synapse_count as f32;

    // spike + CaSpkP up, drained conductance down, per neuron
    let transfer_bytes = neurons * 8.0 + neurons * 4.0;
    let transfer_bandwidth_gbs = 25.0;
    let transfer_us = (transfer_bytes / (transfer_bandwidth_gbs * 1_000_000_000.0)) * 1_000_000.0 + 150.0;

    // ~6 ops per synapse route, ~200 ops per neuron update
    let cpu_flops = 100_000_000_000.0;
    let cpu_route_us = (synapses * 6.0) / (cpu_flops / 1_000_000.0);
    let cpu_neural_us = (neurons * 200.0) / (cpu_flops / 1_000_000.0);

    let gpu_flops = 10_000_000_000_000.0;
    let gpu_route_us = (synapses * 6.0) / (gpu_flops / 1_000_000.0);

    let speedup = (cpu_route_us + cpu_neural_us) / (transfer_us + gpu_route_us + cpu_neural_us);
    speedup.clamp(0.1, 100.0)
}

/// Build the backend for `backend_type`, resolving `Auto` by network size
pub fn create_backend(
    backend_type: BackendType,
    net: NetRef<'_>,
    store: &StateStore,
    config: &BackendConfig,
    partitioner: WorkPartitioner,
) -> Result<Box<dyn ComputeBackend>> {
    let actual = if backend_type == BackendType::Auto {
        let decision = select_backend(
            net.topology.n_neurons() * store.ndata(),
            net.topology.n_synapses(),
            config,
        );
        info!(
            "[CYCLE-SCHED] Backend auto-selection: {} ({})",
            decision.backend_type, decision.reason
        );
        decision.backend_type
    } else {
        backend_type
    };

    let mut backend: Box<dyn ComputeBackend> = match actual {
        #[cfg(feature = "gpu")]
        BackendType::WGPU => match WGPUBackend::new(partitioner.clone()) {
            Ok(b) => Box::new(b),
            Err(e) => {
                tracing::warn!("[WGPU-BACKEND] {}; using CPU backend", e);
                Box::new(CPUBackend::new(partitioner))
            }
        },
        _ => Box::new(CPUBackend::new(partitioner)),
    };
    backend.initialize_persistent_data(net, store)?;
    info!("[CYCLE-SCHED] Using {} backend", backend.backend_name());
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parse_and_display() {
        assert_eq!("cpu".parse::<BackendType>().unwrap(), BackendType::CPU);
        assert_eq!("AUTO".parse::<BackendType>().unwrap(), BackendType::Auto);
        assert!("tpu".parse::<BackendType>().is_err());
        assert_eq!(BackendType::CPU.to_string(), "CPU");
        assert_eq!(BackendType::default(), BackendType::Auto);
    }

    #[test]
    fn test_force_cpu() {
        let config = BackendConfig {
            force_cpu: true,
            force_gpu: true,
            ..Default::default()
        };
        let d = select_backend(10_000_000, 1_000_000_000, &config);
        assert_eq!(d.backend_type, BackendType::CPU);
        assert_eq!(d.estimated_speedup, 1.0);
    }

    #[test]
    fn test_small_network_stays_on_cpu() {
        let d = select_backend(100, 1_000, &BackendConfig::default());
        assert_eq!(d.backend_type, BackendType::CPU);
        assert!(d.reason.contains("below GPU thresholds"));
    }
}
