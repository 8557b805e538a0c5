// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Neurite
//!
//! Deterministic per-cycle compute engine for rate-coded spiking networks
//! with calcium-trace learning.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use neurite::prelude::*;
//!
//! let mut b = NetworkBuilder::new("demo");
//! b.add_layer("input", LayerKind::Input, 25);
//! b.add_layer("hidden", LayerKind::Super, 100);
//! b.add_layer("output", LayerKind::Target, 10);
//! b.connect_full("input", "hidden", PathParams::excitatory());
//! b.connect_full("hidden", "output", PathParams::excitatory());
//! b.connect_full("output", "hidden", PathParams::excitatory()).scale.rel = 0.2;
//! let mut net = b.build()?;
//!
//! let ctx = Context::new(1, 200, 50, 100, 1);
//! let mut sched = CycleScheduler::with_cpu(&net, ctx, WorkPartitioner::sequential())?;
//! net.apply_ext("input", 0, &[1.0; 25])?;
//! net.apply_ext("output", 0, &[0.0; 10])?;
//! let trial = sched.run_trial(&mut net)?;
//! println!("trial {} took {:.0}us", trial.trial, trial.elapsed_us);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! With a `neurite_configuration.toml`, [`setup::scheduler`] builds the
//! backend, partitioner and context from the file.
//!
//! ## Feature Flags
//! - **`gpu`**: WGPU backend for spike routing
//! - **`file-logging`**: per-run log files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  neurite-npu-neural                                     │
//! │  (parameters, channels, update equations)               │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  neurite-npu-runtime                                    │
//! │  (index tables, strides, structure-of-arrays state)     │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  neurite-npu-cycle-engine                               │
//! │  (phases, learning, partitioning, backends, scheduler)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use neurite_config as config;
pub use neurite_npu_cycle_engine as cycle_engine;
pub use neurite_npu_neural as neural;
pub use neurite_npu_runtime as runtime;
pub use neurite_observability as observability;

pub mod setup;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, validate_config, NeuriteConfig};
    pub use crate::cycle_engine::{
        load_weights, save_weights, Context, CycleScheduler, LayerKind, Network, NetworkBuilder,
        PartitionMode, PathParams, PathType, SignalsHandle, TrialResult, WorkPartitioner,
    };
    pub use crate::neural::{NeuronVar, SynapseVar};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_facade_imports() {
        let mut b = NetworkBuilder::new("facade");
        b.add_layer("a", LayerKind::Input, 2);
        b.add_layer("b", LayerKind::Super, 2);
        b.connect_full("a", "b", PathParams::excitatory());
        let net = b.build().unwrap();
        assert_eq!(net.n_neurons(), 4);
        assert_eq!(net.n_synapses(), 4);
        assert!(!crate::VERSION.is_empty());
    }
}
