// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # Neurite Cycle Engine
//!
//! Per-cycle compute for rate-coded spiking networks.
//!
//! ## Phases
//! Each cycle runs as a sequence of barriers over flat state:
//! gather spikes, pool inhibition, neuron activation, send spikes and
//! (when learning) synaptic calcium. Trials wrap cycles with NewState,
//! MinusPhase, PlusPhaseStart, PlusPhase, DWt and WtFromDWt.
//!
//! ## Determinism
//! Every neuron and synapse update is a pure function of the previous
//! barrier's state plus a counter-based random stream. Conductance sums go
//! through fixed-point atomics, so results are bit-identical whatever the
//! [`PartitionMode`] or thread count.
//!
//! ## Backends
//! - [`CPUBackend`]: sequential, Rayon or atomic-cursor partitioning
//! - `WGPUBackend` (feature `gpu`): spike routing on the device

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod activation;
pub mod backend;
pub mod conductance_router;
pub mod context;
pub mod error;
pub mod inhibition_pool;
pub mod layer;
pub mod learning;
pub mod network;
pub mod partition;
pub mod path;
pub mod scheduler;
pub mod weights;

pub use backend::{
    create_backend, select_backend, BackendConfig, BackendDecision, BackendType, CPUBackend,
    ComputeBackend, CycleTiming,
};
#[cfg(feature = "gpu")]
pub use backend::{is_gpu_available, WGPUBackend};
pub use context::{Context, GlobalSignals, SignalsHandle};
pub use error::{Error, Result};
pub use layer::{Layer, LayerActAvg, LayerKind, LayerParams, LayerValues};
pub use network::{Connectivity, NetRef, Network, NetworkBuilder};
pub use partition::{PartitionMode, WorkPartitioner, DEFAULT_CHUNK_SIZE};
pub use path::{Path, PathParams, PathType};
pub use scheduler::{CycleScheduler, SchedulerStats, TrialResult};
pub use weights::{load_weights, save_weights, WeightsSnapshot, WEIGHTS_FORMAT_VERSION};

// Re-export the layers below so callers need one dependency
pub use neurite_npu_neural as neural;
pub use neurite_npu_runtime as runtime;
