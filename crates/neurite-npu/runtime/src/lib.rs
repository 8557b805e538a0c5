// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neurite NPU Runtime
//!
//! Memory side of the engine:
//! - [`Topology`]: layer, pool, path and synapse index tables
//! - [`Strides`]: the flat structure-of-arrays addressing contract
//! - [`StateStore`]: the arrays themselves, including the fixed-point
//!   conductance ring buffers
//! - [`view`]: per-entity [`VarAccess`](neurite_npu_neural::VarAccess) views
//!
//! The store is allocated once from a finalized topology. Nothing on the
//! per-cycle path allocates or re-validates indices.

pub mod error;
pub mod store;
pub mod strides;
pub mod topology;
pub mod view;

pub use error::{Result, RuntimeError};
pub use store::StateStore;
pub use strides::{Strides, LAYOUT_VERSION};
pub use topology::{
    LayerIndexes, NeuronIndexes, PathIndexes, PoolIndexes, StartN, SynIndexes, Topology,
};
pub use view::{BlockMut, BlockRef, NeuronRef, NeuronView, PoolRef, PoolView, SynCaView};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
