// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neurite Neural Equations
//!
//! Every per-neuron, per-pool and per-synapse update rule of the engine, as
//! parameter structs with pure update methods:
//! - **Vars**: state-variable ids and the [`VarAccess`] abstraction
//! - **Act**: membrane potential, spiking, conductance integration
//! - **Chans**: NMDA, GABA-B, VGCC, AK, mAHP, sAHP, KNa channels
//! - **Inhib**: FS-FFFB pool inhibition and gain adaptation
//! - **Learn**: calcium cascades, XCAL, structural weights, RLRate
//!
//! Nothing here owns memory or threads; the runtime crate stores the state
//! and the cycle engine decides where each function runs.

pub mod act;
pub mod chans;
pub mod flags;
pub mod inhib;
pub mod learn;
pub mod utils;
pub mod vars;

pub use act::{ActParams, NoiseKey};
pub use flags::NeuronFlags;
pub use inhib::{ActAvgParams, GiParams, InhibParams, LayInhibParams};
pub use learn::{
    LearnNeurParams, LearnRule, LearnSynParams, SWtParams, SynFailParams, XcalParams,
};
pub use utils::*;
pub use vars::{
    NeuronAvgVar, NeuronValues, NeuronVar, PoolValues, PoolVar, SynCaVar, SynapseVar, VarAccess,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
