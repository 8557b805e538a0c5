// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Ion Channels
//!
//! Conductance-based channel models. Neuron membrane potential is kept in a
//! normalized 0-1 range; channels whose kinetics are defined on biological
//! millivolts convert with [`v_to_bio`] first.

pub mod ak;
pub mod gabab;
pub mod kna;
pub mod mahp;
pub mod nmda;
pub mod sahp;
pub mod vgcc;

pub use ak::AKsParams;
pub use gabab::GabaBParams;
pub use kna::{KNaMedSlow, KNaParams};
pub use mahp::MahpParams;
pub use nmda::NmdaParams;
pub use sahp::SahpParams;
pub use vgcc::VgccParams;

/// Convert normalized Vm into biological millivolts
#[inline(always)]
pub fn v_to_bio(vm: f32) -> f32 {
    vm * 100.0 - 100.0
}

/// Convert biological millivolts into normalized Vm
#[inline(always)]
pub fn v_from_bio(vbio: f32) -> f32 {
    (vbio + 100.0) / 100.0
}

/// Exponential helper shared by the AHP channels: z / (e^z - 1)
#[inline]
pub(crate) fn efun(z: f32) -> f32 {
    if z.abs() < 1.0e-4 {
        return 1.0 - 0.5 * z;
    }
    z / (z.exp() - 1.0)
}
