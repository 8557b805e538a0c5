// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # State Variable Tables
//!
//! Every piece of per-cycle state is a named `f32` slot. The enums below fix
//! the variable ids that the stride formulas in the runtime crate multiply
//! out, so the discriminant order is part of the memory-layout contract.
//!
//! Kernels read and write state only through [`VarAccess`], which lets the
//! same update equations run against the strided store, a GPU staging copy,
//! or a plain array in tests.

macro_rules! state_vars {
    ($(#[$meta:meta])* $name:ident { $($var:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($var),+
        }

        impl $name {
            /// All variables in layout order
            pub const ALL: &'static [$name] = &[$($name::$var),+];
            /// Number of variables
            pub const COUNT: usize = Self::ALL.len();

            #[inline(always)]
            pub const fn index(self) -> usize {
                self as usize
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$var => stringify!($var)),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.name() == name)
            }
        }
    };
}

state_vars! {
    /// Per-neuron, per-data-replica variables
    NeuronVar {
        Spike, Spiked, Act, ActInt, ActM, ActP, Ext, Target,
        Ge, Gi, Gk, Inet, Vm, VmDend, Isi, IsiAvg,
        CaSyn, CaSpkM, CaSpkP, CaSpkD, CaSpkPM, SpkMax, SpkMaxCa, SpkPrv,
        NrnCaM, NrnCaP, NrnCaD, CaDiff, CaLrn, RLRate,
        GeNoiseP, GeNoise, GiNoiseP, GiNoise,
        GeExt, GeRaw, GeSyn, GiRaw, GiSyn, GeInt, GiInt,
        SsGi, SsGiDend, CtxtGe, CtxtGeRaw,
        Gnmda, GnmdaSyn, GnmdaLrn, NmdaCa,
        GgabaB, GabaB, GabaBx,
        Gvgcc, VgccM, VgccH, VgccCa, VgccCaInt,
        MahpN, Gmahp, SahpCa, SahpN, Gsahp, GknaMed, GknaSlow, Gak,
    }
}

state_vars! {
    /// Per-neuron long-run values shared across data replicas
    NeuronAvgVar {
        ActAvg, AvgPct, TrgAvg, DTrgAvg, AvgDif, GeBase, GiBase,
    }
}

state_vars! {
    /// Per-synapse weight variables shared across data replicas
    SynapseVar {
        Wt, LWt, SWt, DWt, DSWt,
    }
}

state_vars! {
    /// Per-synapse, per-data-replica learning accumulators
    SynCaVar {
        CaM, CaP, CaD, CaUpT, DiDWt,
    }
}

state_vars! {
    /// Per-pool, per-data-replica inhibition and activity statistics
    PoolVar {
        FFsRaw, FBsRaw, GeExtRaw, FFs, FBs, GeExts,
        FSi, SSi, SSf, FSGi, SSGi, Gi, GiOrig, LayGi, Clamped,
        ActAvg, ActMax, CaSpkPAvg, CaSpkPMax, CaSpkDAvg, CaSpkDMax, GeIntAvg, GeIntMax,
        ActMinusAvg, ActMinusMax, ActPlusAvg, ActPlusMax,
    }
}

/// Indexable view over one entity's state variables.
pub trait VarAccess<V: Copy> {
    fn get(&self, var: V) -> f32;

    fn set(&mut self, var: V, val: f32);

    #[inline]
    fn add(&mut self, var: V, delta: f32) {
        let cur = self.get(var);
        self.set(var, cur + delta);
    }
}

/// Dense, stack-allocated copy of one (neuron, replica) variable set.
///
/// Used by unit tests and by the GPU backend's host staging.
#[derive(Debug, Clone, PartialEq)]
pub struct NeuronValues(pub [f32; NeuronVar::COUNT]);

impl Default for NeuronValues {
    fn default() -> Self {
        NeuronValues([0.0; NeuronVar::COUNT])
    }
}

impl VarAccess<NeuronVar> for NeuronValues {
    #[inline(always)]
    fn get(&self, var: NeuronVar) -> f32 {
        self.0[var.index()]
    }

    #[inline(always)]
    fn set(&mut self, var: NeuronVar, val: f32) {
        self.0[var.index()] = val;
    }
}

/// Dense copy of one (pool, replica) variable set.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolValues(pub [f32; PoolVar::COUNT]);

impl Default for PoolValues {
    fn default() -> Self {
        PoolValues([0.0; PoolVar::COUNT])
    }
}

impl VarAccess<PoolVar> for PoolValues {
    #[inline(always)]
    fn get(&self, var: PoolVar) -> f32 {
        self.0[var.index()]
    }

    #[inline(always)]
    fn set(&mut self, var: PoolVar, val: f32) {
        self.0[var.index()] = val;
    }
}
