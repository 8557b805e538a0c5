// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neuron Activation
//!
//! Adaptive-exponential integrate-and-fire dynamics on a normalized 0-1
//! membrane potential scale.
//!
//! ## Model Dynamics
//!
//! ```text
//! Inet = Ge(Ee - Vm) + Gl*gl(El - Vm) + Gi(Ei - Vm) + Gk(Ek - Vm)   clamped to +/- VmTau
//! Vm  += VmDt * Inet                                                VmSteps sub-steps
//! Vm  += VmDt * Gl * ExpSlope * exp((Vm - Thr) / ExpSlope)           outside refractory
//!
//! Vm >= ExpThr  =>  Spike = 1, ISI = 0
//! refractory (0 <= ISI < Tr): Vm relaxes toward VmR, exactly VmR at ISI == Tr-1
//! ```
//!
//! All functions operate on one (neuron, data replica) through
//! [`VarAccess`], so the identical code runs for every backend.

use crate::chans::{AKsParams, GabaBParams, KNaMedSlow, MahpParams, NmdaParams, SahpParams, VgccParams};
use crate::utils::{random_number, F32Range, RandFun};
use crate::vars::{NeuronVar as NV, VarAccess};
use serde::{Deserialize, Serialize};

/// Recent-spike window in cycles during which `Spiked` stays at 1
pub const SPIKED_WINDOW: f32 = 10.0;

/// ISI at which the counter is reset to -1 to keep it bounded
pub const ISI_MAX: f32 = 200.0;

/// Spiking threshold, reset and refractory parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeParams {
    /// Threshold used when the exponential current is off, and the reference
    /// point of the exponential current when it is on
    pub thr: f32,
    /// Reset potential after a spike
    pub vm_r: f32,
    /// Refractory period in cycles (minimum 1)
    pub tr: i32,
    /// Time constant for decaying toward `vm_r` during refractory
    pub r_tau: f32,
    /// Adaptive exponential spike current
    pub exp: bool,
    pub exp_slope: f32,
    /// Threshold for spiking when `exp` is on
    pub exp_thr: f32,
    /// Maximum firing rate used to normalize the rate code
    pub max_hz: f32,
    /// Time constant for integrating the ISI average
    pub isi_tau: f32,
    #[serde(skip)]
    pub isi_dt: f32,
    #[serde(skip)]
    pub r_dt: f32,
}

impl Default for SpikeParams {
    fn default() -> Self {
        let mut p = Self {
            thr: 0.5,
            vm_r: 0.3,
            tr: 3,
            r_tau: 1.6667,
            exp: true,
            exp_slope: 0.02,
            exp_thr: 0.9,
            max_hz: 180.0,
            isi_tau: 5.0,
            isi_dt: 0.0,
            r_dt: 0.0,
        };
        p.update();
        p
    }
}

impl SpikeParams {
    pub fn update(&mut self) {
        if self.tr < 1 {
            self.tr = 1;
        }
        if self.r_tau < 1.0 {
            self.r_tau = 1.0;
        }
        if self.isi_tau < 1.0 {
            self.isi_tau = 1.0;
        }
        self.isi_dt = 1.0 / self.isi_tau;
        self.r_dt = 1.0 / self.r_tau;
    }

    /// Threshold actually compared against Vm
    #[inline]
    pub fn spike_thr(&self) -> f32 {
        if self.exp {
            self.exp_thr
        } else {
            self.thr
        }
    }

    /// Rate-code activation from an estimated spiking interval
    #[inline]
    pub fn act_from_isi(&self, isi: f32, time_inc: f32, integ: f32) -> f32 {
        if isi <= 0.0 {
            return 0.0;
        }
        let max_int = 1.0 / (time_inc * integ * self.max_hz);
        max_int / isi
    }

    /// Updated running ISI average for a newly observed interval
    #[inline]
    pub fn avg_from_isi(&self, avg: f32, isi: f32) -> f32 {
        if avg <= 0.0 {
            isi
        } else if isi < 0.8 * avg {
            isi
        } else {
            avg + self.isi_dt * (isi - avg)
        }
    }
}

/// Dendritic compartment parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DendParams {
    /// Fraction of the somatic exponential spike current reaching the dendrite
    pub gbar_exp: f32,
    /// Extra dendritic leak during the refractory period
    pub gbar_r: f32,
    /// SST inhibition multiplier into the dendrite
    pub ss_gi: f32,
}

impl Default for DendParams {
    fn default() -> Self {
        Self {
            gbar_exp: 0.2,
            gbar_r: 3.0,
            ss_gi: 2.0,
        }
    }
}

/// Initial values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActInitParams {
    pub vm: f32,
    pub act: f32,
    /// Baseline excitatory conductance
    pub ge_base: f32,
    /// Baseline inhibitory conductance
    pub gi_base: f32,
    /// Half-width of the uniform per-neuron spread around `ge_base`
    pub ge_var: f32,
    /// Half-width of the uniform per-neuron spread around `gi_base`
    pub gi_var: f32,
}

impl Default for ActInitParams {
    fn default() -> Self {
        Self {
            vm: 0.3,
            act: 0.0,
            ge_base: 0.0,
            gi_base: 0.0,
            ge_var: 0.0,
            gi_var: 0.0,
        }
    }
}

impl ActInitParams {
    /// Per-neuron baseline Ge, never below 0
    pub fn ge_base_for(&self, ni: u32, seed: u64) -> f32 {
        if self.ge_var <= 0.0 {
            return self.ge_base;
        }
        let r = random_number(ni, seed, RandFun::SWtInit) * 2.0 - 1.0;
        (self.ge_base + self.ge_var * r).max(0.0)
    }

    /// Per-neuron baseline Gi, never below 0
    pub fn gi_base_for(&self, ni: u32, seed: u64) -> f32 {
        if self.gi_var <= 0.0 {
            return self.gi_base;
        }
        let r = random_number(ni, seed.wrapping_add(1), RandFun::SWtInit) * 2.0 - 1.0;
        (self.gi_base + self.gi_var * r).max(0.0)
    }
}

/// Fractions of state decayed toward baseline at the start of each trial
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayParams {
    pub act: f32,
    /// Decay of the slow channels (NMDA, GABA-B, VGCC, AK, VmDend)
    pub glong: f32,
    /// Decay of afterhyperpolarization channels
    pub ahp: f32,
    /// Decay of learning calcium; normally 0
    pub learn_ca: f32,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            act: 0.2,
            glong: 0.6,
            ahp: 0.0,
            learn_ca: 0.0,
        }
    }
}

impl DecayParams {
    pub fn update(&mut self) {
        self.act = self.act.clamp(0.0, 1.0);
        self.glong = self.glong.clamp(0.0, 1.0);
        self.ahp = self.ahp.clamp(0.0, 1.0);
        self.learn_ca = self.learn_ca.clamp(0.0, 1.0);
    }
}

/// Integration time constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DtParams {
    /// Overall rate multiplier (1 = 1 msec per cycle)
    pub integ: f32,
    pub vm_tau: f32,
    pub vm_dend_tau: f32,
    /// Euler sub-steps per cycle (minimum 1)
    pub vm_steps: i32,
    pub ge_tau: f32,
    pub gi_tau: f32,
    /// Time constant for ActInt, GeInt, GiInt
    pub int_tau: f32,
    /// Time constant for long-run averages across trials
    pub long_avg_tau: f32,
    /// Cycle within the trial at which SpkMax tracking starts
    pub max_cyc_start: i32,
    #[serde(skip)]
    pub vm_dt: f32,
    #[serde(skip)]
    pub vm_dend_dt: f32,
    #[serde(skip)]
    pub dt_step: f32,
    #[serde(skip)]
    pub ge_dt: f32,
    #[serde(skip)]
    pub gi_dt: f32,
    #[serde(skip)]
    pub int_dt: f32,
    #[serde(skip)]
    pub long_avg_dt: f32,
}

impl Default for DtParams {
    fn default() -> Self {
        let mut p = Self {
            integ: 1.0,
            vm_tau: 2.81,
            vm_dend_tau: 5.0,
            vm_steps: 2,
            ge_tau: 5.0,
            gi_tau: 7.0,
            int_tau: 40.0,
            long_avg_tau: 20.0,
            max_cyc_start: 10,
            vm_dt: 0.0,
            vm_dend_dt: 0.0,
            dt_step: 0.0,
            ge_dt: 0.0,
            gi_dt: 0.0,
            int_dt: 0.0,
            long_avg_dt: 0.0,
        };
        p.update();
        p
    }
}

impl DtParams {
    pub fn update(&mut self) {
        if self.vm_steps < 1 {
            self.vm_steps = 1;
        }
        if self.integ <= 0.0 {
            self.integ = 1.0;
        }
        for tau in [
            &mut self.vm_tau,
            &mut self.vm_dend_tau,
            &mut self.ge_tau,
            &mut self.gi_tau,
            &mut self.int_tau,
            &mut self.long_avg_tau,
        ] {
            if *tau < 1.0 {
                *tau = 1.0;
            }
        }
        self.vm_dt = self.integ / self.vm_tau;
        self.vm_dend_dt = self.integ / self.vm_dend_tau;
        self.dt_step = 1.0 / self.vm_steps as f32;
        self.ge_dt = self.integ / self.ge_tau;
        self.gi_dt = self.integ / self.gi_tau;
        self.int_dt = self.integ / self.int_tau;
        self.long_avg_dt = 1.0 / self.long_avg_tau;
    }

    #[inline]
    pub fn ge_syn_from_raw(&self, ge_syn: f32, ge_raw: f32) -> f32 {
        ge_syn + ge_raw - self.ge_dt * ge_syn
    }

    #[inline]
    pub fn gi_syn_from_raw(&self, gi_syn: f32, gi_raw: f32) -> f32 {
        gi_syn + gi_raw - self.gi_dt * gi_syn
    }
}

/// Per-channel maximal conductances or reversal potentials
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Chans {
    pub e: f32,
    pub l: f32,
    pub i: f32,
    pub k: f32,
}

/// Poisson-like conductance noise
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeNoiseParams {
    pub on: bool,
    /// Mean rate of excitatory noise spikes
    pub ge_hz: f32,
    /// Excitatory conductance per noise spike
    pub ge: f32,
    pub gi_hz: f32,
    pub gi: f32,
    #[serde(skip)]
    pub ge_exp_int: f32,
    #[serde(skip)]
    pub gi_exp_int: f32,
}

impl Default for SpikeNoiseParams {
    fn default() -> Self {
        let mut p = Self {
            on: false,
            ge_hz: 100.0,
            ge: 0.001,
            gi_hz: 200.0,
            gi: 0.001,
            ge_exp_int: 0.0,
            gi_exp_int: 0.0,
        };
        p.update();
        p
    }
}

impl SpikeNoiseParams {
    pub fn update(&mut self) {
        self.ge_hz = self.ge_hz.max(0.001);
        self.gi_hz = self.gi_hz.max(0.001);
        self.ge_exp_int = (-1000.0 / self.ge_hz).exp();
        self.gi_exp_int = (-1000.0 / self.gi_hz).exp();
    }

    /// Advance the accumulating probability `p` and return the fired
    /// increment (or 0)
    #[inline]
    fn draw(p: &mut f32, exp_int: f32, incr: f32, key: NoiseKey, fun: RandFun) -> f32 {
        *p *= random_number(key.index, key.counter, fun);
        if *p <= exp_int {
            *p = 1.0;
            return incr;
        }
        0.0
    }

    #[inline]
    pub fn p_ge(&self, p: &mut f32, key: NoiseKey) -> f32 {
        Self::draw(p, self.ge_exp_int, self.ge, key, RandFun::ActPGe)
    }

    #[inline]
    pub fn p_gi(&self, p: &mut f32, key: NoiseKey) -> f32 {
        Self::draw(p, self.gi_exp_int, self.gi, key, RandFun::ActPGi)
    }
}

/// Identifies one random draw: flat (neuron, replica) index and the global
/// random counter of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseKey {
    pub index: u32,
    pub counter: u64,
}

/// How external input drives excitation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClampParams {
    /// Set from the layer kind at build
    #[serde(skip)]
    pub is_input: bool,
    #[serde(skip)]
    pub is_target: bool,
    /// Conductance per unit of external input
    pub ge: f32,
    /// Add external input on top of synaptic input instead of replacing it
    pub add: bool,
    /// Threshold on |ActP - Target| for counting an error
    pub err_thr: f32,
}

impl Default for ClampParams {
    fn default() -> Self {
        Self {
            is_input: false,
            is_target: false,
            ge: 0.8,
            add: false,
            err_thr: 0.5,
        }
    }
}

/// Complete activation parameter set for one layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActParams {
    pub spikes: SpikeParams,
    pub dend: DendParams,
    pub init: ActInitParams,
    pub decay: DecayParams,
    pub dt: DtParams,
    pub gbar: Chans,
    pub erev: Chans,
    pub clamp: ClampParams,
    pub noise: SpikeNoiseParams,
    pub vm_range: F32Range,
    pub mahp: MahpParams,
    pub sahp: SahpParams,
    pub kna: KNaMedSlow,
    pub nmda: NmdaParams,
    pub gabab: GabaBParams,
    pub vgcc: VgccParams,
    pub ak: AKsParams,
}

impl Default for ActParams {
    fn default() -> Self {
        let mut p = Self {
            spikes: SpikeParams::default(),
            dend: DendParams::default(),
            init: ActInitParams::default(),
            decay: DecayParams::default(),
            dt: DtParams::default(),
            gbar: Chans {
                e: 1.0,
                l: 0.2,
                i: 1.0,
                k: 1.0,
            },
            erev: Chans {
                e: 1.0,
                l: 0.3,
                i: 0.1,
                k: 0.1,
            },
            clamp: ClampParams::default(),
            noise: SpikeNoiseParams::default(),
            vm_range: F32Range::new(0.1, 1.0),
            mahp: MahpParams::default(),
            sahp: SahpParams::default(),
            kna: KNaMedSlow::default(),
            nmda: NmdaParams::default(),
            gabab: GabaBParams::default(),
            vgcc: VgccParams::default(),
            ak: AKsParams::default(),
        };
        p.update();
        p
    }
}

impl ActParams {
    /// Recompute derived values and clamp invalid settings
    pub fn update(&mut self) {
        self.spikes.update();
        self.decay.update();
        self.dt.update();
        self.noise.update();
        self.mahp.update();
        self.sahp.update();
        self.kna.update();
        self.nmda.update();
        self.gabab.update();
        self.vgcc.update();
        if self.vm_range.max < self.vm_range.min {
            core::mem::swap(&mut self.vm_range.max, &mut self.vm_range.min);
        }
    }

    /// Full reset of activation state, used at weight initialization
    pub fn init_acts<N: VarAccess<NV>>(&self, n: &mut N, ge_base: f32, gi_base: f32) {
        n.set(NV::Spike, 0.0);
        n.set(NV::Spiked, 0.0);
        n.set(NV::Isi, -1.0);
        n.set(NV::IsiAvg, -1.0);
        n.set(NV::Act, self.init.act);
        n.set(NV::ActInt, self.init.act);
        n.set(NV::GeSyn, ge_base);
        n.set(NV::Ge, ge_base);
        n.set(NV::Gi, gi_base);
        n.set(NV::Vm, self.init.vm);
        n.set(NV::VmDend, self.init.vm);
        n.set(NV::RLRate, 1.0);
        n.set(NV::GeNoiseP, 1.0);
        n.set(NV::GiNoiseP, 1.0);
        for var in [
            NV::Gk,
            NV::Inet,
            NV::Target,
            NV::Ext,
            NV::SpkMaxCa,
            NV::SpkMax,
            NV::GeNoise,
            NV::GiNoise,
            NV::GiSyn,
            NV::GeInt,
            NV::GiInt,
            NV::MahpN,
            NV::Gmahp,
            NV::SahpCa,
            NV::SahpN,
            NV::Gsahp,
            NV::GknaMed,
            NV::GknaSlow,
            NV::GnmdaSyn,
            NV::Gnmda,
            NV::GnmdaLrn,
            NV::NmdaCa,
            NV::GgabaB,
            NV::GabaB,
            NV::GabaBx,
            NV::Gvgcc,
            NV::VgccM,
            NV::VgccH,
            NV::VgccCa,
            NV::VgccCaInt,
            NV::Gak,
            NV::GeRaw,
            NV::GiRaw,
            NV::GeExt,
            NV::SsGi,
            NV::SsGiDend,
            NV::CtxtGe,
            NV::CtxtGeRaw,
        ] {
            n.set(var, 0.0);
        }
    }

    /// Decay learning-related calcium by `decay`
    pub fn decay_learn_ca<N: VarAccess<NV>>(&self, n: &mut N, decay: f32) {
        for var in [
            NV::GnmdaLrn,
            NV::NmdaCa,
            NV::VgccCa,
            NV::VgccCaInt,
            NV::CaLrn,
            NV::CaSyn,
            NV::CaSpkM,
            NV::CaSpkP,
            NV::CaSpkD,
            NV::NrnCaM,
            NV::NrnCaP,
            NV::NrnCaD,
        ] {
            let v = n.get(var);
            n.add(var, -decay * v);
        }
    }

    pub fn decay_ahp<N: VarAccess<NV>>(&self, n: &mut N, decay: f32) {
        for var in [
            NV::MahpN,
            NV::Gmahp,
            NV::SahpCa,
            NV::SahpN,
            NV::Gsahp,
            NV::GknaMed,
            NV::GknaSlow,
        ] {
            let v = n.get(var);
            n.add(var, -decay * v);
        }
    }

    /// Decay activation state toward initial values at the start of a trial
    pub fn decay_state<N: VarAccess<NV>>(
        &self,
        n: &mut N,
        decay: f32,
        glong: f32,
        ahp: f32,
        ge_base: f32,
        gi_base: f32,
    ) {
        n.set(NV::IsiAvg, -1.0);
        n.set(NV::ActInt, self.init.act);
        n.set(NV::Spiked, 0.0);

        if decay > 0.0 {
            n.set(NV::Spike, 0.0);
            let init_act = self.init.act;
            let act = n.get(NV::Act);
            n.add(NV::Act, -decay * (act - init_act));
            let act_int = n.get(NV::ActInt);
            n.add(NV::ActInt, -decay * (act_int - init_act));
            let ge_syn = n.get(NV::GeSyn);
            n.add(NV::GeSyn, -decay * (ge_syn - ge_base));
            let ge = n.get(NV::Ge);
            n.add(NV::Ge, -decay * (ge - ge_base));
            let gi = n.get(NV::Gi);
            n.add(NV::Gi, -decay * (gi - gi_base));
            let vm = n.get(NV::Vm);
            n.add(NV::Vm, -decay * (vm - self.init.vm));
            for var in [NV::Gk, NV::GeNoise, NV::GiNoise, NV::GiSyn, NV::GeInt, NV::GiInt] {
                let v = n.get(var);
                n.add(var, -decay * v);
            }
        }

        let vmd = n.get(NV::VmDend);
        n.add(NV::VmDend, -glong * (vmd - self.init.vm));

        if ahp > 0.0 {
            self.decay_ahp(n, ahp);
        }
        for var in [
            NV::GgabaB,
            NV::GabaB,
            NV::GabaBx,
            NV::GnmdaSyn,
            NV::Gnmda,
            NV::Gvgcc,
            NV::VgccM,
            NV::VgccH,
            NV::Gak,
            NV::CtxtGe,
        ] {
            let v = n.get(var);
            n.add(var, -glong * v);
        }

        if self.decay.learn_ca > 0.0 {
            self.decay_learn_ca(n, self.decay.learn_ca);
        }

        for var in [
            NV::Inet,
            NV::GeRaw,
            NV::GiRaw,
            NV::SsGi,
            NV::SsGiDend,
            NV::GeExt,
            NV::CtxtGeRaw,
        ] {
            n.set(var, 0.0);
        }
    }

    /// NMDA conductance from total excitatory input
    pub fn nmda_from_raw<N: VarAccess<NV>>(&self, n: &mut N, ge_tot: f32) {
        if self.nmda.ge == 0.0 {
            return;
        }
        let ge_tot = ge_tot.max(0.0);
        let syn = self.nmda.nmda_syn(n.get(NV::GnmdaSyn), ge_tot);
        n.set(NV::GnmdaSyn, syn);
        n.set(NV::Gnmda, self.nmda.gnmda(syn, n.get(NV::VmDend)));
    }

    /// VGCC gating and conductance from dendritic Vm
    pub fn gvgcc_from_vm<N: VarAccess<NV>>(&self, n: &mut N) {
        if self.vgcc.gbar == 0.0 {
            return;
        }
        let vmd = n.get(NV::VmDend);
        let (m, h) = (n.get(NV::VgccM), n.get(NV::VgccH));
        n.set(NV::Gvgcc, self.vgcc.gvgcc(vmd, m, h));
        let (dm, dh) = self.vgcc.dmh_from_v(vmd, m, h);
        n.add(NV::VgccM, dm);
        n.add(NV::VgccH, dh);
    }

    /// Potassium conductances: mAHP, sAHP, AK and KNa
    pub fn gk_from_vm<N: VarAccess<NV>>(&self, n: &mut N) {
        let vm = n.get(NV::Vm);
        let vmd = n.get(NV::VmDend);
        let mut mahp_n = n.get(NV::MahpN);
        let gmahp = self.mahp.gmahp(vm, &mut mahp_n);
        n.set(NV::Gmahp, gmahp);
        n.set(NV::MahpN, mahp_n);

        let gsahp = n.get(NV::Gsahp);
        let gak = self.ak.gak(vmd);
        n.set(NV::Gak, gak);

        let mut gktot = gmahp + gsahp + gak;
        if self.kna.on {
            let mut med = n.get(NV::GknaMed);
            let mut slow = n.get(NV::GknaSlow);
            self.kna.gc_from_spike(&mut med, &mut slow, n.get(NV::Spike) > 0.5);
            n.set(NV::GknaMed, med);
            n.set(NV::GknaSlow, slow);
            gktot += med + slow;
        }
        n.set(NV::Gk, gktot);
    }

    /// Excitatory conductance from integrated synaptic input plus external
    /// input and noise
    pub fn ge_from_syn<N: VarAccess<NV>>(
        &self,
        n: &mut N,
        has_ext: bool,
        mut ge_syn: f32,
        mut ge_ext: f32,
        key: NoiseKey,
    ) {
        n.set(NV::GeExt, 0.0);
        if has_ext {
            let clamped = n.get(NV::Ext) * self.clamp.ge;
            if self.clamp.add {
                n.set(NV::GeExt, clamped);
                ge_syn += clamped;
            } else {
                ge_syn = clamped;
                n.set(NV::GeExt, clamped);
                ge_ext = 0.0;
            }
        }
        n.set(NV::Ge, (ge_syn + ge_ext).max(0.0));
        self.add_ge_noise(n, key);
    }

    pub fn add_ge_noise<N: VarAccess<NV>>(&self, n: &mut N, key: NoiseKey) {
        if !self.noise.on || self.noise.ge == 0.0 {
            return;
        }
        let mut p = n.get(NV::GeNoiseP);
        let ge = self.noise.p_ge(&mut p, key);
        n.set(NV::GeNoiseP, p);
        let noise = self.dt.ge_syn_from_raw(n.get(NV::GeNoise), ge);
        n.set(NV::GeNoise, noise);
        n.add(NV::Ge, noise);
    }

    pub fn add_gi_noise<N: VarAccess<NV>>(&self, n: &mut N, key: NoiseKey) {
        if !self.noise.on || self.noise.gi == 0.0 {
            return;
        }
        let mut p = n.get(NV::GiNoiseP);
        let gi = self.noise.p_gi(&mut p, key);
        n.set(NV::GiNoiseP, p);
        let noise = self.dt.gi_syn_from_raw(n.get(NV::GiNoise), gi);
        n.set(NV::GiNoise, noise);
    }

    /// Inhibitory synaptic conductance, floor-clamped at 0
    pub fn gi_from_syn<N: VarAccess<NV>>(&self, n: &mut N, gi_syn: f32, key: NoiseKey) -> f32 {
        self.add_gi_noise(n, key);
        gi_syn.max(0.0)
    }

    /// Net current from conductances, clamped to +/- VmTau
    #[inline]
    pub fn inet_from_g(&self, vm: f32, ge: f32, gl: f32, gi: f32, gk: f32) -> f32 {
        let inet = ge * (self.erev.e - vm)
            + gl * self.gbar.l * (self.erev.l - vm)
            + gi * (self.erev.i - vm)
            + gk * (self.erev.k - vm);
        inet.clamp(-self.dt.vm_tau, self.dt.vm_tau)
    }

    #[inline]
    pub fn vm_from_inet(&self, vm: f32, dt: f32, inet: f32) -> f32 {
        self.vm_range.clip(vm + dt * inet)
    }

    /// Integrate Vm over `vm_steps` sub-steps; returns (new vm, inet)
    #[inline]
    pub fn vm_integ(&self, vm: f32, dt: f32, ge: f32, gl: f32, gi: f32, gk: f32) -> (f32, f32) {
        let dt = dt * self.dt.dt_step;
        let mut nvm = vm;
        let mut inet = 0.0;
        for _ in 0..self.dt.vm_steps {
            inet = self.inet_from_g(nvm, ge, gl, gi, gk);
            nvm = self.vm_from_inet(nvm, dt, inet);
        }
        (nvm, inet)
    }

    /// True while the neuron is inside its post-spike refractory window
    #[inline]
    pub fn is_refractory(&self, isi: f32) -> bool {
        self.spikes.tr > 0 && isi >= 0.0 && isi < self.spikes.tr as f32
    }

    /// Membrane potential update from Ge, Gi, Gk; also updates VmDend
    pub fn vm_from_g<N: VarAccess<NV>>(&self, n: &mut N) {
        let isi = n.get(NV::Isi);
        let updt_vm = !self.is_refractory(isi);

        let ge = n.get(NV::Ge) * self.gbar.e;
        let gi = n.get(NV::Gi) * self.gbar.i;
        let gk = n.get(NV::Gk) * self.gbar.k;
        let vm = n.get(NV::Vm);
        let mut expi = 0.0;

        if updt_vm {
            let (mut nvm, mut inet) = self.vm_integ(vm, self.dt.vm_dt, ge, 1.0, gi, gk);
            if self.spikes.exp {
                let ex_vm = 0.5 * (nvm + vm);
                expi = self.gbar.l
                    * self.spikes.exp_slope
                    * ((ex_vm - self.spikes.thr) / self.spikes.exp_slope).exp();
                if expi > self.dt.vm_tau {
                    expi = self.dt.vm_tau;
                }
                inet += expi;
                nvm = self.vm_from_inet(nvm, self.dt.vm_dt, expi);
            }
            n.set(NV::Vm, nvm);
            n.set(NV::Inet, inet);
        } else {
            if isi as i32 == self.spikes.tr - 1 {
                n.set(NV::Vm, self.spikes.vm_r);
                n.set(NV::Inet, (self.spikes.vm_r - vm) * self.dt.vm_tau);
            } else {
                let dvm = self.spikes.r_dt * (self.spikes.vm_r - vm);
                n.set(NV::Vm, vm + dvm);
                n.set(NV::Inet, dvm * self.dt.vm_tau);
            }
        }

        let mut gl_eff = 1.0;
        if !updt_vm {
            gl_eff += self.dend.gbar_r;
        }
        let gi_eff = gi + self.gbar.i * n.get(NV::SsGiDend);
        let (mut nvm, _) = self.vm_integ(n.get(NV::VmDend), self.dt.vm_dend_dt, ge, gl_eff, gi_eff, gk);
        if updt_vm {
            nvm = self.vm_from_inet(nvm, self.dt.vm_dend_dt, self.dend.gbar_exp * expi);
        }
        n.set(NV::VmDend, nvm);
    }

    /// Spike detection, ISI bookkeeping and rate-code activation.
    ///
    /// `isi_prev` is the ISI value before this cycle's Vm update; no spike is
    /// emitted while it is inside the refractory window.
    pub fn spike_from_vm<N: VarAccess<NV>>(&self, n: &mut N, isi_prev: f32) {
        let vm = n.get(NV::Vm);
        let mut isi = n.get(NV::Isi);
        let mut isi_avg = n.get(NV::IsiAvg);

        if vm >= self.spikes.spike_thr() && !self.is_refractory(isi_prev) {
            n.set(NV::Spike, 1.0);
            n.set(NV::Spiked, 1.0);
            if isi_avg == -1.0 {
                isi_avg = -2.0;
            } else if isi > 0.0 {
                isi_avg = self.spikes.avg_from_isi(isi_avg, isi + 1.0);
            }
            isi = 0.0;
        } else {
            n.set(NV::Spike, 0.0);
            if isi >= 0.0 {
                isi += 1.0;
                n.set(NV::Spiked, if isi < SPIKED_WINDOW { 1.0 } else { 0.0 });
                if isi > ISI_MAX {
                    isi = -1.0;
                }
            } else {
                n.set(NV::Spiked, 0.0);
            }
            if isi_avg >= 0.0 && isi > 0.0 && isi > 1.2 * isi_avg {
                isi_avg = self.spikes.avg_from_isi(isi_avg, isi);
            }
        }
        n.set(NV::Isi, isi);
        n.set(NV::IsiAvg, isi_avg);

        let nw_act = self
            .spikes
            .act_from_isi(isi_avg, 0.001, self.dt.integ)
            .min(1.0);
        let act = n.get(NV::Act);
        n.set(NV::Act, act + self.dt.vm_dt * (nw_act - act));
    }

    /// Running integrals of activation and conductances over the trial.
    ///
    /// ActInt is reset at the start of the plus phase, so it integrates 3x
    /// faster there.
    pub fn integ_acts<N: VarAccess<NV>>(&self, n: &mut N, plus_phase: bool) {
        let idt = self.dt.int_dt;
        let act_dt = if plus_phase { 3.0 * idt } else { idt };
        let act = n.get(NV::Act);
        let act_int = n.get(NV::ActInt);
        n.set(NV::ActInt, act_int + act_dt * (act - act_int));
        let ge = n.get(NV::Ge);
        let ge_int = n.get(NV::GeInt);
        n.set(NV::GeInt, ge_int + idt * (ge - ge_int));
        let gi_syn = n.get(NV::GiSyn);
        let gi_int = n.get(NV::GiInt);
        n.set(NV::GiInt, gi_int + idt * (gi_syn - gi_int));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::NeuronValues;

    fn neuron(ap: &ActParams) -> NeuronValues {
        let mut n = NeuronValues::default();
        ap.init_acts(&mut n, 0.0, 0.0);
        n
    }

    fn step(ap: &ActParams, n: &mut NeuronValues, ge: f32) {
        n.set(NV::Ge, ge);
        let isi_prev = n.get(NV::Isi);
        ap.vm_from_g(n);
        ap.spike_from_vm(n, isi_prev);
    }

    #[test]
    fn test_zero_drive_no_spike() {
        let ap = ActParams::default();
        let mut n = neuron(&ap);
        for _ in 0..200 {
            step(&ap, &mut n, 0.0);
            assert_eq!(n.get(NV::Spike), 0.0);
        }
        assert_eq!(n.get(NV::Act), 0.0);
        assert!((n.get(NV::Vm) - ap.erev.l).abs() < 0.01);
    }

    #[test]
    fn test_strong_drive_spikes() {
        let ap = ActParams::default();
        let mut n = neuron(&ap);
        let mut spikes = 0;
        for _ in 0..200 {
            step(&ap, &mut n, 0.6);
            spikes += n.get(NV::Spike) as i32;
        }
        assert!(spikes > 1);
        assert!(n.get(NV::Act) > 0.0);
    }

    #[test]
    fn test_refractory_reaches_reset_exactly() {
        let ap = ActParams::default();
        let mut n = neuron(&ap);
        let mut cycles = 0;
        while n.get(NV::Spike) == 0.0 {
            step(&ap, &mut n, 0.6);
            cycles += 1;
            assert!(cycles < 500);
        }
        for k in 0..ap.spikes.tr {
            step(&ap, &mut n, 0.6);
            assert_eq!(n.get(NV::Spike), 0.0);
            if k == ap.spikes.tr - 1 {
                assert_eq!(n.get(NV::Vm), ap.spikes.vm_r);
            } else {
                assert!(n.get(NV::Vm) > ap.spikes.vm_r);
            }
        }
    }

    #[test]
    fn test_inet_clamped() {
        let ap = ActParams::default();
        let inet = ap.inet_from_g(0.0, 100.0, 1.0, 0.0, 0.0);
        assert_eq!(inet, ap.dt.vm_tau);
    }

    #[test]
    fn test_vm_steps_minimum() {
        let mut ap = ActParams::default();
        ap.dt.vm_steps = 0;
        ap.spikes.tr = -2;
        ap.update();
        assert_eq!(ap.dt.vm_steps, 1);
        assert_eq!(ap.spikes.tr, 1);
    }

    #[test]
    fn test_avg_from_isi_fast_adapts() {
        let sp = SpikeParams::default();
        assert_eq!(sp.avg_from_isi(-1.0, 12.0), 12.0);
        assert_eq!(sp.avg_from_isi(20.0, 10.0), 10.0);
        let slow = sp.avg_from_isi(20.0, 30.0);
        assert!(slow > 20.0 && slow < 30.0);
    }

    #[test]
    fn test_noise_fires_at_rate() {
        let mut ap = ActParams::default();
        ap.noise.on = true;
        ap.update();
        let mut n = neuron(&ap);
        let mut fired = 0;
        for cyc in 0..2000u64 {
            let key = NoiseKey { index: 3, counter: cyc };
            let before = n.get(NV::GeNoiseP);
            ap.add_ge_noise(&mut n, key);
            if n.get(NV::GeNoiseP) == 1.0 && before != 1.0 {
                fired += 1;
            }
        }
        // 100 Hz over 2 seconds
        assert!(fired > 100 && fired < 300, "fired {}", fired);
    }

    #[test]
    fn test_decay_state_resets_isi_avg() {
        let ap = ActParams::default();
        let mut n = neuron(&ap);
        n.set(NV::IsiAvg, 12.0);
        n.set(NV::Act, 0.5);
        ap.decay_state(&mut n, 1.0, 1.0, 0.0, 0.0, 0.0);
        assert_eq!(n.get(NV::IsiAvg), -1.0);
        assert_eq!(n.get(NV::Act), 0.0);
        assert_eq!(n.get(NV::VmDend), ap.init.vm);
    }

    #[test]
    fn test_partial_params_keep_defaults() {
        let mut ap: ActParams =
            serde_json::from_str(r#"{"spikes": {"tr": 5}, "clamp": {"ge": 1.2}, "dt": {"vm_tau": 4.0}}"#)
                .unwrap();
        ap.update();
        assert_eq!(ap.spikes.tr, 5);
        assert_eq!(ap.spikes.thr, 0.5);
        assert_eq!(ap.clamp.ge, 1.2);
        assert!(!ap.clamp.add);
        assert!((ap.dt.vm_dt - 0.25).abs() < 1e-6);
        assert_eq!(ap.gbar.l, 0.2);

        // derived rates are recomputed, never written out
        let out = serde_json::to_value(&ap).unwrap();
        assert!(out["dt"].get("vm_dt").is_none());
        assert!(out["clamp"].get("is_input").is_none());
        assert_eq!(out["spikes"]["tr"], 5);
    }
}
