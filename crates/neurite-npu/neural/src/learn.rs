// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Calcium-Trace Learning
//!
//! Neuron-level spike-driven calcium cascades (M, P, D time scales), the
//! XCAL check-mark weight-change function, and the structural/learned
//! weight split (`Wt = SWt * 2*sig(LWt)`).
//!
//! Synapse-level calcium is integrated lazily: a synapse only updates when
//! one of its neurons spiked, and the decay it missed since its last update
//! (`CaUpT`) is caught up first.

use crate::chans::{v_to_bio, NmdaParams};
use crate::utils::{sig_fun, sig_fun61, sig_inv_fun, sig_inv_fun61, F32Range};
use crate::vars::{NeuronVar as NV, VarAccess};
use serde::{Deserialize, Serialize};

/// Rate constants for the M, P, D cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaDtParams {
    pub m_tau: f32,
    /// LTP time scale (CaMKII-like)
    pub p_tau: f32,
    /// LTD time scale (DAPK1-like)
    pub d_tau: f32,
    #[serde(skip)]
    pub m_dt: f32,
    #[serde(skip)]
    pub p_dt: f32,
    #[serde(skip)]
    pub d_dt: f32,
}

impl Default for CaDtParams {
    fn default() -> Self {
        Self::with_m_tau(5.0)
    }
}

impl CaDtParams {
    pub fn with_m_tau(m_tau: f32) -> Self {
        let mut p = Self {
            m_tau,
            p_tau: 40.0,
            d_tau: 40.0,
            m_dt: 0.0,
            p_dt: 0.0,
            d_dt: 0.0,
        };
        p.update();
        p
    }

    pub fn update(&mut self) {
        self.m_tau = self.m_tau.max(1.0);
        self.p_tau = self.p_tau.max(1.0);
        self.d_tau = self.d_tau.max(1.0);
        self.m_dt = 1.0 / self.m_tau;
        self.p_dt = 1.0 / self.p_tau;
        self.d_dt = 1.0 / self.d_tau;
    }

    /// One cascade step driven by calcium level `ca`
    #[inline]
    pub fn from_ca(&self, ca: f32, ca_m: &mut f32, ca_p: &mut f32, ca_d: &mut f32) {
        *ca_m += self.m_dt * (ca - *ca_m);
        *ca_p += self.p_dt * (*ca_m - *ca_p);
        *ca_d += self.d_dt * (*ca_p - *ca_d);
    }
}

/// Neuron-level spike-driven calcium: CaSyn and CaSpkM/P/D
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaSpkParams {
    pub spike_g: f32,
    /// Time constant of CaSyn, the sender/receiver factor in synaptic Ca
    pub syn_tau: f32,
    pub dt: CaDtParams,
    #[serde(skip)]
    pub syn_dt: f32,
}

impl Default for CaSpkParams {
    fn default() -> Self {
        let mut p = Self {
            spike_g: 8.0,
            syn_tau: 30.0,
            dt: CaDtParams::default(),
            syn_dt: 0.0,
        };
        p.update();
        p
    }
}

impl CaSpkParams {
    pub fn update(&mut self) {
        self.dt.update();
        self.syn_tau = self.syn_tau.max(1.0);
        self.syn_dt = 1.0 / self.syn_tau;
    }

    pub fn ca_from_spike<N: VarAccess<NV>>(&self, n: &mut N) {
        let nsp = self.spike_g * n.get(NV::Spike);
        let ca_syn = n.get(NV::CaSyn);
        n.set(NV::CaSyn, ca_syn + self.syn_dt * (nsp - ca_syn));
        let (mut m, mut p, mut d) = (n.get(NV::CaSpkM), n.get(NV::CaSpkP), n.get(NV::CaSpkD));
        self.dt.from_ca(nsp, &mut m, &mut p, &mut d);
        n.set(NV::CaSpkM, m);
        n.set(NV::CaSpkP, p);
        n.set(NV::CaSpkD, d);
    }
}

/// Learning calcium CaLrn = NMDA Ca + spike-driven VGCC Ca
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaLrnParams {
    /// Normalization divisor so CaLrn peaks around 1
    pub norm: f32,
    /// VGCC Ca contributed by each spike
    pub spk_vgcc_ca: f32,
    pub vgcc_tau: f32,
    pub dt: CaDtParams,
    /// Neuron CaSpkP or CaSpkD must reach this for synapse Ca to update
    pub updt_thr: f32,
    #[serde(skip)]
    pub vgcc_dt: f32,
    #[serde(skip)]
    pub norm_inv: f32,
}

impl Default for CaLrnParams {
    fn default() -> Self {
        let mut p = Self {
            norm: 80.0,
            spk_vgcc_ca: 35.0,
            vgcc_tau: 10.0,
            dt: CaDtParams::with_m_tau(2.0),
            updt_thr: 0.01,
            vgcc_dt: 0.0,
            norm_inv: 0.0,
        };
        p.update();
        p
    }
}

impl CaLrnParams {
    pub fn update(&mut self) {
        self.dt.update();
        self.norm = self.norm.max(1.0);
        self.vgcc_tau = self.vgcc_tau.max(1.0);
        self.vgcc_dt = 1.0 / self.vgcc_tau;
        self.norm_inv = 1.0 / self.norm;
    }

    pub fn vgcc_ca_from_spike<N: VarAccess<NV>>(&self, n: &mut N) {
        let ca = self.spk_vgcc_ca * n.get(NV::Spike);
        n.set(NV::VgccCa, ca);
        let int = n.get(NV::VgccCaInt);
        n.set(NV::VgccCaInt, int + ca - self.vgcc_dt * int);
    }

    pub fn ca_lrns<N: VarAccess<NV>>(&self, n: &mut N) {
        self.vgcc_ca_from_spike(n);
        let ca_lrn = self.norm_inv * (n.get(NV::NmdaCa) + n.get(NV::VgccCaInt));
        n.set(NV::CaLrn, ca_lrn);
        let (mut m, mut p, mut d) = (n.get(NV::NrnCaM), n.get(NV::NrnCaP), n.get(NV::NrnCaD));
        self.dt.from_ca(ca_lrn, &mut m, &mut p, &mut d);
        n.set(NV::NrnCaM, m);
        n.set(NV::NrnCaP, p);
        n.set(NV::NrnCaD, d);
        n.set(NV::CaDiff, p - d);
    }
}

/// Synapse-level calcium integration from sender x receiver CaSyn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinaseCaParams {
    pub spike_g: f32,
    /// Catch-up intervals longer than this just reset to 0
    pub max_isi: i32,
    pub dt: CaDtParams,
}

impl Default for KinaseCaParams {
    fn default() -> Self {
        Self {
            spike_g: 12.0,
            max_isi: 100,
            dt: CaDtParams::default(),
        }
    }
}

impl KinaseCaParams {
    pub fn update(&mut self) {
        self.dt.update();
        if self.max_isi < 1 {
            self.max_isi = 1;
        }
    }

    /// Decay the stored values forward from `utime` to `ctime`; `utime < 0`
    /// means never updated.
    pub fn cur_ca(&self, ctime: i32, utime: i32, ca_m: &mut f32, ca_p: &mut f32, ca_d: &mut f32) {
        if utime < 0 {
            return;
        }
        let isi = ctime - utime;
        if isi <= 0 {
            return;
        }
        if isi > self.max_isi {
            *ca_m = 0.0;
            *ca_p = 0.0;
            *ca_d = 0.0;
            return;
        }
        for _ in 0..isi {
            self.dt.from_ca(0.0, ca_m, ca_p, ca_d);
        }
    }
}

/// XCAL check-mark function parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XcalParams {
    /// Below this coproduct there is no weight change
    pub d_thr: f32,
    /// Proportion of the threshold where the function reverses direction
    pub d_rev: f32,
}

impl Default for XcalParams {
    fn default() -> Self {
        Self {
            d_thr: 0.0001,
            d_rev: 0.1,
        }
    }
}

impl XcalParams {
    pub fn update(&mut self) {
        self.d_thr = self.d_thr.max(0.0);
        self.d_rev = self.d_rev.clamp(0.0001, 1.0);
    }

    /// Check-mark weight change for coproduct `srval` and threshold `thr_p`
    #[inline]
    pub fn dwt(&self, srval: f32, thr_p: f32) -> f32 {
        if srval < self.d_thr {
            0.0
        } else if srval > thr_p * self.d_rev {
            srval - thr_p
        } else {
            -srval * ((1.0 - self.d_rev) / self.d_rev)
        }
    }
}

/// Which error signal drives DWt on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearnRule {
    /// XCAL on sender x receiver CaSpkP against receiver CaSpkD
    #[default]
    Xcal,
    /// Synaptic CaP - CaD
    Kinase,
}

/// Learning rate with schedule and neuromodulatory factors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LRateParams {
    pub base: f32,
    pub sched: f32,
    pub modulation: f32,
    #[serde(skip)]
    pub eff: f32,
}

impl Default for LRateParams {
    fn default() -> Self {
        let mut p = Self {
            base: 0.04,
            sched: 1.0,
            modulation: 1.0,
            eff: 0.0,
        };
        p.update();
        p
    }
}

impl LRateParams {
    pub fn update(&mut self) {
        self.eff = self.modulation * self.sched * self.base;
    }

    /// Reset schedule and modulation to 1
    pub fn init(&mut self) {
        self.sched = 1.0;
        self.modulation = 1.0;
        self.update();
    }
}

/// Initial weight distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SWtInitParams {
    /// Fraction of the initial random variance captured in SWt
    pub spct: f32,
    pub mean: f32,
    pub var: f32,
}

impl Default for SWtInitParams {
    fn default() -> Self {
        Self {
            spct: 0.5,
            mean: 0.5,
            var: 0.25,
        }
    }
}

impl SWtInitParams {
    /// Zero-mean variation for a uniform draw `r` in [0, 1)
    #[inline]
    pub fn rnd_var(&self, r: f32) -> f32 {
        self.var * 2.0 * (r - 0.5)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SWtAdaptParams {
    pub on: bool,
    pub lrate: f32,
    /// Fraction of the mean DSWt subtracted when adapting
    pub sub_mean: f32,
    /// Gain of the LWt to Wt sigmoid
    pub sig_gain: f32,
}

impl Default for SWtAdaptParams {
    fn default() -> Self {
        Self {
            on: true,
            lrate: 0.1,
            sub_mean: 1.0,
            sig_gain: 6.0,
        }
    }
}

/// Structural weight parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SWtParams {
    pub init: SWtInitParams,
    pub adapt: SWtAdaptParams,
    pub limit: F32Range,
}

impl Default for SWtParams {
    fn default() -> Self {
        Self {
            init: SWtInitParams::default(),
            adapt: SWtAdaptParams::default(),
            limit: F32Range::new(0.2, 0.8),
        }
    }
}

impl SWtParams {
    pub fn update(&mut self) {
        self.limit.min = self.limit.min.max(0.0);
        self.limit.max = self.limit.max.min(1.0).max(self.limit.min);
        if self.adapt.sig_gain <= 0.0 {
            self.adapt.sig_gain = 1.0;
        }
    }

    /// Effective weight from structural and learned components
    #[inline]
    pub fn wt_val(&self, swt: f32, lwt: f32) -> f32 {
        swt * self.sig_from_lin_wt(lwt)
    }

    #[inline]
    pub fn clip_swt(&self, swt: f32) -> f32 {
        self.limit.clip(swt)
    }

    /// Contrast-enhanced weight centered at 1, in [0, 2]
    #[inline]
    pub fn sig_from_lin_wt(&self, lw: f32) -> f32 {
        let gain = self.adapt.sig_gain;
        let wt = if gain == 1.0 {
            lw
        } else if gain == 6.0 {
            sig_fun61(lw)
        } else {
            sig_fun(lw, gain, 1.0)
        };
        2.0 * wt
    }

    /// Inverse of [`Self::sig_from_lin_wt`], result in [0, 1]
    #[inline]
    pub fn lin_from_sig_wt(&self, wt: f32) -> f32 {
        let wt = (wt * 0.5).clamp(0.0, 1.0);
        let gain = self.adapt.sig_gain;
        if gain == 1.0 {
            wt
        } else if gain == 6.0 {
            sig_inv_fun61(wt)
        } else {
            sig_inv_fun(wt, gain, 1.0)
        }
    }

    /// LWt that reproduces `wt` on top of `swt`
    #[inline]
    pub fn lwt_from_wts(&self, wt: f32, swt: f32) -> f32 {
        if swt <= 0.0 {
            return 0.5;
        }
        self.lin_from_sig_wt(wt / swt)
    }

    /// Apply accumulated DWt; a zero DWt only restores a failed weight
    pub fn wt_from_dwt(&self, wt: &mut f32, lwt: &mut f32, dwt: f32, swt: f32) {
        if dwt == 0.0 {
            if *wt == 0.0 {
                *wt = self.wt_val(swt, *lwt);
            }
            return;
        }
        *lwt = (*lwt + dwt).clamp(0.0, 1.0);
        *wt = self.wt_val(swt, *lwt);
    }

    /// Initial (Wt, SWt, LWt) for a uniform draw `r` in [0, 1)
    pub fn init_wts_syn(&self, r: f32, mean: f32, spct: f32) -> (f32, f32, f32) {
        let wtv = self.init.rnd_var(r);
        let wt = (mean + wtv).clamp(0.0, 2.0);
        let swt = if spct == 0.0 {
            0.5
        } else {
            self.clip_swt(mean + spct * wtv)
        };
        let lwt = self.lwt_from_wts(wt, swt);
        (self.wt_val(swt, lwt), swt, lwt)
    }
}

/// Per-neuron target activity driving synaptic scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrgAvgActParams {
    pub on: bool,
    /// Learning rate for error-driven TrgAvg adjustment
    pub err_lrate: f32,
    pub syn_scale_rate: f32,
    pub sub_mean: f32,
    pub trg_range: F32Range,
    /// Permute TrgAvg assignments within the layer
    pub permute: bool,
    /// Normalize within sub-pools instead of across the layer
    pub pool: bool,
}

impl Default for TrgAvgActParams {
    fn default() -> Self {
        Self {
            on: true,
            err_lrate: 0.02,
            syn_scale_rate: 0.005,
            sub_mean: 1.0,
            trg_range: F32Range::new(0.5, 2.0),
            permute: true,
            pool: true,
        }
    }
}

/// Receiver learning-rate modulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RLRateParams {
    pub on: bool,
    /// Floor on the sigmoid-derivative factor; 1 disables it
    pub sigmoid_min: f32,
    pub diff: bool,
    pub spk_thr: f32,
    pub diff_thr: f32,
    pub min: f32,
}

impl Default for RLRateParams {
    fn default() -> Self {
        Self {
            on: true,
            sigmoid_min: 0.05,
            diff: true,
            spk_thr: 0.1,
            diff_thr: 0.02,
            min: 0.001,
        }
    }
}

impl RLRateParams {
    pub fn update(&mut self) {
        self.spk_thr = self.spk_thr.max(0.0001);
    }

    /// `4 * ca * (1 - ca)` with ca normalized by the layer max
    #[inline]
    pub fn sig_deriv(&self, act: f32, lay_max: f32) -> f32 {
        if !self.on || lay_max == 0.0 {
            return 1.0;
        }
        let ca = act / lay_max;
        (4.0 * ca * (1.0 - ca)).max(self.sigmoid_min)
    }

    /// `|CaSpkP - CaSpkD| / max(CaSpkP, CaSpkD)` with thresholds
    #[inline]
    pub fn rl_diff(&self, sca_p: f32, sca_d: f32) -> f32 {
        if !self.on || !self.diff {
            return 1.0;
        }
        let smax = sca_p.max(sca_d);
        if smax > self.spk_thr {
            let dif = (sca_p - sca_d).abs();
            if dif < self.diff_thr {
                return self.min;
            }
            return dif / smax;
        }
        self.min
    }
}

/// Dopamine and acetylcholine effects on learning rate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuroModParams {
    /// Gain on |DA| scaling learning rate up
    pub da_lrate: f32,
    /// Fraction of learning gated by ACh
    pub ach_lrate: f32,
}

impl NeuroModParams {
    pub fn update(&mut self) {
        self.da_lrate = self.da_lrate.max(0.0);
        self.ach_lrate = self.ach_lrate.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn lr_mod(&self, da: f32, ach: f32) -> f32 {
        (1.0 + self.da_lrate * da.abs()) * ((1.0 - self.ach_lrate) + self.ach_lrate * ach.min(1.0))
    }
}

/// Neuron-level learning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnNeurParams {
    pub ca_learn: CaLrnParams,
    pub ca_spk: CaSpkParams,
    /// Separate NMDA channel driving learning calcium
    pub lrn_nmda: NmdaParams,
    pub trg_avg_act: TrgAvgActParams,
    pub rl_rate: RLRateParams,
    pub neuro_mod: NeuroModParams,
}

impl Default for LearnNeurParams {
    fn default() -> Self {
        let mut p = Self {
            ca_learn: CaLrnParams::default(),
            ca_spk: CaSpkParams::default(),
            lrn_nmda: NmdaParams::default(),
            trg_avg_act: TrgAvgActParams::default(),
            rl_rate: RLRateParams::default(),
            neuro_mod: NeuroModParams::default(),
        };
        p.update();
        p
    }
}

impl LearnNeurParams {
    pub fn update(&mut self) {
        self.ca_learn.update();
        self.ca_spk.update();
        self.lrn_nmda.update();
        self.rl_rate.update();
        self.neuro_mod.update();
    }

    pub fn init_neur_ca<N: VarAccess<NV>>(&self, n: &mut N) {
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
            NV::CaSpkPM,
            NV::NrnCaM,
            NV::NrnCaP,
            NV::NrnCaD,
            NV::CaDiff,
        ] {
            n.set(var, 0.0);
        }
    }

    /// Learning NMDA conductance and its calcium from total excitation
    pub fn lrn_nmda_from_raw<N: VarAccess<NV>>(&self, n: &mut N, ge_tot: f32) {
        let ge_tot = ge_tot.max(0.0);
        let vmd = n.get(NV::VmDend);
        let syn = self.lrn_nmda.nmda_syn(n.get(NV::GnmdaLrn), ge_tot);
        n.set(NV::GnmdaLrn, syn);
        let g = self.lrn_nmda.gnmda(syn, vmd);
        n.set(NV::NmdaCa, g * self.lrn_nmda.ca_from_v(v_to_bio(vmd)));
    }

    /// All spike-driven calcium for the current cycle
    pub fn ca_from_spike<N: VarAccess<NV>>(&self, n: &mut N) {
        self.ca_spk.ca_from_spike(n);
        self.ca_learn.ca_lrns(n);
    }
}

/// Stochastic synaptic transmission failure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynFailParams {
    pub p_fail: f32,
    /// Scale failure probability by (1 - SWt)
    pub p_fail_swt: bool,
}

impl SynFailParams {
    pub fn update(&mut self) {
        self.p_fail = self.p_fail.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn wt_fail_p(&self, swt: f32) -> f32 {
        if self.p_fail_swt {
            self.p_fail * (1.0 - swt)
        } else {
            self.p_fail
        }
    }

    /// Zero `wt` when the uniform draw `r` falls under the failure probability
    #[inline]
    pub fn fail(&self, wt: &mut f32, swt: f32, r: f32) {
        if self.p_fail > 0.0 && r < self.wt_fail_p(swt) {
            *wt = 0.0;
        }
    }
}

/// Path-level learning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnSynParams {
    pub learn: bool,
    pub rule: LearnRule,
    pub lrate: LRateParams,
    pub xcal: XcalParams,
    pub kinase_ca: KinaseCaParams,
    /// Fraction of the per-receiver mean DWt subtracted (nonzero DWt only)
    pub dwt_sub_mean: f32,
}

impl Default for LearnSynParams {
    fn default() -> Self {
        Self {
            learn: true,
            rule: LearnRule::Xcal,
            lrate: LRateParams::default(),
            xcal: XcalParams::default(),
            kinase_ca: KinaseCaParams::default(),
            dwt_sub_mean: 0.0,
        }
    }
}

impl LearnSynParams {
    pub fn update(&mut self) {
        self.lrate.update();
        self.xcal.update();
        self.kinase_ca.update();
        self.dwt_sub_mean = self.dwt_sub_mean.clamp(0.0, 1.0);
    }

    /// Soft-bounded error term for one synapse and data replica, before
    /// learning rate scaling
    #[inline]
    pub fn err(&self, send_ca_p: f32, recv_ca_p: f32, recv_ca_d: f32, syn_ca_p: f32, syn_ca_d: f32, lwt: f32) -> f32 {
        let err = match self.rule {
            LearnRule::Xcal => self.xcal.dwt(send_ca_p * recv_ca_p, recv_ca_d),
            LearnRule::Kinase => syn_ca_p - syn_ca_d,
        };
        if err > 0.0 {
            err * (1.0 - lwt)
        } else {
            err * lwt
        }
    }
}
