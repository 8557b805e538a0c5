// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Pool Inhibition
//!
//! Fast-and-slow feedforward/feedback inhibition (FS-FFFB).
//!
//! Feedforward spikes arriving at a pool drive a fast-spiking (PV-like)
//! integrator; spikes emitted by the pool drive a facilitating slow-spiking
//! (SST-like) integrator. Their sum times `gi` is the pool's inhibitory
//! conductance, producing a graded k-winners-take-all dynamic.

use crate::vars::{PoolVar as PV, VarAccess};
use serde::{Deserialize, Serialize};

/// FS-FFFB parameters for one level of inhibition (layer or sub-pool)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GiParams {
    pub on: bool,
    /// Overall inhibition gain, the main knob for activity levels
    pub gi: f32,
    /// Multiplier on feedback spikes into the fast integrator
    pub fb: f32,
    pub fs_tau: f32,
    /// Multiplier on slow-spiking inhibition relative to fast
    pub ss: f32,
    /// Decay time constant of slow-spiking facilitation
    pub ssf_tau: f32,
    pub ssi_tau: f32,
    /// Fast-spiking zero point; below it there is no FS inhibition
    pub fs0: f32,
    /// Minimum GeExts for a clamped pool to use it directly as FS drive
    pub clamp_ext_min: f32,
    #[serde(skip)]
    pub fs_dt: f32,
    #[serde(skip)]
    pub ssf_dt: f32,
    #[serde(skip)]
    pub ssi_dt: f32,
}

impl Default for GiParams {
    fn default() -> Self {
        let mut p = Self {
            on: true,
            gi: 1.1,
            fb: 1.0,
            fs_tau: 6.0,
            ss: 30.0,
            ssf_tau: 20.0,
            ssi_tau: 50.0,
            fs0: 0.1,
            clamp_ext_min: 0.05,
            fs_dt: 0.0,
            ssf_dt: 0.0,
            ssi_dt: 0.0,
        };
        p.update();
        p
    }
}

impl GiParams {
    pub fn update(&mut self) {
        self.fs_tau = self.fs_tau.max(1.0);
        self.ssf_tau = self.ssf_tau.max(1.0);
        self.ssi_tau = self.ssi_tau.max(1.0);
        self.fs_dt = 1.0 / self.fs_tau;
        self.ssf_dt = 1.0 / self.ssf_tau;
        self.ssi_dt = 1.0 / self.ssi_tau;
    }

    /// Sub-pool defaults: off until enabled on a layer with several pools
    pub fn pool_defaults() -> Self {
        Self {
            on: false,
            ..Self::default()
        }
    }

    #[inline]
    fn fs(&self, fsi: f32, ge_ext: f32, clamped: bool) -> f32 {
        if clamped && ge_ext > self.clamp_ext_min {
            return ge_ext;
        }
        (fsi - self.fs0).max(0.0)
    }

    /// Full inhibition step from the pool's normalized spike aggregates
    pub fn inhib<P: VarAccess<PV>>(&self, p: &mut P) {
        if !self.on {
            zero_inhib(p);
            return;
        }
        let ffs = p.get(PV::FFs);
        let fbs = p.get(PV::FBs);
        let ge_exts = p.get(PV::GeExts);
        let clamped = p.get(PV::Clamped) > 0.0;

        let fsi = p.get(PV::FSi);
        let fsi = fsi + (ffs + ge_exts + self.fb * fbs) - self.fs_dt * fsi;
        p.set(PV::FSi, fsi);
        let fs_gi = self.gi * self.fs(fsi, ge_exts, clamped);
        p.set(PV::FSGi, fs_gi);

        let ssf = p.get(PV::SSf);
        let ssi = p.get(PV::SSi);
        let ssi = ssi + self.ssi_dt * (ssf * fbs - ssi);
        let ssf = ssf + fbs * (1.0 - ssf) - self.ssf_dt * ssf;
        p.set(PV::SSi, ssi);
        p.set(PV::SSf, ssf);
        let ss_gi = self.gi * self.ss * ssi;
        p.set(PV::SSGi, ss_gi);

        p.set(PV::Gi, fs_gi + ss_gi);
        save_orig(p);
    }
}

/// Normalize raw spike aggregates by the number of neurons in the pool
pub fn spikes_from_raw<P: VarAccess<PV>>(p: &mut P, n_neurons: usize) {
    let inv = 1.0 / (n_neurons.max(1) as f32);
    p.set(PV::FFs, p.get(PV::FFsRaw) * inv);
    p.set(PV::FBs, p.get(PV::FBsRaw) * inv);
    p.set(PV::GeExts, p.get(PV::GeExtRaw) * inv);
}

/// Clear the raw accumulators before the next aggregation
pub fn zero_raw<P: VarAccess<PV>>(p: &mut P) {
    p.set(PV::FFsRaw, 0.0);
    p.set(PV::FBsRaw, 0.0);
    p.set(PV::GeExtRaw, 0.0);
}

pub fn zero_inhib<P: VarAccess<PV>>(p: &mut P) {
    for var in [
        PV::FFs,
        PV::FBs,
        PV::GeExts,
        PV::FSi,
        PV::SSi,
        PV::SSf,
        PV::FSGi,
        PV::SSGi,
        PV::Gi,
        PV::GiOrig,
        PV::LayGi,
    ] {
        p.set(var, 0.0);
    }
}

#[inline]
pub fn save_orig<P: VarAccess<PV>>(p: &mut P) {
    p.set(PV::GiOrig, p.get(PV::Gi));
}

/// Sub-pool takes the max of its own and the layer-level inhibition
#[inline]
pub fn layer_max<P: VarAccess<PV>>(p: &mut P, lay_gi: f32) {
    p.set(PV::LayGi, lay_gi);
    p.set(PV::Gi, p.get(PV::Gi).max(lay_gi));
}

/// Layer pool takes the max over its sub-pools
#[inline]
pub fn pool_max<P: VarAccess<PV>>(p: &mut P, pool_gi: f32) {
    p.set(PV::Gi, p.get(PV::Gi).max(pool_gi));
}

/// Decay inhibition integrators toward 0 at a trial boundary
pub fn decay_inhib<P: VarAccess<PV>>(p: &mut P, decay: f32) {
    for var in [PV::FSi, PV::SSi, PV::SSf, PV::FSGi, PV::SSGi, PV::Gi, PV::GiOrig, PV::LayGi] {
        let v = p.get(var);
        p.set(var, v - decay * v);
    }
    zero_raw(p);
}

/// Borrowing of inhibition from up to four other layers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayInhibParams {
    /// Names of the layers to borrow from, resolved to indices at build
    pub layers: Vec<String>,
    #[serde(skip)]
    pub idxs: [Option<u32>; 4],
}

impl LayInhibParams {
    pub fn is_on(&self) -> bool {
        self.idxs.iter().any(Option::is_some)
    }
}

/// Target activity and inhibition-gain adaptation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActAvgParams {
    /// Expected average activity level; also the initial ActMAvg
    pub nominal: f32,
    pub adapt_gi: bool,
    /// Added to `nominal` to form the adaptation target
    pub offset: f32,
    /// Tolerance above target as a proportion of target
    pub hi_tol: f32,
    /// Tolerance below target as a proportion of target
    pub lo_tol: f32,
    pub adapt_rate: f32,
}

impl Default for ActAvgParams {
    fn default() -> Self {
        Self {
            nominal: 0.1,
            adapt_gi: false,
            offset: 0.0,
            hi_tol: 0.0,
            lo_tol: 0.8,
            adapt_rate: 0.1,
        }
    }
}

impl ActAvgParams {
    pub fn update(&mut self) {
        self.nominal = self.nominal.max(0.0001);
    }

    /// Running average of layer activity; very low activity is ignored
    #[inline]
    pub fn avg_from_act(&self, avg: &mut f32, act: f32, dt: f32) {
        if act < 0.0001 {
            return;
        }
        *avg += dt * (act - *avg);
    }

    /// Adapt `gi_mult` toward the target; returns true when it changed
    pub fn adapt(&self, gi_mult: &mut f32, act: f32) -> bool {
        let trg = self.nominal + self.offset;
        let del = (act - trg) / trg;
        if del < -self.lo_tol || del > self.hi_tol {
            *gi_mult += self.adapt_rate * del;
            return true;
        }
        false
    }
}

/// All inhibition settings for one layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InhibParams {
    pub layer: GiParams,
    pub pool: GiParams,
    pub lay_inhib: LayInhibParams,
    pub act_avg: ActAvgParams,
}

impl Default for InhibParams {
    fn default() -> Self {
        let mut layer = GiParams::default();
        layer.gi = 1.0;
        let mut pool = GiParams::pool_defaults();
        pool.gi = 1.0;
        Self {
            layer,
            pool,
            lay_inhib: LayInhibParams::default(),
            act_avg: ActAvgParams::default(),
        }
    }
}

impl InhibParams {
    pub fn update(&mut self) {
        self.layer.update();
        self.pool.update();
        self.act_avg.update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::PoolValues;

    #[test]
    fn test_off_zeroes() {
        let gp = GiParams {
            on: false,
            ..GiParams::default()
        };
        let mut p = PoolValues::default();
        p.set(PV::Gi, 3.0);
        gp.inhib(&mut p);
        assert_eq!(p.get(PV::Gi), 0.0);
    }

    #[test]
    fn test_more_drive_more_inhibition() {
        let gp = GiParams::default();
        let run = |ffs: f32| {
            let mut p = PoolValues::default();
            for _ in 0..20 {
                p.set(PV::FFsRaw, ffs * 10.0);
                spikes_from_raw(&mut p, 10);
                gp.inhib(&mut p);
            }
            p.get(PV::Gi)
        };
        let lo = run(0.05);
        let hi = run(0.3);
        assert!(hi > lo);
        assert!(lo >= 0.0);
    }

    #[test]
    fn test_clamped_uses_ext() {
        let gp = GiParams::default();
        let mut p = PoolValues::default();
        p.set(PV::Clamped, 1.0);
        p.set(PV::GeExtRaw, 4.0);
        spikes_from_raw(&mut p, 10);
        gp.inhib(&mut p);
        assert!((p.get(PV::FSGi) - gp.gi * 0.4).abs() < 1e-6);
        assert_eq!(p.get(PV::GiOrig), p.get(PV::Gi));
    }

    #[test]
    fn test_layer_max() {
        let mut p = PoolValues::default();
        p.set(PV::Gi, 0.2);
        layer_max(&mut p, 0.5);
        assert_eq!(p.get(PV::Gi), 0.5);
        assert_eq!(p.get(PV::LayGi), 0.5);
        layer_max(&mut p, 0.1);
        assert_eq!(p.get(PV::Gi), 0.5);
    }

    #[test]
    fn test_adapt_outside_tolerance() {
        let aa = ActAvgParams::default();
        let mut gi = 1.0;
        assert!(aa.adapt(&mut gi, 0.2));
        assert!(gi > 1.0);
        let mut gi2 = 1.0;
        // within low tolerance (0.8 of target)
        assert!(!aa.adapt(&mut gi2, 0.05));
        assert_eq!(gi2, 1.0);
    }
}
