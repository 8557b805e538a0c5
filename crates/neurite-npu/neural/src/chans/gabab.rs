// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! GABA-B metabotropic inhibition: slow, bi-exponential potassium
//! conductance driven by inhibitory input.

use super::v_to_bio;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GabaBParams {
    pub gbar: f32,
    pub rise_tau: f32,
    pub decay_tau: f32,
    /// Baseline level added to the gating value
    pub gbase: f32,
    /// Multiplier converting Gi into an equivalent spike rate
    pub gi_spike: f32,
    #[serde(skip)]
    pub tau_fact: f32,
    #[serde(skip)]
    pub rise_dt: f32,
    #[serde(skip)]
    pub decay_dt: f32,
}

impl Default for GabaBParams {
    fn default() -> Self {
        let mut p = Self {
            gbar: 0.015,
            rise_tau: 45.0,
            decay_tau: 50.0,
            gbase: 0.2,
            gi_spike: 10.0,
            tau_fact: 0.0,
            rise_dt: 0.0,
            decay_dt: 0.0,
        };
        p.update();
        p
    }
}

impl GabaBParams {
    pub fn update(&mut self) {
        if self.rise_tau < 1.0 {
            self.rise_tau = 1.0;
        }
        if self.decay_tau <= self.rise_tau {
            self.decay_tau = self.rise_tau + 1.0;
        }
        self.tau_fact = (self.decay_tau / self.rise_tau)
            .powf(self.rise_tau / (self.decay_tau - self.rise_tau));
        self.rise_dt = 1.0 / self.rise_tau;
        self.decay_dt = 1.0 / self.decay_tau;
    }

    /// Voltage dependence of the GIRK channel
    #[inline]
    pub fn g_from_v(&self, vm: f32) -> f32 {
        let vbio = v_to_bio(vm).max(-90.0);
        (vbio + 90.0) / (1.0 + (0.1 * ((vbio + 90.0) + 10.0)).exp())
    }

    /// Sigmoid transform of inhibitory drive into receptor activation
    #[inline]
    pub fn g_from_s(&self, s: f32) -> f32 {
        let ss = s * self.gi_spike;
        if ss > 20.0 {
            return 1.0;
        }
        1.0 / (1.0 + (-(ss - 7.1) / 1.4).exp())
    }

    /// One step of the rise/decay dynamics on (gabab, gabab_x)
    #[inline]
    pub fn gabab(&self, gi: f32, gabab: &mut f32, gabab_x: &mut f32) {
        let dg = (self.tau_fact * *gabab_x - *gabab) * self.rise_dt;
        let dx = -*gabab_x * self.decay_dt;
        *gabab_x += self.g_from_s(gi) + dx;
        *gabab += dg;
    }

    #[inline]
    pub fn ggabab(&self, gabab: f32, vm: f32) -> f32 {
        self.gbar * self.g_from_v(vm) * (gabab + self.gbase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gabab_rises_then_decays() {
        let gp = GabaBParams::default();
        let (mut g, mut x) = (0.0f32, 0.0f32);
        for _ in 0..20 {
            gp.gabab(1.0, &mut g, &mut x);
        }
        let peak = g;
        assert!(peak > 0.0);
        for _ in 0..500 {
            gp.gabab(0.0, &mut g, &mut x);
        }
        assert!(g < peak);
        assert!(g >= 0.0);
    }

    #[test]
    fn test_g_from_s_saturates() {
        let gp = GabaBParams::default();
        assert_eq!(gp.g_from_s(3.0), 1.0);
        assert!(gp.g_from_s(0.0) < 0.01);
    }
}
