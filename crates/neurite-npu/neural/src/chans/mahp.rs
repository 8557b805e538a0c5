// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Medium-timescale afterhyperpolarization (M-type potassium) current.

use super::{efun, v_to_bio};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MahpParams {
    pub gbar: f32,
    pub voff: f32,
    pub vslope: f32,
    pub tau_max: f32,
    /// Temperature adjustment factor
    #[serde(skip)]
    pub tadj: f32,
    #[serde(skip)]
    pub dt_max: f32,
}

impl Default for MahpParams {
    fn default() -> Self {
        let mut p = Self {
            gbar: 0.02,
            voff: -30.0,
            vslope: 9.0,
            tau_max: 1000.0,
            tadj: 0.0,
            dt_max: 0.0,
        };
        p.update();
        p
    }
}

impl MahpParams {
    pub fn update(&mut self) {
        if self.tau_max < 1.0 {
            self.tau_max = 1.0;
        }
        self.tadj = 2.3f32.powf((37.0 - 23.0) / 10.0);
        self.dt_max = 1.0 / self.tau_max;
    }

    /// Steady-state gating and time constant for a biological voltage
    pub fn ninf_tau_from_v(&self, vbio: f32) -> (f32, f32) {
        let vo = vbio - self.voff;
        let a = self.dt_max * self.vslope * efun(-vo / self.vslope);
        let b = self.dt_max * self.vslope * efun(vo / self.vslope);
        let tau = 1.0 / (a + b);
        let ninf = a * tau;
        (ninf, tau / self.tadj)
    }

    /// Advance gating `n` one cycle and return the conductance
    #[inline]
    pub fn gmahp(&self, vm: f32, n: &mut f32) -> f32 {
        let (ninf, tau) = self.ninf_tau_from_v(v_to_bio(vm));
        *n += (ninf - *n) / tau;
        self.tadj * self.gbar * *n
    }
}
