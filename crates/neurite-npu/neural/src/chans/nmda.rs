// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! NMDA receptor channel with voltage-dependent magnesium block.

use super::v_to_bio;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NmdaParams {
    /// Overall conductance multiplier; 0 disables the channel
    pub ge: f32,
    /// Decay time constant in cycles
    pub tau: f32,
    /// Magnesium concentration
    pub mg_c: f32,
    /// Offset added to the biological voltage
    pub voff: f32,
    #[serde(skip)]
    pub dt: f32,
    #[serde(skip)]
    pub mg_fact: f32,
}

impl Default for NmdaParams {
    fn default() -> Self {
        let mut p = Self {
            ge: 0.006,
            tau: 100.0,
            mg_c: 1.4,
            voff: 0.0,
            dt: 0.0,
            mg_fact: 0.0,
        };
        p.update();
        p
    }
}

impl NmdaParams {
    pub fn update(&mut self) {
        if self.tau < 1.0 {
            self.tau = 1.0;
        }
        self.dt = 1.0 / self.tau;
        self.mg_fact = self.mg_c / 3.57;
    }

    /// Magnesium-gated conductance factor for normalized voltage
    #[inline]
    pub fn mg_g_from_v(&self, vm: f32) -> f32 {
        let av = v_to_bio(vm) + self.voff;
        if av >= 0.0 {
            return 0.0;
        }
        -av / (1.0 + self.mg_fact * (-0.062 * av).exp())
    }

    /// Calcium driving force for a biological voltage
    #[inline]
    pub fn ca_from_v(&self, vbio: f32) -> f32 {
        let av = vbio + self.voff;
        if av > -0.5 && av < 0.5 {
            return 1.0 / (0.0756 * (1.0 + 0.0378 * av));
        }
        -av / (1.0 - (0.0756 * av).exp())
    }

    #[inline]
    pub fn nmda_syn(&self, nmda: f32, raw: f32) -> f32 {
        nmda + raw - self.dt * nmda
    }

    #[inline]
    pub fn gnmda(&self, nmda: f32, vm: f32) -> f32 {
        self.ge * self.mg_g_from_v(vm) * nmda
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mg_block_stronger_at_rest() {
        let np = NmdaParams::default();
        // per unit of driving force, depolarization relieves the block
        let rest = np.mg_g_from_v(0.3) / 70.0;
        let depol = np.mg_g_from_v(0.8) / 20.0;
        assert!(depol > rest);
        assert_eq!(np.mg_g_from_v(1.2), 0.0);
    }

    #[test]
    fn test_ca_from_v_no_singularity() {
        let np = NmdaParams::default();
        let near = np.ca_from_v(0.01);
        assert!(near.is_finite() && near > 0.0);
        assert!(np.ca_from_v(-70.0) > 0.0);
    }
}
