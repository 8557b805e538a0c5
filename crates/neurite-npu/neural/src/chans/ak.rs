// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simplified A-type potassium channel (no inactivation), driven by the
//! dendritic membrane potential.

use super::v_to_bio;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AKsParams {
    pub gbar: f32,
    /// Peak opening level
    pub hf: f32,
    /// Voltage slope of the activation sigmoid
    pub mf: f32,
    pub voff: f32,
    /// Biological voltage above which opening stays flat
    pub vmax: f32,
}

impl Default for AKsParams {
    fn default() -> Self {
        Self {
            gbar: 0.1,
            hf: 0.076,
            mf: 0.075,
            voff: 2.0,
            vmax: -37.0,
        }
    }
}

impl AKsParams {
    #[inline]
    pub fn m_from_v(&self, vbio: f32) -> f32 {
        let av = vbio.min(self.vmax);
        self.hf / (1.0 + (-self.mf * (av + self.voff)).exp())
    }

    #[inline]
    pub fn gak(&self, vm: f32) -> f32 {
        self.gbar * self.m_from_v(v_to_bio(vm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gak_flat_above_vmax() {
        let ap = AKsParams::default();
        assert_eq!(ap.gak(0.8), ap.gak(0.9));
        assert!(ap.gak(0.3) < ap.gak(0.6));
    }
}
