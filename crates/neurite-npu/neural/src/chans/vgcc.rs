// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! L-type voltage-gated calcium channel (m^3 h gating on dendritic Vm).

use super::v_to_bio;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VgccParams {
    pub gbar: f32,
}

impl Default for VgccParams {
    fn default() -> Self {
        Self { gbar: 0.02 }
    }
}

impl VgccParams {
    pub fn update(&mut self) {
        if self.gbar < 0.0 {
            self.gbar = 0.0;
        }
    }

    #[inline]
    pub fn g_from_v(&self, vm: f32) -> f32 {
        let vbio = v_to_bio(vm).min(0.0);
        if vbio > -0.1 {
            return 1.0 / 0.0756;
        }
        -vbio / (1.0 - (0.0756 * vbio).exp())
    }

    #[inline]
    fn m_from_v(vbio: f32) -> f32 {
        1.0 / (1.0 + (-(vbio + 37.0)).exp())
    }

    #[inline]
    fn h_from_v(vbio: f32) -> f32 {
        1.0 / (1.0 + ((vbio + 41.0) * 2.0).exp())
    }

    /// Gating deltas (dm, dh) toward their voltage-dependent steady states
    #[inline]
    pub fn dmh_from_v(&self, vm: f32, m: f32, h: f32) -> (f32, f32) {
        let vbio = v_to_bio(vm).min(0.0);
        let dm = (Self::m_from_v(vbio) - m) / 3.6;
        let dh = (Self::h_from_v(vbio) - h) / 29.0;
        (dm, dh)
    }

    #[inline]
    pub fn gvgcc(&self, vm: f32, m: f32, h: f32) -> f32 {
        self.gbar * self.g_from_v(vm) * m * m * m * h
    }
}
