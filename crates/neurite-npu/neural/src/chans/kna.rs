// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sodium-gated potassium adaptation at medium and slow timescales.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KNaParams {
    pub on: bool,
    /// Fraction of the remaining headroom added per spike
    pub rise: f32,
    pub max: f32,
    pub tau: f32,
    #[serde(skip)]
    pub dt: f32,
}

impl Default for KNaParams {
    fn default() -> Self {
        let mut p = Self {
            on: true,
            rise: 0.01,
            max: 0.1,
            tau: 100.0,
            dt: 0.0,
        };
        p.update();
        p
    }
}

impl KNaParams {
    pub fn update(&mut self) {
        if self.tau < 1.0 {
            self.tau = 1.0;
        }
        self.dt = 1.0 / self.tau;
    }

    #[inline]
    pub fn gc_from_spike(&self, g: &mut f32, spike: bool) {
        if !self.on {
            *g = 0.0;
        } else if spike {
            *g += self.rise * (self.max - *g);
        } else {
            *g -= self.dt * *g;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KNaMedSlow {
    pub on: bool,
    pub med: KNaParams,
    pub slow: KNaParams,
}

impl Default for KNaMedSlow {
    fn default() -> Self {
        let mut p = Self {
            on: true,
            med: KNaParams {
                rise: 0.02,
                max: 0.2,
                tau: 200.0,
                ..KNaParams::default()
            },
            slow: KNaParams {
                rise: 0.001,
                max: 0.2,
                tau: 1000.0,
                ..KNaParams::default()
            },
        };
        p.update();
        p
    }
}

impl KNaMedSlow {
    pub fn update(&mut self) {
        self.med.update();
        self.slow.update();
    }

    #[inline]
    pub fn gc_from_spike(&self, g_med: &mut f32, g_slow: &mut f32, spike: bool) {
        self.med.gc_from_spike(g_med, spike);
        self.slow.gc_from_spike(g_slow, spike);
    }
}
