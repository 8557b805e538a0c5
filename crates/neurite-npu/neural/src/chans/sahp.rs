// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Slow afterhyperpolarization driven by integrated calcium. Updated at
//! trial granularity rather than every cycle.

use super::efun;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SahpParams {
    pub gk: f32,
    /// Time constant for integrating calcium across trials
    pub ca_tau: f32,
    /// Calcium level of half activation
    pub off: f32,
    pub slope: f32,
    pub tau_max: f32,
    #[serde(skip)]
    pub ca_dt: f32,
    #[serde(skip)]
    pub dt_max: f32,
}

impl Default for SahpParams {
    fn default() -> Self {
        let mut p = Self {
            gk: 0.05,
            ca_tau: 5.0,
            off: 0.8,
            slope: 0.02,
            tau_max: 1.0,
            ca_dt: 0.0,
            dt_max: 0.0,
        };
        p.update();
        p
    }
}

impl SahpParams {
    pub fn update(&mut self) {
        if self.ca_tau < 1.0 {
            self.ca_tau = 1.0;
        }
        if self.tau_max <= 0.0 {
            self.tau_max = 1.0;
        }
        self.dt_max = 1.0 / self.tau_max;
        self.ca_dt = 1.0 / self.ca_tau;
    }

    pub fn ninf_tau_from_ca(&self, ca: f32) -> (f32, f32) {
        let co = ca - self.off;
        let a = self.dt_max * self.slope * efun(-co / self.slope);
        let b = self.dt_max * self.slope * efun(co / self.slope);
        let tau = 1.0 / (a + b);
        (a * tau, tau)
    }

    #[inline]
    pub fn ca_int(&self, ca_int: f32, ca: f32) -> f32 {
        ca_int + self.ca_dt * (ca - ca_int)
    }

    #[inline]
    pub fn dn_from_ca(&self, ca: f32, n: f32) -> f32 {
        let (ninf, tau) = self.ninf_tau_from_ca(ca);
        (ninf - n) / tau
    }

    #[inline]
    pub fn gsahp(&self, n: f32) -> f32 {
        self.gk * n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_calcium_opens_channel() {
        let sp = SahpParams::default();
        let (ninf_low, _) = sp.ninf_tau_from_ca(0.2);
        let (ninf_high, _) = sp.ninf_tau_from_ca(1.2);
        assert!(ninf_high > 0.9);
        assert!(ninf_low < 0.1);
    }
}
