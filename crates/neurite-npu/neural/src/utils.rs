// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! Utility functions shared by the neuron, channel and learning equations.
//!
//! The random number generator is counter based: every draw is a pure
//! function of `(index, counter, function id)`, so draws made from different
//! worker threads never depend on scheduling order.

use serde::{Deserialize, Serialize};

/// Function ids mixed into each random draw so that two different uses of
/// the same `(index, counter)` pair stay independent.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandFun {
    ActPGe = 0,
    ActPGi = 1,
    SynFail = 2,
    SWtInit = 3,
    TrgAvgPermute = 4,
}

/// Fast PCG hash for deterministic pseudo-random number generation
///
/// Based on the PCG family of PRNGs: https://www.pcg-random.org/
///
/// # Example
/// ```
/// use neurite_npu_neural::pcg_hash;
///
/// assert_eq!(pcg_hash(42), pcg_hash(42));
/// ```
#[inline(always)]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
    (word >> 22) ^ word
}

/// Convert a PCG hash to a float in [0, 1)
///
/// Only the top 24 bits are used so the result is exactly representable and
/// never rounds up to 1.0.
#[inline(always)]
pub fn pcg_hash_to_float(input: u32) -> f32 {
    (pcg_hash(input) >> 8) as f32 / 16_777_216.0
}

/// Uniform random number in [0, 1) keyed by `(index, counter, fun)`.
///
/// # Example
/// ```
/// use neurite_npu_neural::{random_number, RandFun};
///
/// let a = random_number(7, 100, RandFun::ActPGe);
/// let b = random_number(7, 101, RandFun::ActPGe);
/// assert_ne!(a, b);
/// assert_eq!(a, random_number(7, 100, RandFun::ActPGe));
/// ```
#[inline(always)]
pub fn random_number(index: u32, counter: u64, fun: RandFun) -> f32 {
    let lo = counter as u32;
    let hi = (counter >> 32) as u32;
    let mut h = pcg_hash(index ^ 0x9E37_79B9);
    h = pcg_hash(h ^ lo);
    h = pcg_hash(h ^ hi.wrapping_mul(2654435761));
    pcg_hash_to_float(h ^ (fun as u32).wrapping_mul(1597334677))
}

/// Float range with inclusive bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct F32Range {
    pub min: f32,
    pub max: f32,
}

impl F32Range {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn clip(&self, val: f32) -> f32 {
        if val < self.min {
            self.min
        } else if val > self.max {
            self.max
        } else {
            val
        }
    }

    #[inline]
    pub fn range(&self) -> f32 {
        self.max - self.min
    }
}

/// Sigmoid used for weight contrast enhancement with gain 6 and offset 1
#[inline]
pub fn sig_fun61(w: f32) -> f32 {
    if w <= 0.0 {
        return 0.0;
    }
    if w >= 1.0 {
        return 1.0;
    }
    let w = w as f64;
    let pwguts = (1.0 - w) / w;
    (1.0 / (1.0 + pwguts.powi(6))) as f32
}

/// Inverse of [`sig_fun61`]. Both directions run in f64; above ~0.8 the
/// f32 sigmoid output itself limits how closely `w` is recovered.
#[inline]
pub fn sig_inv_fun61(w: f32) -> f32 {
    if w <= 0.0 {
        return 0.0;
    }
    if w >= 1.0 {
        return 1.0;
    }
    let w = w as f64;
    (1.0 / (1.0 + ((1.0 - w) / w).powf(1.0 / 6.0))) as f32
}

/// General contrast-enhancing sigmoid with given gain and offset
#[inline]
pub fn sig_fun(w: f32, gain: f32, off: f32) -> f32 {
    if w <= 0.0 {
        return 0.0;
    }
    if w >= 1.0 {
        return 1.0;
    }
    1.0 / (1.0 + ((off * (1.0 - w)) / w).powf(gain))
}

/// Inverse of [`sig_fun`]
#[inline]
pub fn sig_inv_fun(w: f32, gain: f32, off: f32) -> f32 {
    if w <= 0.0 {
        return 0.0;
    }
    if w >= 1.0 {
        return 1.0;
    }
    1.0 / (1.0 + ((1.0 - w) / w).powf(1.0 / gain) / off)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcg_hash_to_float_range() {
        for i in 0..1000 {
            let r = pcg_hash_to_float(i);
            assert!((0.0..1.0).contains(&r));
        }
        assert!(pcg_hash_to_float(u32::MAX) < 1.0);
    }

    #[test]
    fn test_random_number_independent_functions() {
        let a = random_number(3, 55, RandFun::ActPGe);
        let b = random_number(3, 55, RandFun::ActPGi);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sig_fun61_inverse() {
        for w in [0.02f32, 0.1, 0.3, 0.5, 0.7] {
            let s = sig_fun61(w);
            assert!((sig_inv_fun61(s) - w).abs() < 1e-5, "w={} s={}", w, s);
        }
        // near 1 the f32 output is coarse; the inverse must still land on a
        // weight that maps back to the same output
        for w in [0.8f32, 0.9, 0.95] {
            let s = sig_fun61(w);
            let back = sig_fun61(sig_inv_fun61(s));
            assert!((back - s).abs() <= 2.0 * f32::EPSILON, "w={} s={} back={}", w, s, back);
            if s < 1.0 {
                assert!((sig_inv_fun61(s) - w).abs() < 1e-3);
            }
        }
        assert_eq!(sig_fun61(0.5), 0.5);
        assert_eq!(sig_inv_fun61(0.5), 0.5);
    }

    #[test]
    fn test_sig_fun_matches_gain_six() {
        for w in [0.2f32, 0.4, 0.6, 0.8] {
            assert!((sig_fun(w, 6.0, 1.0) - sig_fun61(w)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_range_clip() {
        let r = F32Range::new(0.1, 1.0);
        assert_eq!(r.clip(-2.0), 0.1);
        assert_eq!(r.clip(1.5), 1.0);
        assert_eq!(r.clip(0.4), 0.4);
    }
}
