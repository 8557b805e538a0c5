// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Execution Context
//!
//! Everything a kernel needs to know about "when" it runs: cycle counters,
//! phase, data-replica count and the global signal snapshot. One `Context`
//! is passed explicitly into every phase; there is no global network state.
//!
//! Global signals (reward, dopamine, acetylcholine) are owned by a
//! [`SignalsHandle`] that outside collaborators write through a
//! `parking_lot::RwLock`. The scheduler copies them into the context once
//! per cycle, so every phase of a cycle sees the same values.

use neurite_npu_neural::NoiseKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Network-wide scalar signals for one data replica
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSignals {
    pub reward: f32,
    pub has_reward: bool,
    /// Dopamine
    pub da: f32,
    /// Acetylcholine
    pub ach: f32,
    /// Reward prediction written by `RewardPred` layers
    pub rew_pred: f32,
}

/// Shared, thread-safe handle to the per-replica global signals
#[derive(Debug, Clone)]
pub struct SignalsHandle {
    inner: Arc<RwLock<Vec<GlobalSignals>>>,
}

impl SignalsHandle {
    pub fn new(ndata: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(vec![GlobalSignals::default(); ndata])),
        }
    }

    /// Copy of all replicas' signals
    pub fn snapshot(&self) -> Vec<GlobalSignals> {
        self.inner.read().clone()
    }

    /// Copy into an existing buffer without reallocating
    pub fn snapshot_into(&self, out: &mut Vec<GlobalSignals>) {
        let guard = self.inner.read();
        out.clear();
        out.extend_from_slice(&guard);
    }

    pub fn get(&self, di: usize) -> GlobalSignals {
        self.inner.read().get(di).copied().unwrap_or_default()
    }

    /// Apply `f` to replica `di`; out-of-range replicas are ignored
    pub fn update<F: FnOnce(&mut GlobalSignals)>(&self, di: usize, f: F) {
        if let Some(sig) = self.inner.write().get_mut(di) {
            f(sig);
        }
    }

    pub fn set_reward(&self, di: usize, reward: f32) {
        self.update(di, |s| {
            s.reward = reward;
            s.has_reward = true;
        });
    }

    pub fn clear_reward(&self, di: usize) {
        self.update(di, |s| {
            s.reward = 0.0;
            s.has_reward = false;
        });
    }

    pub fn set_neuromod(&self, di: usize, da: f32, ach: f32) {
        self.update(di, |s| {
            s.da = da;
            s.ach = ach;
        });
    }

    pub fn ndata(&self) -> usize {
        self.inner.read().len()
    }
}

/// Cycle counters and phase state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub ndata: u32,
    /// Cycle within the current theta cycle
    pub cycle: i32,
    /// Cycles since the network was built; drives ring-buffer slots
    pub cycles_total: i32,
    /// Cycles per trial
    pub theta_cycles: i32,
    /// Cycles of the plus phase at the end of each trial
    pub plus_cycles: i32,
    pub plus_phase: bool,
    /// Counter stamped into synaptic `CaUpT`
    pub syn_ca_ctr: f32,
    /// Trials between slow adaptation passes
    pub slow_interval: i32,
    pub slow_ctr: i32,
    /// Seed mixed into every random draw
    pub seed: u64,
    /// Advances once per cycle
    pub rand_ctr: u64,
    /// Global signals snapshotted at the start of the cycle
    #[serde(skip)]
    pub signals: Vec<GlobalSignals>,
}

impl Context {
    pub fn new(ndata: u32, theta_cycles: i32, plus_cycles: i32, slow_interval: i32, seed: u64) -> Self {
        Self {
            ndata,
            cycle: 0,
            cycles_total: 0,
            theta_cycles: theta_cycles.max(2),
            plus_cycles: plus_cycles.clamp(1, theta_cycles.max(2) - 1),
            plus_phase: false,
            syn_ca_ctr: 0.0,
            slow_interval: slow_interval.max(1),
            slow_ctr: 0,
            seed,
            rand_ctr: 0,
            signals: vec![GlobalSignals::default(); ndata as usize],
        }
    }

    #[inline]
    pub fn minus_cycles(&self) -> i32 {
        self.theta_cycles - self.plus_cycles
    }

    /// Random key for flat (neuron, replica) index `index` this cycle
    #[inline]
    pub fn rand_key(&self, index: u32) -> NoiseKey {
        NoiseKey {
            index,
            counter: self.rand_ctr ^ self.seed.rotate_left(32),
        }
    }

    #[inline]
    pub fn signals(&self, di: usize) -> GlobalSignals {
        self.signals.get(di).copied().unwrap_or_default()
    }

    /// Advance counters after a completed cycle
    pub fn cycle_inc(&mut self) {
        self.cycle += 1;
        self.cycles_total += 1;
        self.syn_ca_ctr += 1.0;
        self.rand_ctr += 1;
    }

    /// Reset within-trial counters at the start of a trial
    pub fn new_state(&mut self) {
        self.cycle = 0;
        self.plus_phase = false;
    }

    /// Count a completed trial; true when slow adaptation is due
    pub fn slow_inc(&mut self) -> bool {
        self.slow_ctr += 1;
        if self.slow_ctr >= self.slow_interval {
            self.slow_ctr = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_clamps_phases() {
        let ctx = Context::new(1, 200, 500, 0, 1);
        assert_eq!(ctx.plus_cycles, 199);
        assert_eq!(ctx.minus_cycles(), 1);
        assert_eq!(ctx.slow_interval, 1);
    }

    #[test]
    fn test_slow_counter() {
        let mut ctx = Context::new(1, 200, 50, 3, 1);
        assert!(!ctx.slow_inc());
        assert!(!ctx.slow_inc());
        assert!(ctx.slow_inc());
        assert_eq!(ctx.slow_ctr, 0);
    }

    #[test]
    fn test_signals_handle_shared() {
        let h = SignalsHandle::new(2);
        let other = h.clone();
        other.set_reward(1, 0.7);
        other.update(5, |s| s.da = 1.0);
        let snap = h.snapshot();
        assert!(snap[1].has_reward);
        assert_eq!(snap[1].reward, 0.7);
        assert!(!snap[0].has_reward);
        assert_eq!(h.get(9), GlobalSignals::default());
    }
}
