// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Cycle Scheduler
//!
//! Drives the fixed phase order. One cycle:
//!
//! 1. snapshot global signals into the [`Context`]
//! 2. gather spikes (drain ring-buffer slots)
//! 3. pool inhibition
//! 4. neuron activation
//! 5. layer post-processing (reward prediction)
//! 6. send spikes
//! 7. synaptic calcium (when learning)
//! 8. advance counters
//!
//! One trial: NewState, minus-phase cycles, MinusPhase, PlusPhaseStart,
//! plus-phase cycles, PlusPhase, then DWt and WtFromDWt when learning.
//! Every phase is a barrier; a trial cannot be interrupted midway.

use crate::activation;
use crate::backend::{CPUBackend, ComputeBackend, CycleTiming};
use crate::context::{Context, SignalsHandle};
use crate::error::{Error, Result};
use crate::learning;
use crate::network::Network;
use crate::partition::WorkPartitioner;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Counters over the scheduler's lifetime
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub trials: u64,
    pub slow_updates: u64,
}

/// Outcome of one trial
#[derive(Debug, Clone)]
pub struct TrialResult {
    pub trial: u64,
    pub cycles: i32,
    pub learned: bool,
    pub slow_adapted: bool,
    pub elapsed_us: f64,
}

pub struct CycleScheduler {
    backend: Box<dyn ComputeBackend>,
    ctx: Context,
    signals: SignalsHandle,
    learning: bool,
    timing: CycleTiming,
    stats: SchedulerStats,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("backend", &self.backend.backend_name())
            .field("ctx", &self.ctx)
            .field("learning", &self.learning)
            .field("stats", &self.stats)
            .finish()
    }
}

impl CycleScheduler {
    /// The context's replica count must match the network's
    pub fn new(net: &Network, backend: Box<dyn ComputeBackend>, ctx: Context) -> Result<Self> {
        if ctx.ndata as usize != net.ndata() {
            return Err(Error::InvalidNetwork(format!(
                "context has {} data replicas, network {}",
                ctx.ndata,
                net.ndata()
            )));
        }
        let signals = SignalsHandle::new(net.ndata());
        info!(
            "[CYCLE-SCHED] {} on {}: {} cycles/trial ({} plus), slow every {} trials",
            net.name,
            backend.backend_name(),
            ctx.theta_cycles,
            ctx.plus_cycles,
            ctx.slow_interval
        );
        Ok(Self {
            backend,
            ctx,
            signals,
            learning: true,
            timing: CycleTiming::default(),
            stats: SchedulerStats::default(),
        })
    }

    /// CPU scheduler over `partitioner`
    pub fn with_cpu(net: &Network, ctx: Context, partitioner: WorkPartitioner) -> Result<Self> {
        Self::new(net, Box::new(CPUBackend::new(partitioner)), ctx)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Handle for writing reward and neuromodulators from outside
    pub fn signals(&self) -> SignalsHandle {
        self.signals.clone()
    }

    pub fn set_learning(&mut self, on: bool) {
        self.learning = on;
    }

    pub fn learning(&self) -> bool {
        self.learning
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    pub fn last_timing(&self) -> &CycleTiming {
        &self.timing
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Run one cycle over every neuron, pool and synapse
    pub fn cycle(&mut self, net: &mut Network) -> Result<()> {
        let start = Instant::now();
        self.signals.snapshot_into(&mut self.ctx.signals);
        let (nr, store) = net.split_mut();

        let t = Instant::now();
        self.backend.gather_spikes(nr, store, &self.ctx)?;
        self.timing.gather_us = t.elapsed().as_micros() as f64;

        let t = Instant::now();
        self.backend.pool_inhibition(nr, store, &self.ctx)?;
        self.timing.inhibition_us = t.elapsed().as_micros() as f64;

        let t = Instant::now();
        self.backend.cycle_neurons(nr, store, &self.ctx)?;
        activation::cycle_post(nr, store, &mut self.ctx, &self.signals);
        self.timing.activation_us = t.elapsed().as_micros() as f64;

        let t = Instant::now();
        self.backend.send_spikes(nr, store, &self.ctx)?;
        self.timing.send_us = t.elapsed().as_micros() as f64;

        let t = Instant::now();
        if self.learning {
            self.backend.synapse_ca(nr, store, &self.ctx)?;
        }
        self.timing.synapse_ca_us = t.elapsed().as_micros() as f64;

        self.timing.total_us = start.elapsed().as_micros() as f64;
        trace!(
            "[CYCLE-SCHED] cycle={} total={} took {:.0}us",
            self.ctx.cycle,
            self.ctx.cycles_total,
            self.timing.total_us
        );
        self.ctx.cycle_inc();
        self.stats.cycles += 1;
        Ok(())
    }

    /// Run `n` cycles without phase bookkeeping
    pub fn run_cycles(&mut self, net: &mut Network, n: usize) -> Result<()> {
        for _ in 0..n {
            self.cycle(net)?;
        }
        Ok(())
    }

    pub fn new_state(&mut self, net: &mut Network) -> Result<()> {
        activation::new_state(net, &mut self.ctx, self.backend.partitioner());
        self.backend.reset_conductances()
    }

    pub fn minus_phase(&mut self, net: &mut Network) {
        activation::minus_phase(net, self.backend.partitioner());
    }

    pub fn plus_phase_start(&mut self, net: &mut Network) {
        activation::plus_phase_start(net, &mut self.ctx, self.backend.partitioner());
    }

    pub fn plus_phase(&mut self, net: &mut Network) {
        activation::plus_phase(net, &self.ctx, self.backend.partitioner());
    }

    /// Weight changes from this trial's calcium
    pub fn dwt(&mut self, net: &mut Network) -> Result<()> {
        let (nr, store) = net.split_mut();
        self.backend.dwt(nr, store, &self.ctx)
    }

    /// Apply weight changes, target activity, slow adaptation when due and
    /// synaptic failure. Returns true when slow adaptation ran.
    pub fn wt_from_dwt(&mut self, net: &mut Network) -> Result<bool> {
        {
            let (nr, store) = net.split_mut();
            self.backend.wt_from_dwt(nr, store)?;
            learning::trg_avg_from_d(nr, store);
        }
        let slow = self.ctx.slow_inc();
        if slow {
            learning::slow_adapt(net);
            self.stats.slow_updates += 1;
        }
        {
            let (nr, store) = net.split_mut();
            learning::syn_fail(nr, store, &self.ctx, self.backend.partitioner());
        }
        self.backend.on_weights_changed()?;
        Ok(slow)
    }

    /// One full theta cycle
    pub fn run_trial(&mut self, net: &mut Network) -> Result<TrialResult> {
        let start = Instant::now();
        self.new_state(net)?;
        let minus = self.ctx.minus_cycles();
        for c in 0..self.ctx.theta_cycles {
            if c == minus {
                self.minus_phase(net);
                self.plus_phase_start(net);
            }
            self.cycle(net)?;
        }
        self.plus_phase(net);

        let mut slow_adapted = false;
        if self.learning {
            self.dwt(net)?;
            slow_adapted = self.wt_from_dwt(net)?;
        }
        self.stats.trials += 1;
        let result = TrialResult {
            trial: self.stats.trials,
            cycles: self.ctx.theta_cycles,
            learned: self.learning,
            slow_adapted,
            elapsed_us: start.elapsed().as_micros() as f64,
        };
        debug!(
            "[CYCLE-SCHED] trial {} done in {:.0}us (learn={}, slow={})",
            result.trial, result.elapsed_us, result.learned, result.slow_adapted
        );
        Ok(result)
    }

    /// Weights were replaced outside the scheduler
    pub fn weights_changed(&mut self) -> Result<()> {
        self.backend.on_weights_changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;
    use crate::network::NetworkBuilder;
    use crate::path::PathParams;
    use neurite_npu_neural::NeuronVar as NV;

    fn small() -> Network {
        let mut b = NetworkBuilder::new("sched");
        b.add_layer("in", LayerKind::Input, 4);
        b.add_layer("hid", LayerKind::Super, 4);
        b.connect_full("in", "hid", PathParams::excitatory());
        b.build().unwrap()
    }

    #[test]
    fn test_ndata_mismatch_rejected() {
        let net = small();
        let ctx = Context::new(2, 200, 50, 1, 1);
        assert!(CycleScheduler::with_cpu(&net, ctx, WorkPartitioner::sequential()).is_err());
    }

    #[test]
    fn test_trial_counters() {
        let mut net = small();
        let ctx = Context::new(1, 20, 5, 2, 1);
        let mut s = CycleScheduler::with_cpu(&net, ctx, WorkPartitioner::sequential()).unwrap();
        let r1 = s.run_trial(&mut net).unwrap();
        let r2 = s.run_trial(&mut net).unwrap();
        assert_eq!(r1.trial, 1);
        assert!(!r1.slow_adapted);
        assert!(r2.slow_adapted);
        assert_eq!(s.stats().cycles, 40);
        assert_eq!(s.context().cycles_total, 40);
        assert_eq!(s.context().cycle, 20);
        assert!(s.context().plus_phase);
    }

    #[test]
    fn test_signals_snapshot_once_per_cycle() {
        let mut net = small();
        let ctx = Context::new(1, 20, 5, 1, 1);
        let mut s = CycleScheduler::with_cpu(&net, ctx, WorkPartitioner::sequential()).unwrap();
        let handle = s.signals();
        handle.set_reward(0, 0.5);
        assert!(!s.context().signals(0).has_reward);
        s.cycle(&mut net).unwrap();
        assert!(s.context().signals(0).has_reward);
        assert_eq!(s.context().signals(0).reward, 0.5);
    }

    #[test]
    fn test_clamped_input_drives_hidden() {
        let mut net = small();
        let ctx = Context::new(1, 200, 50, 1, 1);
        let mut s = CycleScheduler::with_cpu(&net, ctx, WorkPartitioner::sequential()).unwrap();
        s.set_learning(false);
        net.apply_ext("in", 0, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        s.run_trial(&mut net).unwrap();
        let ge: f32 = (4..8).map(|ni| net.store.nrn_v(ni, NV::GeInt, 0)).sum();
        assert!(ge > 0.0);
    }
}
