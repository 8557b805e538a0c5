// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! Structure-of-arrays state store
//!
//! One flat `Vec` per entity kind, addressed through [`Strides`]. The
//! conductance buffer is the only structure written concurrently by more
//! than one owner, so it holds fixed-point `AtomicI32` values; integer
//! addition commutes, which keeps delivery independent of thread order.

use crate::error::{Result, RuntimeError};
use crate::strides::{Strides, LAYOUT_VERSION};
use crate::topology::Topology;
use crate::view::{NeuronRef, NeuronView, PoolRef, PoolView};
use ndarray::{ArrayView2, ShapeBuilder};
use neurite_npu_neural::{NeuronAvgVar, NeuronFlags, NeuronVar, PoolVar, SynCaVar, SynapseVar};
use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::info;

/// Below this many elements, buffer resets run sequentially
const PAR_RESET_MIN: usize = 1 << 16;

/// All mutable state of a built network
pub struct StateStore {
    strides: Strides,
    /// `[ni][var][di]`
    pub neurons: Vec<f32>,
    /// `[ni][var]`, shared across replicas
    pub neuron_avgs: Vec<f32>,
    /// `[ni][di]`
    pub flags: Vec<NeuronFlags>,
    /// `[syni][var]`, shared across replicas
    pub synapses: Vec<f32>,
    /// `[syni][var][di]`
    pub syn_cas: Vec<f32>,
    /// `[pi][var][di]`
    pub pools: Vec<f32>,
    /// Per-path integrated conductance, `[ni][k][di]`
    pub gsyn: Vec<f32>,
    /// Delayed conductance ring buffers, fixed point
    pub gbuf: Vec<AtomicI32>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("strides", &self.strides)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Allocate zeroed storage for a finalized topology
    pub fn new(topology: &Topology, ndata: u32) -> Result<Self> {
        if !topology.is_finalized() {
            return Err(RuntimeError::InvalidParameters(
                "topology must be finalized before allocating state".into(),
            ));
        }
        if ndata == 0 {
            return Err(RuntimeError::InvalidParameters("ndata must be at least 1".into()));
        }
        let strides = Strides {
            layout_version: LAYOUT_VERSION,
            ndata,
            n_neurons: topology.n_neurons() as u32,
            n_pools: topology.n_pools() as u32,
            n_synapses: topology.n_synapses() as u32,
            max_recv_paths: topology.max_recv_paths.max(1),
            gbuf_len: topology.gbuf_len,
        };

        // GPU kernels index with u32
        for len in [
            strides.neurons_len(),
            strides.syn_cas_len(),
            strides.pools_len(),
            strides.gsyn_len(),
            strides.gbuf_total(),
        ] {
            if len > u32::MAX as usize {
                return Err(RuntimeError::CapacityExceeded {
                    requested: len,
                    available: u32::MAX as usize,
                });
            }
        }

        let gbuf = (0..strides.gbuf_total()).map(|_| AtomicI32::new(0)).collect();
        let store = Self {
            neurons: vec![0.0; strides.neurons_len()],
            neuron_avgs: vec![0.0; strides.neuron_avgs_len()],
            flags: vec![NeuronFlags::EMPTY; strides.flags_len()],
            synapses: vec![0.0; strides.synapses_len()],
            syn_cas: vec![0.0; strides.syn_cas_len()],
            pools: vec![0.0; strides.pools_len()],
            gsyn: vec![0.0; strides.gsyn_len()],
            gbuf,
            strides,
        };
        info!(
            "[NPU-STORE] Allocated state: {} neurons x {} replicas, {} synapses, {} pools, {:.2} MB",
            strides.n_neurons,
            ndata,
            strides.n_synapses,
            strides.n_pools,
            store.size_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(store)
    }

    #[inline(always)]
    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    #[inline(always)]
    pub fn ndata(&self) -> usize {
        self.strides.ndata as usize
    }

    pub fn size_bytes(&self) -> usize {
        4 * (self.neurons.len()
            + self.neuron_avgs.len()
            + self.flags.len()
            + self.synapses.len()
            + self.syn_cas.len()
            + self.pools.len()
            + self.gsyn.len()
            + self.gbuf.len())
    }

    // ---- neurons ----

    #[inline(always)]
    pub fn nrn_v(&self, ni: usize, var: NeuronVar, di: usize) -> f32 {
        self.neurons[self.strides.neuron(ni, var, di)]
    }

    #[inline(always)]
    pub fn set_nrn_v(&mut self, ni: usize, var: NeuronVar, di: usize, val: f32) {
        let idx = self.strides.neuron(ni, var, di);
        self.neurons[idx] = val;
    }

    #[inline(always)]
    pub fn add_nrn_v(&mut self, ni: usize, var: NeuronVar, di: usize, delta: f32) {
        let idx = self.strides.neuron(ni, var, di);
        self.neurons[idx] += delta;
    }

    #[inline(always)]
    pub fn nrn_avg_v(&self, ni: usize, var: NeuronAvgVar) -> f32 {
        self.neuron_avgs[self.strides.neuron_avg(ni, var)]
    }

    #[inline(always)]
    pub fn set_nrn_avg_v(&mut self, ni: usize, var: NeuronAvgVar, val: f32) {
        let idx = self.strides.neuron_avg(ni, var);
        self.neuron_avgs[idx] = val;
    }

    #[inline(always)]
    pub fn nrn_flags(&self, ni: usize, di: usize) -> NeuronFlags {
        self.flags[self.strides.flags(ni, di)]
    }

    #[inline(always)]
    pub fn nrn_flags_mut(&mut self, ni: usize, di: usize) -> &mut NeuronFlags {
        let idx = self.strides.flags(ni, di);
        &mut self.flags[idx]
    }

    /// True when the neuron is lesioned in replica 0
    #[inline(always)]
    pub fn nrn_is_off(&self, ni: usize) -> bool {
        self.nrn_flags(ni, 0).is_off()
    }

    pub fn neuron_ref(&self, ni: usize, di: usize) -> NeuronRef<'_> {
        let nb = self.strides.neuron_block();
        NeuronRef::new(&self.neurons[ni * nb..(ni + 1) * nb], self.ndata(), di)
    }

    pub fn neuron_view(&mut self, ni: usize, di: usize) -> NeuronView<'_> {
        let nb = self.strides.neuron_block();
        let ndata = self.ndata();
        NeuronView::new(&mut self.neurons[ni * nb..(ni + 1) * nb], ndata, di)
    }

    /// `[neuron, replica]` view of one variable
    pub fn var_view(&self, var: NeuronVar) -> Result<ArrayView2<'_, f32>> {
        let nd = self.ndata();
        let n = self.strides.n_neurons as usize;
        if n == 0 {
            return ArrayView2::from_shape((0, nd), &self.neurons[..0])
                .map_err(|e| RuntimeError::StorageError(e.to_string()));
        }
        let start = var.index() * nd;
        ArrayView2::from_shape((n, nd).strides((self.strides.neuron_block(), 1)), &self.neurons[start..])
            .map_err(|e| RuntimeError::StorageError(e.to_string()))
    }

    // ---- synapses ----

    #[inline(always)]
    pub fn syn_v(&self, syni: usize, var: SynapseVar) -> f32 {
        self.synapses[self.strides.synapse(syni, var)]
    }

    #[inline(always)]
    pub fn set_syn_v(&mut self, syni: usize, var: SynapseVar, val: f32) {
        let idx = self.strides.synapse(syni, var);
        self.synapses[idx] = val;
    }

    #[inline(always)]
    pub fn syn_ca_v(&self, syni: usize, var: SynCaVar, di: usize) -> f32 {
        self.syn_cas[self.strides.syn_ca(syni, var, di)]
    }

    #[inline(always)]
    pub fn set_syn_ca_v(&mut self, syni: usize, var: SynCaVar, di: usize, val: f32) {
        let idx = self.strides.syn_ca(syni, var, di);
        self.syn_cas[idx] = val;
    }

    // ---- pools ----

    #[inline(always)]
    pub fn pool_v(&self, pi: usize, var: PoolVar, di: usize) -> f32 {
        self.pools[self.strides.pool(pi, var, di)]
    }

    #[inline(always)]
    pub fn set_pool_v(&mut self, pi: usize, var: PoolVar, di: usize, val: f32) {
        let idx = self.strides.pool(pi, var, di);
        self.pools[idx] = val;
    }

    pub fn pool_ref(&self, pi: usize, di: usize) -> PoolRef<'_> {
        let pb = self.strides.pool_block();
        PoolRef::new(&self.pools[pi * pb..(pi + 1) * pb], self.ndata(), di)
    }

    pub fn pool_view(&mut self, pi: usize, di: usize) -> PoolView<'_> {
        let pb = self.strides.pool_block();
        let ndata = self.ndata();
        PoolView::new(&mut self.pools[pi * pb..(pi + 1) * pb], ndata, di)
    }

    // ---- conductance buffers ----

    #[inline(always)]
    pub fn gbuf_load(&self, idx: usize) -> i32 {
        self.gbuf[idx].load(Ordering::Relaxed)
    }

    /// Clear every ring-buffer slot and the per-path GSyn values
    pub fn reset_conductances(&mut self) {
        if self.gbuf.len() >= PAR_RESET_MIN {
            self.gbuf.par_iter().for_each(|g| g.store(0, Ordering::Relaxed));
        } else {
            for g in &self.gbuf {
                g.store(0, Ordering::Relaxed);
            }
        }
        if self.gsyn.len() >= PAR_RESET_MIN {
            self.gsyn.par_iter_mut().for_each(|g| *g = 0.0);
        } else {
            self.gsyn.fill(0.0);
        }
    }

    /// True when every ring-buffer slot is zero
    pub fn gbuf_is_clear(&self) -> bool {
        self.gbuf.iter().all(|g| g.load(Ordering::Relaxed) == 0)
    }

    /// Copy the fixed-point buffer out as plain integers
    pub fn gbuf_snapshot(&self) -> Vec<i32> {
        self.gbuf.iter().map(|g| g.load(Ordering::Relaxed)).collect()
    }

    /// Overwrite the fixed-point buffer from plain integers
    pub fn gbuf_restore(&mut self, values: &[i32]) -> Result<()> {
        if values.len() != self.gbuf.len() {
            return Err(RuntimeError::LayoutMismatch {
                what: "gbuf",
                expected: self.gbuf.len(),
                found: values.len(),
            });
        }
        for (g, &v) in self.gbuf.iter_mut().zip(values) {
            *g.get_mut() = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ndata: u32) -> StateStore {
        let mut t = Topology::new();
        t.add_layer(2, &[]).unwrap();
        t.add_layer(3, &[]).unwrap();
        t.add_path(0, 1, 2, &[(0, 0), (1, 2)]).unwrap();
        t.finalize().unwrap();
        StateStore::new(&t, ndata).unwrap()
    }

    #[test]
    fn test_requires_finalized() {
        let mut t = Topology::new();
        t.add_layer(2, &[]).unwrap();
        assert!(StateStore::new(&t, 1).is_err());
        t.finalize().unwrap();
        assert!(StateStore::new(&t, 0).is_err());
    }

    #[test]
    fn test_sizes() {
        let s = store(2);
        assert_eq!(s.neurons.len(), 5 * NeuronVar::COUNT * 2);
        assert_eq!(s.gbuf.len(), 3 * 3 * 2);
        assert_eq!(s.synapses.len(), 2 * SynapseVar::COUNT);
        assert!(s.gbuf_is_clear());
    }

    #[test]
    fn test_var_view_matches_accessors() {
        let mut s = store(2);
        s.set_nrn_v(3, NeuronVar::Vm, 1, 0.7);
        s.set_nrn_v(0, NeuronVar::Vm, 0, 0.2);
        let v = s.var_view(NeuronVar::Vm).unwrap();
        assert_eq!(v.dim(), (5, 2));
        assert_eq!(v[[3, 1]], 0.7);
        assert_eq!(v[[0, 0]], 0.2);
        assert_eq!(v[[4, 1]], 0.0);
    }

    #[test]
    fn test_neuron_view_writes_store() {
        let mut s = store(1);
        {
            use neurite_npu_neural::VarAccess;
            let mut v = s.neuron_view(4, 0);
            v.set(NeuronVar::Ge, 0.3);
        }
        assert_eq!(s.nrn_v(4, NeuronVar::Ge, 0), 0.3);
    }

    #[test]
    fn test_gbuf_snapshot_restore() {
        let mut s = store(1);
        let mut vals = s.gbuf_snapshot();
        vals[4] = 77;
        s.gbuf_restore(&vals).unwrap();
        assert_eq!(s.gbuf_load(4), 77);
        s.reset_conductances();
        assert!(s.gbuf_is_clear());
        assert!(s.gbuf_restore(&[1, 2]).is_err());
    }
}
