// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Pool Inhibition
//!
//! Three passes, each a barrier:
//! 1. **Aggregate** (parallel over pools): every pool sums Spike, GeRaw and
//!    GeExt of its neurons, records cycle avg/max statistics and runs its
//!    own FS-FFFB step.
//! 2. **Between layers**: a layer pool's Gi becomes the max of its own and
//!    the layers it borrows from, read from a snapshot taken after pass 1 so
//!    the result never depends on layer order.
//! 3. **Sub-pools**: for layers with more than one pool, each sub-pool takes
//!    the max with the layer Gi (layer inhibition on) or pushes its Gi into
//!    the layer pool (layer inhibition off).

use crate::network::NetRef;
use crate::partition::WorkPartitioner;
use neurite_npu_neural::inhib::{layer_max, pool_max, save_orig, spikes_from_raw, zero_raw};
use neurite_npu_neural::{NeuronFlags, NeuronVar as NV, PoolVar as PV, VarAccess};
use neurite_npu_runtime::{NeuronRef, PoolView, StateStore, Strides};

/// Running average and maximum of one variable
#[derive(Debug, Clone, Copy, Default)]
struct AvgMax {
    sum: f32,
    max: f32,
    n: u32,
}

impl AvgMax {
    #[inline]
    fn update(&mut self, val: f32) {
        self.sum += val;
        if self.n == 0 || val > self.max {
            self.max = val;
        }
        self.n += 1;
    }

    #[inline]
    fn avg(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            self.sum / self.n as f32
        }
    }
}

const STAT_VARS: [(NV, PV, PV); 4] = [
    (NV::Act, PV::ActAvg, PV::ActMax),
    (NV::CaSpkP, PV::CaSpkPAvg, PV::CaSpkPMax),
    (NV::CaSpkD, PV::CaSpkDAvg, PV::CaSpkDMax),
    (NV::GeInt, PV::GeIntAvg, PV::GeIntMax),
];

/// Compute Gi for every pool of the network
pub fn pool_inhibition(net: NetRef<'_>, store: &mut StateStore, part: &WorkPartitioner) {
    let strides = *store.strides();
    let pb = strides.pool_block();
    let StateStore {
        neurons,
        flags,
        pools,
        ..
    } = store;
    let (neurons, flags) = (&*neurons, &*flags);
    part.for_each_mut(pools, pb, |pi, pblock| {
        pool_from_spikes(net, &strides, pi, pblock, neurons, flags);
    });
    between_layer_gi(net, &strides, pools);
    sub_pool_gi(net, &strides, pools);
}

/// Aggregate one pool's neurons and run its own inhibition step
pub fn pool_from_spikes(
    net: NetRef<'_>,
    strides: &Strides,
    pi: usize,
    pblock: &mut [f32],
    neurons: &[f32],
    flags: &[NeuronFlags],
) {
    let nd = strides.ndata as usize;
    let nb = strides.neuron_block();
    let pidx = &net.topology.pools[pi];
    let inhib = &net.layers[pidx.layer as usize].params.inhib;
    let gp = if pidx.is_layer_pool { &inhib.layer } else { &inhib.pool };

    for di in 0..nd {
        let mut p = PoolView::new(pblock, nd, di);
        zero_raw(&mut p);
        let mut stats = [AvgMax::default(); STAT_VARS.len()];
        for ni in pidx.neur_st as usize..pidx.neur_ed as usize {
            if flags[strides.flags(ni, di)].is_off() {
                continue;
            }
            let n = NeuronRef::new(&neurons[ni * nb..(ni + 1) * nb], nd, di);
            p.add(PV::FBsRaw, n.get(NV::Spike));
            p.add(PV::FFsRaw, n.get(NV::GeRaw));
            p.add(PV::GeExtRaw, n.get(NV::GeExt));
            for (st, (var, _, _)) in stats.iter_mut().zip(STAT_VARS) {
                st.update(n.get(var));
            }
        }
        for (st, (_, avg_var, max_var)) in stats.iter().zip(STAT_VARS) {
            p.set(avg_var, st.avg());
            p.set(max_var, st.max);
        }
        spikes_from_raw(&mut p, pidx.n_neurons());
        gp.inhib(&mut p);
    }
}

/// Layer pools take the max Gi over the layers they borrow inhibition from
pub fn between_layer_gi(net: NetRef<'_>, strides: &Strides, pools: &mut [f32]) {
    let nd = strides.ndata as usize;
    let borrowing = net
        .layers
        .iter()
        .any(|l| l.params.inhib.lay_inhib.is_on());
    if !borrowing {
        return;
    }
    let mut lay_gi = Vec::with_capacity(net.topology.layers.len() * nd);
    for ly in &net.topology.layers {
        for di in 0..nd {
            lay_gi.push(pools[strides.pool(ly.pool_st as usize, PV::Gi, di)]);
        }
    }

    for (li, layer) in net.layers.iter().enumerate() {
        let lay_inhib = &layer.params.inhib.lay_inhib;
        if !lay_inhib.is_on() {
            continue;
        }
        let lpi = net.topology.layers[li].pool_st as usize;
        for di in 0..nd {
            let idx = strides.pool(lpi, PV::Gi, di);
            let mut max_gi = pools[idx];
            for oi in lay_inhib.idxs.iter().flatten() {
                max_gi = max_gi.max(lay_gi[*oi as usize * nd + di]);
            }
            pools[idx] = max_gi;
        }
    }
}

/// Combine sub-pool and layer-pool inhibition
pub fn sub_pool_gi(net: NetRef<'_>, strides: &Strides, pools: &mut [f32]) {
    let nd = strides.ndata as usize;
    let pb = strides.pool_block();
    for (li, ly) in net.topology.layers.iter().enumerate() {
        if !ly.has_sub_pools() {
            continue;
        }
        let lay_on = net.layers[li].params.inhib.layer.on;
        let lpi = ly.pool_st as usize;
        let (head, tail) = pools.split_at_mut((lpi + 1) * pb);
        let lblock = &mut head[lpi * pb..];
        let sub_blocks = &mut tail[..(ly.n_pools as usize - 1) * pb];
        for di in 0..nd {
            let mut lpl = PoolView::new(lblock, nd, di);
            for sblock in sub_blocks.chunks_mut(pb) {
                let mut pl = PoolView::new(sblock, nd, di);
                if lay_on {
                    layer_max(&mut pl, lpl.get(PV::Gi));
                } else {
                    pool_max(&mut lpl, pl.get(PV::Gi));
                    save_orig(&mut lpl);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;
    use crate::network::{Network, NetworkBuilder};
    use crate::path::PathParams;

    fn pooled(lay_on: bool) -> Network {
        let mut b = NetworkBuilder::new("pools");
        b.add_layer("in", LayerKind::Input, 4);
        let hp = b.add_pooled_layer("hid", LayerKind::Super, 6, &[3, 3]);
        hp.inhib.layer.on = lay_on;
        b.connect_full("in", "hid", PathParams::excitatory());
        b.build().unwrap()
    }

    fn drive(net: &mut Network, ni: usize, spike: f32, ge_raw: f32) {
        net.store.set_nrn_v(ni, NV::Spike, 0, spike);
        net.store.set_nrn_v(ni, NV::GeRaw, 0, ge_raw);
    }

    #[test]
    fn test_aggregates_and_stats() {
        let mut net = pooled(true);
        let st = net.topology.layers[1].neur_st as usize;
        drive(&mut net, st, 1.0, 0.4);
        drive(&mut net, st + 1, 0.0, 0.2);
        net.store.set_nrn_v(st + 1, NV::Act, 0, 0.6);
        let (nr, store) = net.split_mut();
        pool_inhibition(nr, store, &WorkPartitioner::sequential());

        let lpi = net.topology.layers[1].pool_st as usize;
        assert_eq!(net.store.pool_v(lpi, PV::FBsRaw, 0), 1.0);
        assert!((net.store.pool_v(lpi, PV::FFsRaw, 0) - 0.6).abs() < 1e-6);
        assert!((net.store.pool_v(lpi, PV::FFs, 0) - 0.1).abs() < 1e-6);
        assert_eq!(net.store.pool_v(lpi, PV::ActMax, 0), 0.6);
        assert!((net.store.pool_v(lpi, PV::ActAvg, 0) - 0.1).abs() < 1e-6);
        // first sub-pool saw both neurons, second none
        assert_eq!(net.store.pool_v(lpi + 1, PV::FBsRaw, 0), 1.0);
        assert_eq!(net.store.pool_v(lpi + 2, PV::FBsRaw, 0), 0.0);
        assert!(net.store.pool_v(lpi, PV::Gi, 0) > 0.0);
    }

    #[test]
    fn test_sub_pools_take_layer_max() {
        let mut net = pooled(true);
        let st = net.topology.layers[1].neur_st as usize;
        for ni in st..st + 3 {
            drive(&mut net, ni, 1.0, 1.0);
        }
        let (nr, store) = net.split_mut();
        pool_inhibition(nr, store, &WorkPartitioner::sequential());
        let lpi = net.topology.layers[1].pool_st as usize;
        let lay_gi = net.store.pool_v(lpi, PV::Gi, 0);
        // the quiet pool has no drive of its own
        assert_eq!(net.store.pool_v(lpi + 2, PV::Gi, 0), lay_gi);
        assert_eq!(net.store.pool_v(lpi + 2, PV::LayGi, 0), lay_gi);
    }

    #[test]
    fn test_layer_off_takes_pool_max() {
        let mut net = pooled(false);
        let st = net.topology.layers[1].neur_st as usize;
        for ni in st..st + 3 {
            drive(&mut net, ni, 1.0, 1.0);
        }
        let (nr, store) = net.split_mut();
        pool_inhibition(nr, store, &WorkPartitioner::sequential());
        let lpi = net.topology.layers[1].pool_st as usize;
        let sub_gi = net.store.pool_v(lpi + 1, PV::Gi, 0);
        assert!(sub_gi > 0.0);
        assert_eq!(net.store.pool_v(lpi, PV::Gi, 0), sub_gi);
        assert_eq!(net.store.pool_v(lpi, PV::GiOrig, 0), sub_gi);
    }

    #[test]
    fn test_off_neurons_ignored() {
        let mut net = pooled(true);
        let st = net.topology.layers[1].neur_st as usize;
        drive(&mut net, st, 1.0, 1.0);
        net.lesion_neurons("hid", &[0], true).unwrap();
        let (nr, store) = net.split_mut();
        pool_inhibition(nr, store, &WorkPartitioner::sequential());
        let lpi = net.topology.layers[1].pool_st as usize;
        assert_eq!(net.store.pool_v(lpi, PV::FBsRaw, 0), 0.0);
        assert_eq!(net.store.pool_v(lpi, PV::FFsRaw, 0), 0.0);
    }

    #[test]
    fn test_between_layer_borrowing() {
        let mut b = NetworkBuilder::new("borrow");
        b.add_layer("a", LayerKind::Super, 4);
        b.add_layer("b", LayerKind::Super, 4).inhib.lay_inhib.layers = vec!["a".into()];
        let mut net = b.build().unwrap();
        for ni in 0..4 {
            drive(&mut net, ni, 1.0, 1.0);
        }
        let (nr, store) = net.split_mut();
        pool_inhibition(nr, store, &WorkPartitioner::sequential());
        let a_gi = net.store.pool_v(0, PV::Gi, 0);
        assert!(a_gi > 0.0);
        assert_eq!(net.store.pool_v(1, PV::Gi, 0), a_gi);
        // own inhibition stays recorded
        assert_eq!(net.store.pool_v(1, PV::GiOrig, 0), 0.0);
    }

    #[test]
    fn test_borrowing_reads_this_cycle_without_chaining() {
        // a borrows from b, b from c; only c is driven
        let mut b = NetworkBuilder::new("chain");
        b.add_layer("a", LayerKind::Super, 4).inhib.lay_inhib.layers = vec!["b".into()];
        b.add_layer("b", LayerKind::Super, 4).inhib.lay_inhib.layers = vec!["c".into()];
        b.add_layer("c", LayerKind::Super, 4);
        let mut net = b.build().unwrap();
        let c_st = net.topology.layers[2].neur_st as usize;
        for ni in c_st..c_st + 4 {
            drive(&mut net, ni, 1.0, 1.0);
        }
        let (nr, store) = net.split_mut();
        pool_inhibition(nr, store, &WorkPartitioner::sequential());

        let pool = |li: usize| net.topology.layers[li].pool_st as usize;
        let c_gi = net.store.pool_v(pool(2), PV::Gi, 0);
        assert!(c_gi > 0.0);
        // b sees c's Gi from this same cycle
        assert_eq!(net.store.pool_v(pool(1), PV::Gi, 0), c_gi);
        // a sees b's own Gi from the aggregate pass, not what b borrowed
        assert_eq!(net.store.pool_v(pool(0), PV::Gi, 0), 0.0);
    }
}
