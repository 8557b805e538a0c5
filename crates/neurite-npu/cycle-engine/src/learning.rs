// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Learning
//!
//! ## Per cycle
//! [`synapse_ca`] integrates synaptic calcium for every learning synapse
//! whose sender or receiver spiked. Synapses that stay silent are caught up
//! lazily from their `CaUpT` stamp the next time they are touched.
//!
//! ## Per trial
//! - [`dwt`]: per-replica error (`DiDWt`) summed into `DWt`, then optional
//!   per-receiver mean subtraction
//! - [`wt_from_dwt`]: `DWt` into `LWt` and `Wt`, accumulating `DSWt`
//! - [`trg_avg_from_d`]: per-neuron target activity from its error
//!
//! ## Slow (every `slow_interval` trials)
//! [`slow_adapt`]: inhibition gain adaptation, SWt adaptation and synaptic
//! scaling toward each neuron's target activity.
//!
//! Synapse-parallel passes write only the synapse's own block. Passes that
//! group synapses by receiver run sequentially.

use crate::context::Context;
use crate::layer::LayerKind;
use crate::network::{NetRef, Network};
use crate::partition::WorkPartitioner;
use crate::path::PathType;
use neurite_npu_neural::{
    random_number, NeuronAvgVar as NAV, NeuronFlags, NeuronVar as NV, RandFun, SynCaVar as CV,
    SynapseVar as SV, VarAccess,
};
use neurite_npu_runtime::{NeuronRef, StateStore, Strides, SynCaView, Topology};
use tracing::debug;

#[inline]
fn nrn<'a>(neurons: &'a [f32], strides: &Strides, ni: usize, di: usize) -> NeuronRef<'a> {
    let nb = strides.neuron_block();
    NeuronRef::new(&neurons[ni * nb..(ni + 1) * nb], strides.ndata as usize, di)
}

#[inline]
fn ca_above(n: &NeuronRef<'_>, thr: f32) -> bool {
    n.get(NV::CaSpkP) >= thr || n.get(NV::CaSpkD) >= thr
}

/// Synaptic calcium update for this cycle
pub fn synapse_ca(net: NetRef<'_>, store: &mut StateStore, ctx: &Context, part: &WorkPartitioner) {
    let strides = *store.strides();
    let cb = strides.syn_ca_block();
    let ctr = ctx.syn_ca_ctr as i32;
    let StateStore {
        neurons,
        flags,
        syn_cas,
        ..
    } = store;
    let (neurons, flags) = (&*neurons, &*flags);
    part.for_each_mut(syn_cas, cb, |syni, cblock| {
        synapse_ca_syn(net, &strides, syni, cblock, neurons, flags, ctr);
    });
}

/// One synapse, all replicas: catch up to the previous cycle, then one
/// driven step from the product of sender and receiver `CaSyn`
pub fn synapse_ca_syn(
    net: NetRef<'_>,
    strides: &Strides,
    syni: usize,
    cblock: &mut [f32],
    neurons: &[f32],
    flags: &[NeuronFlags],
    ctr: i32,
) {
    let sy = &net.topology.syns[syni];
    let path = &net.paths[sy.path as usize];
    if !path.learns() {
        return;
    }
    let kinase = &path.params.learn.kinase_ca;
    let thr = net.layers[path.recv_layer as usize].params.learn.ca_learn.updt_thr;
    let nd = strides.ndata as usize;
    let (si, ri) = (sy.send as usize, sy.recv as usize);

    for di in 0..nd {
        if flags[strides.flags(si, di)].is_off() || flags[strides.flags(ri, di)].is_off() {
            continue;
        }
        let s = nrn(neurons, strides, si, di);
        let r = nrn(neurons, strides, ri, di);
        let s_fire = s.get(NV::Spike) > 0.0 && ca_above(&s, thr);
        let r_fire = r.get(NV::Spike) > 0.0 && ca_above(&r, thr);
        if !s_fire && !r_fire {
            continue;
        }
        let mut c = SynCaView::new(cblock, nd, di);
        let (mut m, mut p, mut d) = (c.get(CV::CaM), c.get(CV::CaP), c.get(CV::CaD));
        kinase.cur_ca(ctr - 1, c.get(CV::CaUpT) as i32, &mut m, &mut p, &mut d);
        let ca = kinase.spike_g * s.get(NV::CaSyn) * r.get(NV::CaSyn);
        kinase.dt.from_ca(ca, &mut m, &mut p, &mut d);
        c.set(CV::CaM, m);
        c.set(CV::CaP, p);
        c.set(CV::CaD, d);
        c.set(CV::CaUpT, ctr as f32);
    }
}

/// Weight changes for the trial, all learning paths
pub fn dwt(net: NetRef<'_>, store: &mut StateStore, ctx: &Context, part: &WorkPartitioner) {
    let strides = *store.strides();
    let cb = strides.syn_ca_block();
    let ctr = ctx.syn_ca_ctr as i32;
    {
        let StateStore {
            neurons,
            flags,
            synapses,
            syn_cas,
            ..
        } = &mut *store;
        let (neurons, flags) = (&*neurons, &*flags);
        part.for_each_mut2(synapses, Strides::N_SYN_VARS, syn_cas, cb, |syni, sblock, cblock| {
            dwt_synapse(net, &strides, syni, sblock, cblock, neurons, flags, ctr);
        });
    }
    dwt_sub_mean(net, store);
}

/// `DWt += sum over replicas of RLRate * LRate * err`; failed synapses
/// (`Wt == 0`) do not learn
#[allow(clippy::too_many_arguments)]
pub fn dwt_synapse(
    net: NetRef<'_>,
    strides: &Strides,
    syni: usize,
    sblock: &mut [f32],
    cblock: &mut [f32],
    neurons: &[f32],
    flags: &[NeuronFlags],
    ctr: i32,
) {
    let sy = &net.topology.syns[syni];
    let path = &net.paths[sy.path as usize];
    if !path.learns() {
        return;
    }
    let learn = &path.params.learn;
    let nd = strides.ndata as usize;
    let (si, ri) = (sy.send as usize, sy.recv as usize);
    let wt = sblock[SV::Wt.index()];
    let lwt = sblock[SV::LWt.index()];
    let mut total = 0.0;

    for di in 0..nd {
        let mut c = SynCaView::new(cblock, nd, di);
        let ca_upt = c.get(CV::CaUpT);
        let (mut m, mut p, mut d) = (c.get(CV::CaM), c.get(CV::CaP), c.get(CV::CaD));
        if ca_upt >= 0.0 {
            learn.kinase_ca.cur_ca(ctr, ca_upt as i32, &mut m, &mut p, &mut d);
            c.set(CV::CaM, m);
            c.set(CV::CaP, p);
            c.set(CV::CaD, d);
            c.set(CV::CaUpT, ctr as f32);
        }
        c.set(CV::DiDWt, 0.0);
        if wt == 0.0 || flags[strides.flags(si, di)].is_off() || flags[strides.flags(ri, di)].is_off() {
            continue;
        }
        let s = nrn(neurons, strides, si, di);
        let r = nrn(neurons, strides, ri, di);
        let err = learn.err(s.get(NV::CaSpkP), r.get(NV::CaSpkP), r.get(NV::CaSpkD), p, d, lwt);
        let di_dwt = r.get(NV::RLRate) * learn.lrate.eff * err;
        c.set(CV::DiDWt, di_dwt);
        total += di_dwt;
    }
    sblock[SV::DWt.index()] += total;
}

/// Subtract `dwt_sub_mean` times the mean nonzero DWt of each receiver
pub fn dwt_sub_mean(net: NetRef<'_>, store: &mut StateStore) {
    for (pi, path) in net.paths.iter().enumerate() {
        let sm = path.params.learn.dwt_sub_mean;
        if !path.learns() || sm == 0.0 {
            continue;
        }
        for lay_ri in 0..net.topology.paths[pi].recv_n as usize {
            let syns = net.topology.recv_syns(pi, lay_ri);
            let (mut sum, mut nnz) = (0.0f32, 0usize);
            for &syni in syns {
                let dw = store.syn_v(syni as usize, SV::DWt);
                if dw != 0.0 {
                    sum += dw;
                    nnz += 1;
                }
            }
            if nnz <= 1 {
                continue;
            }
            let mean = sm * sum / nnz as f32;
            for &syni in syns {
                let dw = store.syn_v(syni as usize, SV::DWt);
                if dw != 0.0 {
                    store.set_syn_v(syni as usize, SV::DWt, dw - mean);
                }
            }
        }
    }
}

/// Apply DWt to LWt and Wt; DWt is also accumulated into DSWt for slow
/// SWt adaptation
pub fn wt_from_dwt(net: NetRef<'_>, store: &mut StateStore, part: &WorkPartitioner) {
    part.for_each_mut(&mut store.synapses, Strides::N_SYN_VARS, |syni, sblock| {
        let path = &net.paths[net.topology.syns[syni].path as usize];
        if !path.learns() {
            return;
        }
        let dwt = sblock[SV::DWt.index()];
        sblock[SV::DSWt.index()] += dwt;
        let (mut wt, mut lwt) = (sblock[SV::Wt.index()], sblock[SV::LWt.index()]);
        path.params.swt.wt_from_dwt(&mut wt, &mut lwt, dwt, sblock[SV::SWt.index()]);
        sblock[SV::Wt.index()] = wt;
        sblock[SV::LWt.index()] = lwt;
        sblock[SV::DWt.index()] = 0.0;
    });
}

/// Neuron index groups a layer normalizes over: its sub-pools when asked
/// and present, otherwise the whole layer
fn neuron_groups(topology: &Topology, li: usize, by_pool: bool) -> Vec<std::ops::Range<usize>> {
    let ly = &topology.layers[li];
    if by_pool && ly.has_sub_pools() {
        (ly.pool_st + 1..ly.pool_st + ly.n_pools)
            .map(|pi| {
                let p = &topology.pools[pi as usize];
                p.neur_st as usize..p.neur_ed as usize
            })
            .collect()
    } else {
        vec![ly.neurons()]
    }
}

/// True when the layer adjusts TrgAvg and scales synapses toward it
#[inline]
fn learns_trg_avg(net: NetRef<'_>, li: usize) -> bool {
    let layer = &net.layers[li];
    layer.params.learn.trg_avg_act.on && !layer.kind.is_clamped_kind()
}

/// Fold the accumulated DTrgAvg into TrgAvg, mean-subtracted per group
pub fn trg_avg_from_d(net: NetRef<'_>, store: &mut StateStore) {
    for li in 0..net.layers.len() {
        if !learns_trg_avg(net, li) {
            continue;
        }
        let params = &net.layers[li].params;
        let ta = &params.learn.trg_avg_act;
        let by_pool = ta.pool && params.inhib.pool.on;
        for group in neuron_groups(net.topology, li, by_pool) {
            let (mut sum, mut nn) = (0.0f32, 0usize);
            for ni in group.clone() {
                if store.nrn_is_off(ni) {
                    continue;
                }
                sum += store.nrn_avg_v(ni, NAV::DTrgAvg);
                nn += 1;
            }
            if nn == 0 {
                continue;
            }
            let avg = ta.sub_mean * sum / nn as f32;
            for ni in group {
                if store.nrn_is_off(ni) {
                    continue;
                }
                let trg = store.nrn_avg_v(ni, NAV::TrgAvg) + store.nrn_avg_v(ni, NAV::DTrgAvg) - avg;
                store.set_nrn_avg_v(ni, NAV::TrgAvg, ta.trg_range.clip(trg));
                store.set_nrn_avg_v(ni, NAV::DTrgAvg, 0.0);
            }
        }
    }
}

/// All slow adaptation: inhibition gain, AvgDif, SWt and synaptic scaling
pub fn slow_adapt(net: &mut Network) {
    adapt_inhib(net);
    let (nr, store) = net.split_mut();
    avg_dif_from_trg_avg(nr, store);
    for pi in 0..nr.paths.len() {
        swt_from_wt(nr, store, pi);
        syn_scale(nr, store, pi);
    }
    debug!("[NPU-LEARN] Slow adaptation for {} paths", nr.paths.len());
}

/// Move each layer's GiMult toward its target minus-phase activity
pub fn adapt_inhib(net: &mut Network) {
    for layer in net.layers.iter_mut() {
        let act_avg = &layer.params.inhib.act_avg;
        if !act_avg.adapt_gi || layer.kind == LayerKind::Input {
            continue;
        }
        let act = layer.act_avg.act_m_avg;
        if act_avg.adapt(&mut layer.act_avg.gi_mult, act) {
            debug!("[NPU-LEARN] {} gi_mult {:.4}", layer.name, layer.act_avg.gi_mult);
        }
    }
}

/// AvgPct is a neuron's long-run activity relative to its pool average,
/// AvgDif its distance from TrgAvg
pub fn avg_dif_from_trg_avg(net: NetRef<'_>, store: &mut StateStore) {
    for li in 0..net.layers.len() {
        for group in neuron_groups(net.topology, li, true) {
            let (mut sum, mut nn) = (0.0f32, 0usize);
            for ni in group.clone() {
                if store.nrn_is_off(ni) {
                    continue;
                }
                sum += store.nrn_avg_v(ni, NAV::ActAvg);
                nn += 1;
            }
            if nn == 0 {
                continue;
            }
            let pl_avg = sum / nn as f32;
            if pl_avg < 0.0001 {
                continue;
            }
            for ni in group {
                if store.nrn_is_off(ni) {
                    continue;
                }
                let apct = store.nrn_avg_v(ni, NAV::ActAvg) / pl_avg;
                store.set_nrn_avg_v(ni, NAV::AvgPct, apct);
                store.set_nrn_avg_v(ni, NAV::AvgDif, apct - store.nrn_avg_v(ni, NAV::TrgAvg));
            }
        }
    }
}

/// Soft-bounded, zero-summed SWt update from accumulated DSWt
pub fn swt_from_wt(net: NetRef<'_>, store: &mut StateStore, pi: usize) {
    let path = &net.paths[pi];
    let sw = &path.params.swt;
    if !path.learns() || !sw.adapt.on || net.layers[path.recv_layer as usize].kind.is_target() {
        return;
    }
    let (mn, mx) = (sw.limit.min, sw.limit.max);
    for lay_ri in 0..net.topology.paths[pi].recv_n as usize {
        let syns = net.topology.recv_syns(pi, lay_ri);
        if syns.is_empty() {
            continue;
        }
        let mut avg = 0.0f32;
        for &syni in syns {
            let syni = syni as usize;
            let swt = store.syn_v(syni, SV::SWt);
            let dswt = store.syn_v(syni, SV::DSWt);
            let dswt = if dswt >= 0.0 { dswt * (mx - swt) } else { dswt * (swt - mn) };
            store.set_syn_v(syni, SV::DSWt, dswt);
            avg += dswt;
        }
        avg = sw.adapt.sub_mean * avg / syns.len() as f32;
        for &syni in syns {
            let syni = syni as usize;
            let old_swt = store.syn_v(syni, SV::SWt);
            let mut wt = store.syn_v(syni, SV::Wt);
            if wt == 0.0 {
                wt = sw.wt_val(old_swt, store.syn_v(syni, SV::LWt));
            }
            let swt = sw.clip_swt(old_swt + sw.adapt.lrate * (store.syn_v(syni, SV::DSWt) - avg));
            let lwt = sw.lwt_from_wts(wt, swt);
            store.set_syn_v(syni, SV::SWt, swt);
            store.set_syn_v(syni, SV::DSWt, 0.0);
            store.set_syn_v(syni, SV::LWt, lwt);
            store.set_syn_v(syni, SV::Wt, sw.wt_val(swt, lwt));
        }
    }
}

/// Scale a receiver's LWt toward its target activity, soft-bounded
pub fn syn_scale(net: NetRef<'_>, store: &mut StateStore, pi: usize) {
    let path = &net.paths[pi];
    let rli = path.recv_layer as usize;
    if !path.learns() || path.params.path_type == PathType::Inhibitory || !learns_trg_avg(net, rli) {
        return;
    }
    let lr = net.layers[rli].params.learn.trg_avg_act.syn_scale_rate;
    let sw = &path.params.swt;
    let recv_st = net.topology.paths[pi].recv_neur_st as usize;
    for lay_ri in 0..net.topology.paths[pi].recv_n as usize {
        let ri = recv_st + lay_ri;
        if store.nrn_is_off(ri) {
            continue;
        }
        let adif = -lr * store.nrn_avg_v(ri, NAV::AvgDif);
        for &syni in net.topology.recv_syns(pi, lay_ri) {
            let syni = syni as usize;
            let lwt = store.syn_v(syni, SV::LWt);
            let swt = store.syn_v(syni, SV::SWt);
            let lwt = if adif >= 0.0 {
                lwt + (1.0 - lwt) * adif * swt
            } else {
                lwt + lwt * adif * swt
            };
            let lwt = lwt.clamp(0.0, 1.0);
            store.set_syn_v(syni, SV::LWt, lwt);
            store.set_syn_v(syni, SV::Wt, sw.wt_val(swt, lwt));
        }
    }
}

/// Restore previously failed weights and draw new failures
pub fn syn_fail(net: NetRef<'_>, store: &mut StateStore, ctx: &Context, part: &WorkPartitioner) {
    if net.paths.iter().all(|p| p.params.syn_fail.p_fail <= 0.0) {
        return;
    }
    part.for_each_mut(&mut store.synapses, Strides::N_SYN_VARS, |syni, sblock| {
        let path = &net.paths[net.topology.syns[syni].path as usize];
        let sf = &path.params.syn_fail;
        if sf.p_fail <= 0.0 {
            return;
        }
        let swt = sblock[SV::SWt.index()];
        let mut wt = sblock[SV::Wt.index()];
        if wt == 0.0 {
            wt = path.params.swt.wt_val(swt, sblock[SV::LWt.index()]);
        }
        let key = ctx.rand_key(syni as u32);
        sf.fail(&mut wt, swt, random_number(key.index, key.counter, RandFun::SynFail));
        sblock[SV::Wt.index()] = wt;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkBuilder;
    use crate::path::PathParams;
    use neurite_npu_neural::{LearnRule, PoolVar as PV};

    fn pair() -> Network {
        let mut b = NetworkBuilder::new("learn");
        b.ndata(2);
        b.add_layer("a", LayerKind::Super, 2);
        b.add_layer("b", LayerKind::Super, 2);
        b.connect_full("a", "b", PathParams::excitatory());
        b.build().unwrap()
    }

    fn set_both(net: &mut Network, ni: usize, var: NV, val: f32) {
        for di in 0..net.ndata() {
            net.store.set_nrn_v(ni, var, di, val);
        }
    }

    #[test]
    fn test_synapse_ca_only_on_spikes() {
        let mut net = pair();
        let part = WorkPartitioner::sequential();
        let mut ctx = Context::new(2, 200, 50, 1, 1);
        ctx.syn_ca_ctr = 5.0;
        // sender 0 spikes in replica 0 only
        net.store.set_nrn_v(0, NV::Spike, 0, 1.0);
        set_both(&mut net, 0, NV::CaSpkP, 0.5);
        set_both(&mut net, 0, NV::CaSyn, 1.0);
        set_both(&mut net, 2, NV::CaSyn, 0.5);
        let (nr, store) = net.split_mut();
        synapse_ca(nr, store, &ctx, &part);

        let syn = net.topology.send_syns(0, 0).start;
        assert!(net.store.syn_ca_v(syn, CV::CaM, 0) > 0.0);
        assert_eq!(net.store.syn_ca_v(syn, CV::CaUpT, 0), 5.0);
        assert_eq!(net.store.syn_ca_v(syn, CV::CaM, 1), 0.0);
        assert_eq!(net.store.syn_ca_v(syn, CV::CaUpT, 1), -1.0);
        // sender 1 never spiked
        let other = net.topology.send_syns(0, 1).start;
        assert_eq!(net.store.syn_ca_v(other, CV::CaUpT, 0), -1.0);
    }

    #[test]
    fn test_dwt_sums_replicas_and_applies() {
        let mut net = pair();
        let part = WorkPartitioner::sequential();
        let ctx = Context::new(2, 200, 50, 1, 1);
        // coproduct 0.6 * 0.5 = 0.3 above thrP 0.2: potentiation
        set_both(&mut net, 0, NV::CaSpkP, 0.6);
        set_both(&mut net, 2, NV::CaSpkP, 0.5);
        set_both(&mut net, 2, NV::CaSpkD, 0.2);
        set_both(&mut net, 2, NV::RLRate, 1.0);
        let syni = net.topology.recv_syns(0, 0)[0] as usize;
        assert_eq!(net.topology.syns[syni].send, 0);
        let lwt0 = net.store.syn_v(syni, SV::LWt);
        let wt0 = net.store.syn_v(syni, SV::Wt);

        let (nr, store) = net.split_mut();
        dwt(nr, store, &ctx, &part);
        let eff = net.paths[0].params.learn.lrate.eff;
        let expect = 2.0 * eff * 0.1 * (1.0 - lwt0);
        let got = net.store.syn_v(syni, SV::DWt);
        assert!((got - expect).abs() < 1e-6, "{} vs {}", got, expect);
        assert!((net.store.syn_ca_v(syni, CV::DiDWt, 1) - expect / 2.0).abs() < 1e-6);

        let (nr, store) = net.split_mut();
        wt_from_dwt(nr, store, &part);
        assert_eq!(net.store.syn_v(syni, SV::DWt), 0.0);
        assert!((net.store.syn_v(syni, SV::DSWt) - got).abs() < 1e-9);
        assert!(net.store.syn_v(syni, SV::LWt) > lwt0);
        assert!(net.store.syn_v(syni, SV::Wt) > wt0);
    }

    #[test]
    fn test_failed_synapse_does_not_learn() {
        let mut net = pair();
        let part = WorkPartitioner::sequential();
        let ctx = Context::new(2, 200, 50, 1, 1);
        set_both(&mut net, 0, NV::CaSpkP, 0.6);
        set_both(&mut net, 2, NV::CaSpkP, 0.5);
        let syni = net.topology.recv_syns(0, 0)[0] as usize;
        net.store.set_syn_v(syni, SV::Wt, 0.0);
        let (nr, store) = net.split_mut();
        dwt(nr, store, &ctx, &part);
        assert_eq!(net.store.syn_v(syni, SV::DWt), 0.0);
    }

    #[test]
    fn test_dwt_sub_mean() {
        let mut b = NetworkBuilder::new("sm");
        b.add_layer("a", LayerKind::Super, 3);
        b.add_layer("b", LayerKind::Super, 1);
        b.connect_full("a", "b", PathParams::excitatory()).learn.dwt_sub_mean = 1.0;
        let mut net = b.build().unwrap();
        let syns: Vec<usize> = net.topology.recv_syns(0, 0).iter().map(|&s| s as usize).collect();
        net.store.set_syn_v(syns[0], SV::DWt, 0.3);
        net.store.set_syn_v(syns[1], SV::DWt, 0.1);
        let (nr, store) = net.split_mut();
        dwt_sub_mean(nr, store);
        assert!((net.store.syn_v(syns[0], SV::DWt) - 0.1).abs() < 1e-6);
        assert!((net.store.syn_v(syns[1], SV::DWt) + 0.1).abs() < 1e-6);
        // zero entries are excluded from the mean and left alone
        assert_eq!(net.store.syn_v(syns[2], SV::DWt), 0.0);
    }

    #[test]
    fn test_kinase_rule_uses_syn_ca() {
        let mut b = NetworkBuilder::new("kin");
        b.add_layer("a", LayerKind::Super, 1);
        b.add_layer("b", LayerKind::Super, 1);
        b.connect_full("a", "b", PathParams::excitatory()).learn.rule = LearnRule::Kinase;
        let mut net = b.build().unwrap();
        let ctx = Context::new(1, 200, 50, 1, 1);
        net.store.set_nrn_v(1, NV::RLRate, 0, 1.0);
        net.store.set_syn_ca_v(0, CV::CaP, 0, 0.4);
        net.store.set_syn_ca_v(0, CV::CaD, 0, 0.1);
        let lwt = net.store.syn_v(0, SV::LWt);
        let (nr, store) = net.split_mut();
        dwt(nr, store, &ctx, &WorkPartitioner::sequential());
        let eff = net.paths[0].params.learn.lrate.eff;
        let expect = eff * 0.3 * (1.0 - lwt);
        assert!((net.store.syn_v(0, SV::DWt) - expect).abs() < 1e-6);
    }

    #[test]
    fn test_trg_avg_from_d_zero_sum() {
        let mut b = NetworkBuilder::new("trg");
        b.add_layer("hid", LayerKind::Super, 2).learn.trg_avg_act.permute = false;
        let mut net = b.build().unwrap();
        // evenly spaced over [0.5, 2.0]
        assert_eq!(net.store.nrn_avg_v(0, NAV::TrgAvg), 0.5);
        assert_eq!(net.store.nrn_avg_v(1, NAV::TrgAvg), 2.0);
        net.store.set_nrn_avg_v(0, NAV::DTrgAvg, 0.2);
        net.store.set_nrn_avg_v(1, NAV::DTrgAvg, 0.0);
        let (nr, store) = net.split_mut();
        trg_avg_from_d(nr, store);
        assert!((net.store.nrn_avg_v(0, NAV::TrgAvg) - 0.6).abs() < 1e-6);
        assert!((net.store.nrn_avg_v(1, NAV::TrgAvg) - 1.9).abs() < 1e-6);
        assert_eq!(net.store.nrn_avg_v(0, NAV::DTrgAvg), 0.0);
    }

    #[test]
    fn test_swt_from_wt_soft_bounded() {
        let mut net = pair();
        let syns: Vec<usize> = net.topology.recv_syns(0, 0).iter().map(|&s| s as usize).collect();
        net.store.set_syn_v(syns[0], SV::DSWt, 1.0);
        net.store.set_syn_v(syns[1], SV::DSWt, -1.0);
        let s0 = net.store.syn_v(syns[0], SV::SWt);
        let (nr, store) = net.split_mut();
        swt_from_wt(nr, store, 0);
        let sw = &net.paths[0].params.swt;
        for &syni in &syns {
            let swt = net.store.syn_v(syni, SV::SWt);
            assert!(swt >= sw.limit.min && swt <= sw.limit.max);
            assert_eq!(net.store.syn_v(syni, SV::DSWt), 0.0);
            let wt = net.store.syn_v(syni, SV::Wt);
            assert!((sw.wt_val(swt, net.store.syn_v(syni, SV::LWt)) - wt).abs() < 1e-6);
        }
        assert!(net.store.syn_v(syns[0], SV::SWt) > s0);
    }

    #[test]
    fn test_syn_scale_direction() {
        let mut net = pair();
        // receiver 2 is far above its target
        net.store.set_nrn_avg_v(2, NAV::AvgDif, 1.0);
        net.store.set_nrn_avg_v(3, NAV::AvgDif, -1.0);
        let down = net.topology.recv_syns(0, 0)[0] as usize;
        let up = net.topology.recv_syns(0, 1)[0] as usize;
        let (ld, lu) = (net.store.syn_v(down, SV::LWt), net.store.syn_v(up, SV::LWt));
        let (nr, store) = net.split_mut();
        syn_scale(nr, store, 0);
        assert!(net.store.syn_v(down, SV::LWt) < ld);
        assert!(net.store.syn_v(up, SV::LWt) > lu);
    }

    #[test]
    fn test_syn_scale_keeps_lwt_bounded() {
        let mut net = pair();
        // AvgDif scales with pool size; a large pool can push |lr * AvgDif| past 1
        net.store.set_nrn_avg_v(2, NAV::AvgDif, 1.0e4);
        net.store.set_nrn_avg_v(3, NAV::AvgDif, -1.0e4);
        for _ in 0..3 {
            let (nr, store) = net.split_mut();
            syn_scale(nr, store, 0);
        }
        let sw = net.paths[0].params.swt.clone();
        for lay_ri in 0..2 {
            for &syni in net.topology.recv_syns(0, lay_ri) {
                let syni = syni as usize;
                let lwt = net.store.syn_v(syni, SV::LWt);
                let wt = net.store.syn_v(syni, SV::Wt);
                assert!((0.0..=1.0).contains(&lwt), "LWt {}", lwt);
                assert!((0.0..=2.0).contains(&wt), "Wt {}", wt);
                assert!((sw.wt_val(net.store.syn_v(syni, SV::SWt), lwt) - wt).abs() < 1e-6);
            }
        }
        let down = net.topology.recv_syns(0, 0)[0] as usize;
        let up = net.topology.recv_syns(0, 1)[0] as usize;
        assert_eq!(net.store.syn_v(down, SV::LWt), 0.0);
        assert_eq!(net.store.syn_v(up, SV::LWt), 1.0);
    }

    #[test]
    fn test_adapt_inhib_raises_gi_when_too_active() {
        let mut b = NetworkBuilder::new("gi");
        b.add_layer("hid", LayerKind::Super, 2).inhib.act_avg.adapt_gi = true;
        let mut net = b.build().unwrap();
        net.layers[0].act_avg.act_m_avg = 0.5;
        adapt_inhib(&mut net);
        assert!(net.layers[0].act_avg.gi_mult > 1.0);
    }

    #[test]
    fn test_gi_mult_shared_by_replicas() {
        let mut b = NetworkBuilder::new("gi");
        b.ndata(3);
        b.add_layer("hid", LayerKind::Super, 2).inhib.act_avg.adapt_gi = true;
        let mut net = b.build().unwrap();
        net.layers[0].act_avg.act_m_avg = 0.5;
        adapt_inhib(&mut net);
        let gi_mult = net.layers[0].act_avg.gi_mult;
        assert!(gi_mult > 1.0);

        // pool Gi of 1 in every replica scales by the same gain
        for di in 0..3 {
            net.store.set_pool_v(0, PV::Gi, di, 1.0);
        }
        let part = WorkPartitioner::sequential();
        let ctx = Context::new(3, 200, 50, 1, 1);
        let (nr, store) = net.split_mut();
        crate::activation::cycle_neurons(nr, store, &ctx, &part);
        let gi0 = net.store.nrn_v(0, NV::Gi, 0);
        assert!((gi0 - gi_mult).abs() < 1e-5, "Gi {} vs gain {}", gi0, gi_mult);
        for di in 1..3 {
            assert_eq!(net.store.nrn_v(0, NV::Gi, di), gi0);
        }
    }

    #[test]
    fn test_syn_fail_restores_and_fails() {
        let mut b = NetworkBuilder::new("fail");
        b.add_layer("a", LayerKind::Super, 10);
        b.add_layer("b", LayerKind::Super, 10);
        b.connect_full("a", "b", PathParams::excitatory()).syn_fail.p_fail = 1.0;
        let mut net = b.build().unwrap();
        let ctx = Context::new(1, 200, 50, 1, 1);
        let (nr, store) = net.split_mut();
        syn_fail(nr, store, &ctx, &WorkPartitioner::sequential());
        assert!((0..net.n_synapses()).all(|s| net.store.syn_v(s, SV::Wt) == 0.0));

        net.paths[0].params.syn_fail.p_fail = 0.0;
        let sw = net.paths[0].params.swt.clone();
        let (nr, store) = net.split_mut();
        swt_from_wt(nr, store, 0);
        for s in 0..net.n_synapses() {
            let expect = sw.wt_val(net.store.syn_v(s, SV::SWt), net.store.syn_v(s, SV::LWt));
            assert!((net.store.syn_v(s, SV::Wt) - expect).abs() < 1e-6);
        }
    }
}
