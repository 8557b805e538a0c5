// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neuron Activation Phases
//!
//! Per-cycle neuron update plus the trial-boundary bookkeeping around it:
//!
//! | Function | When |
//! |---|---|
//! | [`cycle_neurons`] | every cycle, after pool inhibition |
//! | [`cycle_post`] | every cycle, after [`cycle_neurons`] |
//! | [`new_state`] | start of a trial |
//! | [`minus_phase`] | end of the minus phase |
//! | [`plus_phase_start`] | first plus-phase cycle |
//! | [`plus_phase`] | end of the trial |
//!
//! Each neuron's update only writes its own block of the store, so the
//! per-neuron loops run through the [`WorkPartitioner`]. Neurons flagged
//! `OFF` in a replica are skipped and keep their values.

use crate::context::{Context, SignalsHandle};
use crate::layer::{Layer, LayerKind};
use crate::network::{NetRef, Network};
use crate::partition::WorkPartitioner;
use neurite_npu_neural::inhib::decay_inhib;
use neurite_npu_neural::{NeuronAvgVar as NAV, NeuronFlags, NeuronVar as NV, PoolVar as PV, VarAccess};
use neurite_npu_runtime::{NeuronView, PoolRef, PoolView, StateStore, Strides};
use tracing::trace;

/// Conductance, membrane and spike update of every neuron for one cycle
pub fn cycle_neurons(net: NetRef<'_>, store: &mut StateStore, ctx: &Context, part: &WorkPartitioner) {
    let strides = *store.strides();
    let nb = strides.neuron_block();
    let StateStore {
        neurons,
        flags,
        pools,
        ..
    } = store;
    let (flags, pools) = (&*flags, &*pools);
    part.for_each_mut(neurons, nb, |ni, nblock| {
        cycle_neuron(net, &strides, ni, nblock, flags, pools, ctx);
    });
}

/// One neuron, all replicas
pub fn cycle_neuron(
    net: NetRef<'_>,
    strides: &Strides,
    ni: usize,
    nblock: &mut [f32],
    flags: &[NeuronFlags],
    pools: &[f32],
    ctx: &Context,
) {
    let nd = strides.ndata as usize;
    let pb = strides.pool_block();
    let nidx = &net.topology.neurons[ni];
    let layer = &net.layers[nidx.layer as usize];
    let (lp, kind) = (&layer.params, layer.kind);
    let acts = &lp.acts;
    let spi = nidx.sub_pool as usize;
    let sub_block = &pools[spi * pb..(spi + 1) * pb];

    for di in 0..nd {
        let fl = flags[strides.flags(ni, di)];
        if fl.is_off() {
            continue;
        }
        let pl = PoolRef::new(sub_block, nd, di);
        let mut n = NeuronView::new(nblock, nd, di);
        let key = ctx.rand_key((ni * nd + di) as u32);

        let mut ctxt_ext = 0.0;
        if kind == LayerKind::Ct {
            let ge_ctxt = lp.ct.ge_gain * n.get(NV::CtxtGe);
            n.add(NV::GeRaw, ge_ctxt);
            if lp.ct.decay_dt > 0.0 {
                let c = n.get(NV::CtxtGe);
                n.add(NV::CtxtGe, -lp.ct.decay_dt * c);
            }
            // steady-state synaptic conductance for a constant raw input
            ctxt_ext = ge_ctxt * acts.dt.ge_tau;
            n.add(NV::GeSyn, ctxt_ext);
        }

        // excitation
        let ge_raw = n.get(NV::GeRaw);
        acts.nmda_from_raw(&mut n, ge_raw);
        lp.learn.lrn_nmda_from_raw(&mut n, ge_raw);
        acts.gvgcc_from_vm(&mut n);
        let ge_syn = n.get(NV::GeSyn);
        let ge_chans = n.get(NV::Gnmda) + n.get(NV::Gvgcc);
        acts.ge_from_syn(&mut n, fl.contains(NeuronFlags::HAS_EXT), ge_syn, ge_chans, key);
        acts.gk_from_vm(&mut n);

        // inhibition
        let gi_syn = n.get(NV::GiSyn);
        let gi_syn = acts.gi_from_syn(&mut n, gi_syn, key);
        n.set(NV::GiSyn, gi_syn);
        let gi = layer.act_avg.gi_mult * pl.get(PV::Gi) + gi_syn + n.get(NV::GiNoise);
        n.set(NV::Gi, gi);
        let ss_gi = pl.get(PV::SSGi);
        n.set(NV::SsGi, ss_gi);
        let ss_dend = if kind.is_clamped_kind() {
            0.0
        } else {
            acts.dend.ss_gi * ss_gi
        };
        n.set(NV::SsGiDend, ss_dend);

        let (mut gabab, mut gabab_x) = (n.get(NV::GabaB), n.get(NV::GabaBx));
        acts.gabab.gabab(gi, &mut gabab, &mut gabab_x);
        n.set(NV::GabaB, gabab);
        n.set(NV::GabaBx, gabab_x);
        let ggabab = acts.gabab.ggabab(gabab, n.get(NV::VmDend));
        n.set(NV::GgabaB, ggabab);
        n.add(NV::Gk, ggabab);

        if kind == LayerKind::Ct {
            n.set(NV::GeExt, ctxt_ext);
        }

        // membrane and spiking
        let isi_prev = n.get(NV::Isi);
        acts.vm_from_g(&mut n);
        acts.spike_from_vm(&mut n, isi_prev);
        lp.learn.ca_from_spike(&mut n);

        if ctx.cycle >= acts.dt.max_cyc_start {
            let p_dt = lp.learn.ca_spk.dt.p_dt;
            let mut spk_max_ca = n.get(NV::SpkMaxCa);
            spk_max_ca += p_dt * (n.get(NV::CaSpkM) - spk_max_ca);
            n.set(NV::SpkMaxCa, spk_max_ca);
            if spk_max_ca > n.get(NV::SpkMax) {
                n.set(NV::SpkMax, spk_max_ca);
            }
        }

        if kind == LayerKind::RewardPred {
            let ge = n.get(NV::Ge);
            n.set(NV::Act, lp.rw_pred.pred_range.clip(ge));
        }
        if kind == LayerKind::Ct && ctx.cycle == ctx.theta_cycles - 1 {
            let raw = n.get(NV::CtxtGeRaw);
            if lp.ct.decay_tau == 0.0 {
                n.set(NV::CtxtGe, raw);
            } else {
                n.add(NV::CtxtGe, raw);
            }
        }

        acts.integ_acts(&mut n, ctx.plus_phase);
    }
}

/// Layer-level outputs computed after all neurons have updated.
///
/// `RewardPred` layers publish `ActInt(first) - ActInt(second)` as the
/// reward prediction of each replica.
pub fn cycle_post(net: NetRef<'_>, store: &StateStore, ctx: &mut Context, signals: &SignalsHandle) {
    for (li, layer) in net.layers.iter().enumerate() {
        if layer.kind != LayerKind::RewardPred {
            continue;
        }
        let ly = &net.topology.layers[li];
        if ly.n_neurons < 2 {
            continue;
        }
        let st = ly.neur_st as usize;
        for di in 0..store.ndata() {
            let pos = store.nrn_v(st, NV::ActInt, di);
            let neg = store.nrn_v(st + 1, NV::ActInt, di);
            let pred = pos - neg;
            signals.update(di, |s| s.rew_pred = pred);
            if let Some(s) = ctx.signals.get_mut(di) {
                s.rew_pred = pred;
            }
            trace!("[NPU-ACT] {} di={} rew_pred={:.4}", layer.name, di, pred);
        }
    }
}

/// Start a new trial: update layer running averages, decay pool
/// inhibition and neuron state, clear all delayed conductances.
pub fn new_state(net: &mut Network, ctx: &mut Context, part: &WorkPartitioner) {
    let nd = net.ndata();
    let Network {
        topology,
        layers,
        store,
        ..
    } = net;

    for (li, ly) in topology.layers.iter().enumerate() {
        let layer = &mut layers[li];
        let aa = &layer.params.inhib.act_avg;
        let dt = layer.params.acts.dt.long_avg_dt;
        let lpi = ly.pool_st as usize;
        let (mut act_m, mut act_p) = (0.0f32, 0.0f32);
        for di in 0..nd {
            act_m += store.pool_v(lpi, PV::ActMinusAvg, di);
            act_p += store.pool_v(lpi, PV::ActPlusAvg, di);
        }
        let inv = 1.0 / nd.max(1) as f32;
        aa.avg_from_act(&mut layer.act_avg.act_m_avg, act_m * inv, dt);
        aa.avg_from_act(&mut layer.act_avg.act_p_avg, act_p * inv, dt);
    }

    let strides = *store.strides();
    let (nb, pb) = (strides.neuron_block(), strides.pool_block());
    let layers: &[Layer] = layers;
    let topology = &*topology;
    {
        let StateStore {
            neurons,
            neuron_avgs,
            flags,
            pools,
            ..
        } = &mut *store;
        part.for_each_mut(pools, pb, |pi, pblock| {
            let acts = &layers[topology.pools[pi].layer as usize].params.acts;
            let clamped = if acts.clamp.is_input && !acts.clamp.add { 1.0 } else { 0.0 };
            for di in 0..nd {
                let mut p = PoolView::new(pblock, nd, di);
                p.set(PV::Clamped, clamped);
                decay_inhib(&mut p, acts.decay.act);
            }
        });

        let (avgs, flags) = (&*neuron_avgs, &*flags);
        part.for_each_mut(neurons, nb, |ni, nblock| {
            let acts = &layers[topology.neurons[ni].layer as usize].params.acts;
            let ge_base = avgs[strides.neuron_avg(ni, NAV::GeBase)];
            let gi_base = avgs[strides.neuron_avg(ni, NAV::GiBase)];
            for di in 0..nd {
                if flags[strides.flags(ni, di)].is_off() {
                    continue;
                }
                let mut n = NeuronView::new(nblock, nd, di);
                let ca_d = n.get(NV::CaSpkD);
                n.set(NV::SpkPrv, ca_d);
                n.set(NV::SpkMax, 0.0);
                n.set(NV::SpkMaxCa, 0.0);
                acts.decay_state(
                    &mut n,
                    acts.decay.act,
                    acts.decay.glong,
                    acts.decay.ahp,
                    ge_base,
                    gi_base,
                );
            }
        });
    }
    store.reset_conductances();
    ctx.new_state();
}

/// Record minus-phase activity and clamp target pools for the plus phase
pub fn minus_phase(net: &mut Network, part: &WorkPartitioner) {
    let nd = net.ndata();
    let Network {
        topology,
        layers,
        store,
        ..
    } = net;
    let strides = *store.strides();
    let (nb, pb) = (strides.neuron_block(), strides.pool_block());
    let (layers, topology) = (&*layers, &*topology);
    let StateStore {
        neurons,
        flags,
        pools,
        ..
    } = store;

    part.for_each_mut(pools, pb, |pi, pblock| {
        let clamp = &layers[topology.pools[pi].layer as usize].params.acts.clamp;
        for di in 0..nd {
            let mut p = PoolView::new(pblock, nd, di);
            p.set(PV::ActMinusAvg, p.get(PV::ActAvg));
            p.set(PV::ActMinusMax, p.get(PV::ActMax));
            if clamp.is_target && !clamp.add {
                p.set(PV::Clamped, 1.0);
            }
        }
    });

    let flags = &*flags;
    part.for_each_mut(neurons, nb, |ni, nblock| {
        for di in 0..nd {
            if flags[strides.flags(ni, di)].is_off() {
                continue;
            }
            let mut n = NeuronView::new(nblock, nd, di);
            n.set(NV::ActM, n.get(NV::ActInt));
            n.set(NV::CaSpkPM, n.get(NV::CaSpkP));
        }
    });
}

/// Enter the plus phase: neurons with a target get it as clamped input
pub fn plus_phase_start(net: &mut Network, ctx: &mut Context, part: &WorkPartitioner) {
    ctx.plus_phase = true;
    let nd = net.ndata();
    let Network {
        topology,
        layers,
        store,
        ..
    } = net;
    let strides = *store.strides();
    let nb = strides.neuron_block();
    let (layers, topology) = (&*layers, &*topology);
    let StateStore { neurons, flags, .. } = store;

    part.for_each_mut2(neurons, nb, flags, nd, |ni, nblock, fblock| {
        let init_act = layers[topology.neurons[ni].layer as usize].params.acts.init.act;
        for (di, fl) in fblock.iter_mut().enumerate() {
            if fl.is_off() || !fl.contains(NeuronFlags::HAS_TARG) {
                continue;
            }
            fl.insert(NeuronFlags::HAS_EXT);
            let mut n = NeuronView::new(nblock, nd, di);
            n.set(NV::Ext, n.get(NV::Target));
            n.set(NV::Isi, -1.0);
            n.set(NV::IsiAvg, -1.0);
            n.set(NV::ActInt, init_act);
        }
    });
}

/// End of the trial: record plus-phase activity, receiver learning rates,
/// slow AHP, target-activity error and the layer's phase correlation
pub fn plus_phase(net: &mut Network, ctx: &Context, part: &WorkPartitioner) {
    let nd = net.ndata();
    let Network {
        topology,
        layers,
        store,
        ..
    } = net;
    let strides = *store.strides();
    let (nb, pb) = (strides.neuron_block(), strides.pool_block());
    {
        let (layers, topology) = (&*layers, &*topology);
        let StateStore {
            neurons,
            neuron_avgs,
            flags,
            pools,
            ..
        } = &mut *store;

        part.for_each_mut(pools, pb, |_, pblock| {
            for di in 0..nd {
                let mut p = PoolView::new(pblock, nd, di);
                p.set(PV::ActPlusAvg, p.get(PV::ActAvg));
                p.set(PV::ActPlusMax, p.get(PV::ActMax));
            }
        });

        let (flags, pools) = (&*flags, &*pools);
        part.for_each_mut2(neurons, nb, neuron_avgs, Strides::N_AVG_VARS, |ni, nblock, ablock| {
            let li = topology.neurons[ni].layer as usize;
            let layer = &layers[li];
            let (acts, learn) = (&layer.params.acts, &layer.params.learn);
            let lpi = topology.layers[li].pool_st as usize;
            let err_lrate = if learn.trg_avg_act.on && !layer.kind.is_clamped_kind() {
                learn.trg_avg_act.err_lrate
            } else {
                0.0
            };
            let long_dt = acts.dt.long_avg_dt;
            for di in 0..nd {
                if flags[strides.flags(ni, di)].is_off() {
                    continue;
                }
                let mut n = NeuronView::new(nblock, nd, di);
                n.set(NV::ActP, n.get(NV::ActInt));
                let (ca_p, ca_d) = (n.get(NV::CaSpkP), n.get(NV::CaSpkD));

                let lay_max = pools[strides.pool(lpi, PV::CaSpkDMax, di)];
                let sig = ctx.signals(di);
                let rl = learn.rl_rate.sig_deriv(ca_d, lay_max)
                    * learn.rl_rate.rl_diff(ca_p, ca_d)
                    * learn.neuro_mod.lr_mod(sig.da, sig.ach);
                n.set(NV::RLRate, rl);

                let sahp = &acts.sahp;
                let (sahp_ca, sahp_n) = (n.get(NV::SahpCa), n.get(NV::SahpN));
                let sahp_n = sahp_n + sahp.dn_from_ca(sahp_ca, sahp_n);
                n.set(NV::SahpN, sahp_n);
                n.set(NV::SahpCa, sahp.ca_int(sahp_ca, ca_d));
                n.set(NV::Gsahp, sahp.gsahp(sahp_n));

                ablock[NAV::DTrgAvg.index()] += err_lrate * (ca_p - ca_d);
                let act_m = n.get(NV::ActM);
                let avg = &mut ablock[NAV::ActAvg.index()];
                *avg += long_dt * (act_m - *avg);
            }
        });
    }

    for (li, ly) in topology.layers.iter().enumerate() {
        for di in 0..nd {
            layers[li].vals[di].cor_sim = cor_sim(store, ly.neurons(), ly.pool_st as usize, di);
        }
    }
}

/// Centered cosine between plus and minus phase activity of a layer
fn cor_sim(store: &StateStore, neurons: std::ops::Range<usize>, lpi: usize, di: usize) -> f32 {
    let avg_m = store.pool_v(lpi, PV::ActMinusAvg, di);
    let avg_p = store.pool_v(lpi, PV::ActPlusAvg, di);
    let (mut ss, mut ss_m, mut ss_p) = (0.0f32, 0.0f32, 0.0f32);
    for ni in neurons {
        if store.nrn_flags(ni, di).is_off() {
            continue;
        }
        let m = store.nrn_v(ni, NV::ActM, di) - avg_m;
        let p = store.nrn_v(ni, NV::ActP, di) - avg_p;
        ss += m * p;
        ss_m += m * m;
        ss_p += p * p;
    }
    let denom = (ss_m * ss_p).sqrt();
    if denom > 0.0 {
        ss / denom
    } else {
        0.0
    }
}
