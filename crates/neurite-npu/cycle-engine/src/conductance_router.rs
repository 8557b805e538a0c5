// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Conductance Router
//!
//! Delayed spike delivery through per-path ring buffers.
//!
//! Each path owns `del_len = delay + 1` slots per receiving neuron per data
//! replica. A spike sent at global cycle `T` is added into slot
//! `(T + delay) % del_len`; at cycle `C` every receiver reads and zeroes slot
//! `C % del_len`. Gather always runs before send within a cycle, so a slot
//! is drained exactly once, `delay` cycles after it was written.
//!
//! Values are stored as fixed point (factor 2^24) in `AtomicI32` and summed
//! with `fetch_add`. Integer addition commutes, so the delivered total does
//! not depend on the order in which senders ran.
//!
//! Set `NEURITE_TRACE_GBUF=1` to trace every nonzero delivery, optionally
//! restricted to one path with `NEURITE_TRACE_PATH=<index>`.

use crate::context::Context;
use crate::network::NetRef;
use crate::partition::WorkPartitioner;
use crate::path::PathType;
use neurite_npu_neural::{ActParams, NeuronAvgVar as NAV, NeuronVar as NV, SynapseVar as SV, VarAccess};
use neurite_npu_runtime::{NeuronView, StateStore, Strides};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::OnceLock;
use tracing::{trace, warn};

/// Fixed-point scale of the conductance buffers
pub const GBUF_FIXED_FACTOR: f32 = 16_777_216.0;

static NEGATIVE_WARNED: AtomicBool = AtomicBool::new(false);
static SATURATE_WARNED: AtomicBool = AtomicBool::new(false);

struct GbufTraceCfg {
    enabled: bool,
    path_filter: Option<u32>,
}

fn gbuf_trace_cfg() -> &'static GbufTraceCfg {
    static CFG: OnceLock<GbufTraceCfg> = OnceLock::new();
    CFG.get_or_init(|| {
        let enabled = std::env::var("NEURITE_TRACE_GBUF")
            .ok()
            .as_deref()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let path_filter = std::env::var("NEURITE_TRACE_PATH")
            .ok()
            .and_then(|v| v.parse().ok());
        GbufTraceCfg {
            enabled,
            path_filter,
        }
    })
}

#[inline]
fn trace_path(pi: usize) -> bool {
    let cfg = gbuf_trace_cfg();
    cfg.enabled && cfg.path_filter.map(|p| p as usize == pi).unwrap_or(true)
}

/// Float conductance to fixed point, saturating at the i32 range
#[inline]
pub fn to_fixed(val: f32) -> i32 {
    let scaled = (val * GBUF_FIXED_FACTOR).round();
    if scaled >= i32::MAX as f32 || scaled <= i32::MIN as f32 {
        if !SATURATE_WARNED.swap(true, Ordering::Relaxed) {
            warn!("[NPU-GBUF] Conductance {} saturates the fixed-point buffer", val);
        }
    }
    scaled as i32
}

#[inline]
pub fn from_fixed(raw: i32) -> f32 {
    raw as f32 / GBUF_FIXED_FACTOR
}

/// Ring-buffer slot read at `cycles_total`
#[inline]
pub fn read_slot(cycles_total: i32, del_len: u32) -> usize {
    (cycles_total.max(0) as usize) % del_len as usize
}

/// Ring-buffer slot written at `cycles_total` for a path of `delay`
#[inline]
pub fn write_slot(cycles_total: i32, delay: u32, del_len: u32) -> usize {
    (cycles_total.max(0) as usize + delay as usize) % del_len as usize
}

/// Drain this cycle's slot of every receiving path and integrate it into
/// the per-path GSyn and the neuron's GeRaw/GeSyn, GiRaw/GiSyn, CtxtGeRaw
pub fn gather_spikes(net: NetRef<'_>, store: &mut StateStore, ctx: &Context, part: &WorkPartitioner) {
    let strides = *store.strides();
    let nb = strides.neuron_block();
    let gb = strides.gsyn_block();
    let StateStore {
        neurons,
        neuron_avgs,
        gsyn,
        gbuf,
        ..
    } = store;
    let (avgs, gbuf) = (&*neuron_avgs, &*gbuf);
    part.for_each_mut2(neurons, nb, gsyn, gb, |ni, nblock, gblock| {
        gather_neuron(net, &strides, ni, nblock, gblock, avgs, gbuf, ctx);
    });
}

/// Gather for one receiving neuron, all replicas
#[allow(clippy::too_many_arguments)]
pub fn gather_neuron(
    net: NetRef<'_>,
    strides: &Strides,
    ni: usize,
    nblock: &mut [f32],
    gblock: &mut [f32],
    avgs: &[f32],
    gbuf: &[AtomicI32],
    ctx: &Context,
) {
    let nd = strides.ndata as usize;
    let li = net.topology.neurons[ni].layer as usize;
    let ly = &net.topology.layers[li];
    let acts = &net.layers[li].params.acts;
    let ge_base = avgs[strides.neuron_avg(ni, NAV::GeBase)];
    let gi_base = avgs[strides.neuron_avg(ni, NAV::GiBase)];

    for di in 0..nd {
        let mut n = NeuronView::new(nblock, nd, di);
        n.set(NV::GeRaw, 0.0);
        n.set(NV::GiRaw, 0.0);
        n.set(NV::CtxtGeRaw, 0.0);
        n.set(NV::GeSyn, ge_base);
        n.set(NV::GiSyn, gi_base);

        for &pi in &ly.recv_paths {
            let pi = pi as usize;
            let pj = &net.topology.paths[pi];
            let ri = ni - pj.recv_neur_st as usize;
            let slot = read_slot(ctx.cycles_total, pj.del_len);
            let idx = strides.gbuf(pj.gbuf_st as usize, pj.recv_n as usize, slot, ri, di);
            let raw_fixed = gbuf[idx].swap(0, Ordering::Relaxed);
            if raw_fixed == 0 {
                // GSyn still decays
                integrate_path(net, pi, acts, &mut n, gblock, pj.gsyn_k as usize * nd + di, 0.0);
                continue;
            }
            let raw = if raw_fixed < 0 {
                if !NEGATIVE_WARNED.swap(true, Ordering::Relaxed) {
                    warn!(
                        "[NPU-GBUF] Negative conductance {} on path {} clamped to 0",
                        from_fixed(raw_fixed),
                        pi
                    );
                }
                0.0
            } else {
                from_fixed(raw_fixed)
            };
            if trace_path(pi) {
                trace!(
                    "[NPU-GBUF] cycle={} path={} recv={} di={} slot={} raw={:.6}",
                    ctx.cycles_total,
                    pi,
                    ni,
                    di,
                    slot,
                    raw
                );
            }
            integrate_path(net, pi, acts, &mut n, gblock, pj.gsyn_k as usize * nd + di, raw);
        }
    }
}

#[inline]
fn integrate_path(
    net: NetRef<'_>,
    pi: usize,
    acts: &ActParams,
    n: &mut NeuronView<'_>,
    gblock: &mut [f32],
    gk: usize,
    raw: f32,
) {
    match net.paths[pi].params.path_type {
        PathType::Excitatory => {
            let g = acts.dt.ge_syn_from_raw(gblock[gk], raw);
            gblock[gk] = g;
            n.add(NV::GeRaw, raw);
            n.add(NV::GeSyn, g);
        }
        PathType::Inhibitory => {
            let g = acts.dt.gi_syn_from_raw(gblock[gk], raw);
            gblock[gk] = g;
            n.add(NV::GiRaw, raw);
            n.add(NV::GiSyn, g);
        }
        PathType::Context => {
            n.add(NV::CtxtGeRaw, raw);
        }
    }
}

/// Enqueue this cycle's spikes of every sender on every outgoing path
pub fn send_spikes(net: NetRef<'_>, store: &StateStore, ctx: &Context, part: &WorkPartitioner) {
    part.for_each_index(net.topology.n_neurons(), |ni| send_spike(net, store, ni, ctx));
}

/// Enqueue one sender's contributions, all replicas.
///
/// Regular paths send `gscale * Wt` when the neuron spiked. Context paths
/// send `gscale * Wt * CaSpkP` once per trial, at the cycle that makes them
/// arrive on the last cycle of the theta cycle.
pub fn send_spike(net: NetRef<'_>, store: &StateStore, ni: usize, ctx: &Context) {
    let nd = store.ndata();
    let li = net.topology.neurons[ni].layer as usize;
    let strides = store.strides();
    let lay_si = ni - net.topology.layers[li].neur_st as usize;

    for &pi in &net.topology.layers[li].send_paths {
        let pi = pi as usize;
        let pj = &net.topology.paths[pi];
        let path = &net.paths[pi];
        let is_ctxt = path.is_context();
        if is_ctxt && ctx.cycle != ctx.theta_cycles - 1 - pj.delay as i32 {
            continue;
        }
        let slot = write_slot(ctx.cycles_total, pj.delay, pj.del_len);
        let syns = net.topology.send_syns(pi, lay_si);
        if syns.is_empty() {
            continue;
        }
        for di in 0..nd {
            if store.nrn_flags(ni, di).is_off() {
                continue;
            }
            let sv = if is_ctxt {
                store.nrn_v(ni, NV::CaSpkP, di)
            } else if store.nrn_v(ni, NV::Spike, di) != 0.0 {
                1.0
            } else {
                continue;
            };
            let scale = path.gscale * sv;
            for syni in syns.clone() {
                let ri = net.topology.syns[syni].recv as usize - pj.recv_neur_st as usize;
                let wt = store.syn_v(syni, SV::Wt);
                let val = to_fixed(scale * wt);
                if val == 0 {
                    continue;
                }
                let idx = strides.gbuf(pj.gbuf_st as usize, pj.recv_n as usize, slot, ri, di);
                store.gbuf[idx].fetch_add(val, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;
    use crate::network::{Connectivity, NetworkBuilder};
    use crate::path::PathParams;

    #[test]
    fn test_fixed_point_round_trip_precision() {
        for v in [0.0f32, 0.001, 0.37, 1.0, 12.5] {
            assert!((from_fixed(to_fixed(v)) - v).abs() <= 1.0 / GBUF_FIXED_FACTOR);
        }
        assert_eq!(to_fixed(1.0e6), i32::MAX);
    }

    #[test]
    fn test_slots_never_collide() {
        for delay in 1..5u32 {
            let del_len = delay + 1;
            for t in 0..20 {
                assert_ne!(read_slot(t, del_len), write_slot(t, delay, del_len));
                assert_eq!(write_slot(t, delay, del_len), read_slot(t + delay as i32, del_len));
            }
        }
    }

    #[test]
    fn test_send_then_gather_after_delay() {
        let mut b = NetworkBuilder::new("route");
        b.add_layer("a", LayerKind::Super, 1);
        b.add_layer("b", LayerKind::Super, 1);
        let p = b.connect("a", "b", Connectivity::OneToOne, PathParams::excitatory());
        p.delay = 2;
        let mut net = b.build().unwrap();
        net.store.set_syn_v(0, SV::Wt, 0.5);
        let gscale = net.paths[0].gscale;
        let part = WorkPartitioner::sequential();
        let mut ctx = Context::new(1, 200, 50, 1, 1);

        net.store.set_nrn_v(0, NV::Spike, 0, 1.0);
        {
            let (nr, store) = net.split_mut();
            send_spike(nr, store, 0, &ctx);
        }
        net.store.set_nrn_v(0, NV::Spike, 0, 0.0);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (nr, store) = net.split_mut();
            gather_spikes(nr, store, &ctx, &part);
            seen.push(net.store.nrn_v(1, NV::GeRaw, 0));
            ctx.cycle_inc();
        }
        let want = from_fixed(to_fixed(gscale * 0.5));
        assert_eq!(seen, vec![0.0, 0.0, want, 0.0]);
        assert!(net.store.gbuf_is_clear());
    }
}
