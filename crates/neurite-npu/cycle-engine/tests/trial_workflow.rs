// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Integration Tests: Trial Workflow
//!
//! End-to-end runs through the scheduler:
//! - clamped input -> spikes -> conductance on the receiving layer
//! - refractory spacing of spike trains
//! - DWt and WtFromDWt after a learning trial
//! - lesioned neurons and independent data replicas

use neurite_npu_cycle_engine::neural::{NeuronVar as NV, SynapseVar as SV};
use neurite_npu_cycle_engine::{
    Context, CycleScheduler, LayerKind, Network, NetworkBuilder, PathParams, WorkPartitioner,
};

// ═══════════════════════════════════════════════════════════
// Helper Functions
// ═══════════════════════════════════════════════════════════

/// Two clamped inputs fully connected to two hidden neurons. Hidden
/// inhibition is off so the hidden layer is driven by its input alone.
fn four_neuron_network(ndata: u32) -> Network {
    let mut b = NetworkBuilder::new("four");
    b.ndata(ndata).seed(3);
    b.add_layer("in", LayerKind::Input, 2);
    b.add_layer("hid", LayerKind::Super, 2).inhib.layer.on = false;
    b.connect_full("in", "hid", PathParams::excitatory());
    b.build().unwrap()
}

fn scheduler(net: &Network, theta: i32, plus: i32) -> CycleScheduler {
    let ctx = Context::new(net.ndata() as u32, theta, plus, 1, 11);
    CycleScheduler::with_cpu(net, ctx, WorkPartitioner::sequential()).unwrap()
}

/// Per-cycle spike train of neuron `ni` over `cycles` cycles
fn spike_train(net: &mut Network, sched: &mut CycleScheduler, ni: usize, cycles: usize) -> Vec<bool> {
    let mut train = Vec::with_capacity(cycles);
    for _ in 0..cycles {
        sched.cycle(net).unwrap();
        train.push(net.store.nrn_v(ni, NV::Spike, 0) > 0.0);
    }
    train
}

fn spike_times(train: &[bool]) -> Vec<usize> {
    train
        .iter()
        .enumerate()
        .filter(|(_, &s)| s)
        .map(|(t, _)| t)
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[test]
fn test_clamped_inputs_spike_and_drive_hidden() {
    let mut net = four_neuron_network(1);
    let mut sched = scheduler(&net, 200, 50);
    sched.set_learning(false);
    net.apply_ext("in", 0, &[1.0, 1.0]).unwrap();
    sched.new_state(&mut net).unwrap();

    let train = spike_train(&mut net, &mut sched, 0, 150);
    assert!(spike_times(&train).len() >= 2, "input neuron must spike repeatedly");

    let hid_ge: f32 = net
        .layer_values("hid", NV::GeInt, 0)
        .unwrap()
        .iter()
        .sum();
    assert!(hid_ge > 0.0);
}

#[test]
fn test_refractory_spacing() {
    let mut net = four_neuron_network(1);
    let tr = net.layers[0].params.acts.spikes.tr as usize;
    let mut sched = scheduler(&net, 200, 50);
    sched.set_learning(false);
    net.apply_ext("in", 0, &[1.0, 1.0]).unwrap();
    sched.new_state(&mut net).unwrap();

    let times = spike_times(&spike_train(&mut net, &mut sched, 0, 200));
    assert!(times.len() >= 2);
    for w in times.windows(2) {
        assert!(w[1] - w[0] > tr, "spikes at {} and {} inside refractory {}", w[0], w[1], tr);
    }
}

#[test]
fn test_unclamped_network_stays_silent() {
    let mut net = four_neuron_network(1);
    let mut sched = scheduler(&net, 200, 50);
    sched.set_learning(false);
    sched.new_state(&mut net).unwrap();
    let train = spike_train(&mut net, &mut sched, 2, 100);
    assert!(spike_times(&train).is_empty());
}

#[test]
fn test_learning_trial_updates_weights() {
    let mut net = four_neuron_network(1);
    let mut sched = scheduler(&net, 200, 50);
    let before: Vec<f32> = (0..net.n_synapses()).map(|s| net.store.syn_v(s, SV::Wt)).collect();
    net.apply_ext("in", 0, &[1.0, 1.0]).unwrap();

    sched.new_state(&mut net).unwrap();
    let minus = sched.context().minus_cycles() as usize;
    let train = spike_train(&mut net, &mut sched, 2, minus);
    sched.minus_phase(&mut net);
    sched.plus_phase_start(&mut net);
    let plus = sched.context().plus_cycles as usize;
    let train_p = spike_train(&mut net, &mut sched, 2, plus);
    sched.plus_phase(&mut net);
    assert!(
        !spike_times(&train).is_empty() || !spike_times(&train_p).is_empty(),
        "driven hidden neuron must spike"
    );

    sched.dwt(&mut net).unwrap();
    let any_dwt = (0..net.n_synapses()).any(|s| net.store.syn_v(s, SV::DWt) != 0.0);
    assert!(any_dwt, "a spiking pair must produce a weight change");

    sched.wt_from_dwt(&mut net).unwrap();
    let mut changed = false;
    for (s, &w0) in before.iter().enumerate() {
        let wt = net.store.syn_v(s, SV::Wt);
        let lwt = net.store.syn_v(s, SV::LWt);
        assert!((0.0..=2.0).contains(&wt), "Wt {} out of range", wt);
        assert!((0.0..=1.0).contains(&lwt), "LWt {} out of range", lwt);
        assert_eq!(net.store.syn_v(s, SV::DWt), 0.0);
        changed |= wt != w0;
    }
    assert!(changed);
}

#[test]
fn test_learning_off_keeps_weights() {
    let mut net = four_neuron_network(1);
    let mut sched = scheduler(&net, 100, 25);
    sched.set_learning(false);
    let before: Vec<f32> = (0..net.n_synapses()).map(|s| net.store.syn_v(s, SV::Wt)).collect();
    net.apply_ext("in", 0, &[1.0, 1.0]).unwrap();
    let result = sched.run_trial(&mut net).unwrap();
    assert!(!result.learned);
    let after: Vec<f32> = (0..net.n_synapses()).map(|s| net.store.syn_v(s, SV::Wt)).collect();
    assert_eq!(before, after);
}

#[test]
fn test_lesioned_sender_sends_nothing() {
    let mut net = four_neuron_network(1);
    net.lesion_neurons("in", &[0, 1], true).unwrap();
    let mut sched = scheduler(&net, 100, 25);
    sched.set_learning(false);
    net.apply_ext("in", 0, &[1.0, 1.0]).unwrap();
    sched.run_trial(&mut net).unwrap();
    for v in net.layer_values("hid", NV::GeRaw, 0).unwrap() {
        assert_eq!(v, 0.0);
    }
    assert!(net.store.gbuf_is_clear());
}

#[test]
fn test_replicas_are_independent() {
    let mut net = four_neuron_network(2);
    let mut sched = scheduler(&net, 100, 25);
    sched.set_learning(false);
    net.apply_ext("in", 0, &[1.0, 1.0]).unwrap();
    net.apply_ext("in", 1, &[0.0, 0.0]).unwrap();
    sched.run_trial(&mut net).unwrap();

    let driven: f32 = net.layer_values("hid", NV::GeInt, 0).unwrap().iter().sum();
    let silent: f32 = net.layer_values("hid", NV::GeInt, 1).unwrap().iter().sum();
    assert!(driven > 0.0);
    assert!(silent < driven * 0.1);
    for v in net.layer_values("hid", NV::GeRaw, 1).unwrap() {
        assert_eq!(v, 0.0);
    }
}

#[test]
fn test_unknown_layer_rejected() {
    let mut net = four_neuron_network(1);
    assert!(net.apply_ext("nope", 0, &[1.0]).is_err());
    assert!(net.apply_ext("in", 5, &[1.0]).is_err());
    assert!(net.apply_ext("in", 0, &[1.0, 1.0, 1.0]).is_err());
}
