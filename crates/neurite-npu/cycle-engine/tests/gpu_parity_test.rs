// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! GPU vs CPU spike routing parity.
//!
//! Skipped when no adapter is present. Run with:
//!   cargo test --test gpu_parity_test --features gpu

#![cfg(feature = "gpu")]

use neurite_npu_cycle_engine::backend::{is_gpu_available, ComputeBackend, WGPUBackend};
use neurite_npu_cycle_engine::neural::NeuronVar as NV;
use neurite_npu_cycle_engine::{
    Context, CycleScheduler, LayerKind, Network, NetworkBuilder, PathParams, WorkPartitioner,
};

fn network() -> Network {
    let mut b = NetworkBuilder::new("gpu-parity");
    b.ndata(2).seed(5);
    b.add_layer("in", LayerKind::Input, 32);
    b.add_layer("hid", LayerKind::Super, 64);
    b.connect_full("in", "hid", PathParams::excitatory());
    b.connect_full("hid", "hid", PathParams::inhibitory());
    b.build().unwrap()
}

fn drive(net: &mut Network) {
    let a: Vec<f32> = (0..32).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
    let b: Vec<f32> = (0..32).map(|i| if i % 3 == 0 { 1.0 } else { 0.0 }).collect();
    net.apply_ext("in", 0, &a).unwrap();
    net.apply_ext("in", 1, &b).unwrap();
}

#[test]
fn test_gpu_routing_matches_cpu() {
    if !is_gpu_available() {
        eprintln!("no GPU adapter, skipping");
        return;
    }

    let mut cpu_net = network();
    drive(&mut cpu_net);
    let ctx = Context::new(2, 50, 10, 1, 9);
    let mut cpu = CycleScheduler::with_cpu(&cpu_net, ctx.clone(), WorkPartitioner::sequential()).unwrap();
    cpu.set_learning(false);

    let mut gpu_net = network();
    drive(&mut gpu_net);
    let mut backend = match WGPUBackend::new(WorkPartitioner::sequential()) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("GPU init failed ({}), skipping", e);
            return;
        }
    };
    backend
        .initialize_persistent_data(gpu_net.net_ref(), &gpu_net.store)
        .unwrap();
    let mut gpu = CycleScheduler::new(&gpu_net, Box::new(backend), ctx).unwrap();
    gpu.set_learning(false);

    cpu.run_trial(&mut cpu_net).unwrap();
    gpu.run_trial(&mut gpu_net).unwrap();

    for di in 0..2 {
        let c = cpu_net.layer_values("hid", NV::GeRaw, di).unwrap();
        let g = gpu_net.layer_values("hid", NV::GeRaw, di).unwrap();
        for (ni, (a, b)) in c.iter().zip(&g).enumerate() {
            assert!((a - b).abs() < 1e-5, "di={} neuron {}: cpu {} gpu {}", di, ni, a, b);
        }
        let c = cpu_net.layer_values("hid", NV::Spike, di).unwrap();
        let g = gpu_net.layer_values("hid", NV::Spike, di).unwrap();
        assert_eq!(c, g);
    }
}
