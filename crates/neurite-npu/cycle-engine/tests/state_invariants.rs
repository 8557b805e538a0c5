// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Property tests: state stays inside its documented ranges for arbitrary
//! seeds and input patterns.

use neurite_npu_cycle_engine::conductance_router::{from_fixed, read_slot, to_fixed, write_slot};
use neurite_npu_cycle_engine::neural::act::SPIKED_WINDOW;
use neurite_npu_cycle_engine::neural::{NeuronVar as NV, SynapseVar as SV, XcalParams};
use neurite_npu_cycle_engine::{
    Context, CycleScheduler, LayerKind, Network, NetworkBuilder, PathParams, WorkPartitioner,
};
use proptest::prelude::*;

fn network(seed: u64) -> Network {
    let mut b = NetworkBuilder::new("props");
    b.seed(seed);
    b.add_layer("in", LayerKind::Input, 6);
    b.add_layer("hid", LayerKind::Super, 8);
    b.add_layer("out", LayerKind::Target, 3);
    b.connect_full("in", "hid", PathParams::excitatory());
    b.connect_full("hid", "out", PathParams::excitatory());
    b.connect_full("out", "hid", PathParams::excitatory()).scale.rel = 0.3;
    b.build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_state_ranges_hold(
        seed in 1u64..10_000,
        input in proptest::collection::vec(0.0f32..=1.0, 6),
        target in proptest::collection::vec(prop_oneof![Just(0.0f32), Just(1.0f32)], 3),
    ) {
        let mut net = network(seed);
        let ctx = Context::new(1, 40, 10, 1, seed);
        let mut sched = CycleScheduler::with_cpu(&net, ctx, WorkPartitioner::sequential()).unwrap();
        net.apply_ext("in", 0, &input).unwrap();
        net.apply_ext("out", 0, &target).unwrap();

        for _ in 0..3 {
            sched.run_trial(&mut net).unwrap();
        }

        let vm_range = net.layers[1].params.acts.vm_range;
        for ni in 0..net.n_neurons() {
            let vm = net.store.nrn_v(ni, NV::Vm, 0);
            prop_assert!(vm.is_finite());
            prop_assert!(vm >= vm_range.min - 1e-6 && vm <= vm_range.max + 1e-6, "Vm {}", vm);
            let act = net.store.nrn_v(ni, NV::Act, 0);
            prop_assert!((0.0..=1.0).contains(&act), "Act {}", act);
            let spike = net.store.nrn_v(ni, NV::Spike, 0);
            prop_assert!(spike == 0.0 || spike == 1.0);
            for var in [NV::Ge, NV::Gi, NV::Gk] {
                let g = net.store.nrn_v(ni, var, 0);
                prop_assert!(g.is_finite() && g >= 0.0, "{:?} {} on neuron {}", var, g, ni);
            }
            let isi = net.store.nrn_v(ni, NV::Isi, 0);
            let spiked = net.store.nrn_v(ni, NV::Spiked, 0);
            let recent = (0.0..SPIKED_WINDOW).contains(&isi);
            prop_assert_eq!(spiked == 1.0, recent, "Spiked {} with Isi {} on neuron {}", spiked, isi, ni);
            if spike == 1.0 {
                prop_assert_eq!(isi, 0.0);
            }
        }
        for s in 0..net.n_synapses() {
            let wt = net.store.syn_v(s, SV::Wt);
            let lwt = net.store.syn_v(s, SV::LWt);
            prop_assert!((0.0..=2.0).contains(&wt), "Wt {}", wt);
            prop_assert!((0.0..=1.0).contains(&lwt), "LWt {}", lwt);
        }
    }

    #[test]
    fn test_fixed_point_error_bounded(v in -100.0f32..100.0) {
        let back = from_fixed(to_fixed(v));
        prop_assert!((back - v).abs() <= 1.0 / 16_777_216.0 + v.abs() * f32::EPSILON);
    }

    #[test]
    fn test_write_slot_never_read_early(total in 0i32..1_000_000, delay in 1u32..8) {
        let del_len = delay + 1;
        let w = write_slot(total, delay, del_len);
        // the slot written now is read exactly `delay` cycles later
        prop_assert_ne!(w, read_slot(total, del_len));
        prop_assert_eq!(w, read_slot(total + delay as i32, del_len));
    }
}

#[test]
fn test_xcal_reference_values() {
    let x = XcalParams::default();
    // below the floor: no change
    assert_eq!(x.dwt(0.00005, 0.5), 0.0);
    assert_eq!((x.d_thr, x.d_rev), (0.0001, 0.1));
    assert!((x.dwt(0.2, 0.5) - (-0.3)).abs() < 1e-6);
    assert!((x.dwt(0.03, 0.5) - (-0.27)).abs() < 1e-6);
    // above the reversal point: linear in (srval - thr)
    assert!((x.dwt(0.8, 0.5) - 0.3).abs() < 1e-6);
    assert!((x.dwt(0.3, 0.5) + 0.2).abs() < 1e-6);
    // below d_rev * thr: the negative limb through the origin
    assert!((x.dwt(0.01, 0.5) + 0.09).abs() < 1e-6);
    // continuous at the reversal point
    let rev = 0.5 * x.d_rev;
    assert!((x.dwt(rev + 1e-5, 0.5) - x.dwt(rev - 1e-5, 0.5)).abs() < 1e-3);
}
