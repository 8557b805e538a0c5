// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Network Build
//!
//! [`NetworkBuilder`] collects layer and path descriptions, resolves names,
//! finalizes the index tables, allocates the [`StateStore`], normalizes path
//! conductance scales and initializes weights and activation state.
//!
//! Once built, the structure ([`Topology`], layers, paths) never changes;
//! only parameters and the store's values do.

use crate::error::{Error, Result};
use crate::layer::{Layer, LayerActAvg, LayerKind, LayerParams, LayerValues};
use crate::path::{Path, PathParams, PathType, ScaleParams};
use ahash::AHashMap;
use neurite_npu_neural::{
    random_number, NeuronAvgVar as NAV, NeuronFlags, NeuronVar as NV, PoolVar as PV, RandFun,
    SynCaVar, SynapseVar as SV, VarAccess,
};
use neurite_npu_runtime::{StateStore, Topology};
use tracing::{debug, info};

/// Connection pattern between two layers
#[derive(Debug, Clone)]
pub enum Connectivity {
    Full,
    OneToOne,
    /// Explicit `(send_local, recv_local)` pairs
    List(Vec<(u32, u32)>),
}

impl Connectivity {
    fn pairs(&self, send_n: u32, recv_n: u32) -> Vec<(u32, u32)> {
        match self {
            Connectivity::Full => (0..send_n)
                .flat_map(|s| (0..recv_n).map(move |r| (s, r)))
                .collect(),
            Connectivity::OneToOne => (0..send_n.min(recv_n)).map(|i| (i, i)).collect(),
            Connectivity::List(v) => v.clone(),
        }
    }
}

struct LayerSpec {
    name: String,
    kind: LayerKind,
    n_neurons: u32,
    pool_sizes: Vec<u32>,
    params: LayerParams,
}

struct PathSpec {
    send: String,
    recv: String,
    conns: Connectivity,
    params: PathParams,
}

/// Read-only structure of a built network
#[derive(Clone, Copy)]
pub struct NetRef<'a> {
    pub topology: &'a Topology,
    pub layers: &'a [Layer],
    pub paths: &'a [Path],
}

/// A built network: structure, parameters and state
pub struct Network {
    pub name: String,
    pub topology: Topology,
    pub layers: Vec<Layer>,
    pub paths: Vec<Path>,
    pub store: StateStore,
    seed: u64,
    layer_names: AHashMap<String, u32>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("layers", &self.layers.len())
            .field("paths", &self.paths.len())
            .field("store", &self.store)
            .finish()
    }
}

impl Network {
    pub fn builder(name: &str) -> NetworkBuilder {
        NetworkBuilder::new(name)
    }

    #[inline]
    pub fn net_ref(&self) -> NetRef<'_> {
        NetRef {
            topology: &self.topology,
            layers: &self.layers,
            paths: &self.paths,
        }
    }

    /// Borrow the structure and the state store separately
    #[inline]
    pub fn split_mut(&mut self) -> (NetRef<'_>, &mut StateStore) {
        (
            NetRef {
                topology: &self.topology,
                layers: &self.layers,
                paths: &self.paths,
            },
            &mut self.store,
        )
    }

    pub fn ndata(&self) -> usize {
        self.store.ndata()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn n_neurons(&self) -> usize {
        self.topology.n_neurons()
    }

    pub fn n_synapses(&self) -> usize {
        self.topology.n_synapses()
    }

    pub fn layer_index(&self, name: &str) -> Result<u32> {
        self.layer_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownLayer(name.to_string()))
    }

    pub fn layer(&self, name: &str) -> Result<&Layer> {
        let li = self.layer_index(name)?;
        Ok(&self.layers[li as usize])
    }

    pub fn layer_mut(&mut self, name: &str) -> Result<&mut Layer> {
        let li = self.layer_index(name)?;
        Ok(&mut self.layers[li as usize])
    }

    /// Values of one neuron variable across a layer for replica `di`
    pub fn layer_values(&self, name: &str, var: NV, di: usize) -> Result<Vec<f32>> {
        let li = self.layer_index(name)?;
        Ok(self.topology.layers[li as usize]
            .neurons()
            .map(|ni| self.store.nrn_v(ni, var, di))
            .collect())
    }

    /// Clear external inputs, targets and their flags on every layer
    pub fn init_ext(&mut self, di: usize) {
        for ni in 0..self.topology.n_neurons() {
            self.clear_ext_neuron(ni, di);
        }
    }

    fn clear_ext_neuron(&mut self, ni: usize, di: usize) {
        self.store.set_nrn_v(ni, NV::Ext, di, 0.0);
        self.store.set_nrn_v(ni, NV::Target, di, 0.0);
        self.store.nrn_flags_mut(ni, di).remove(NeuronFlags::EXT_MASK);
    }

    /// Apply external values to a layer. Target layers store them as
    /// targets, Compare layers as comparison values, all others as clamped
    /// input. Negative values leave the neuron unclamped.
    pub fn apply_ext(&mut self, layer: &str, di: usize, values: &[f32]) -> Result<()> {
        let li = self.layer_index(layer)?;
        let (var, flag) = match self.layers[li as usize].kind {
            LayerKind::Target => (NV::Target, NeuronFlags::HAS_TARG),
            LayerKind::Compare => (NV::Target, NeuronFlags::HAS_CMPR),
            _ => (NV::Ext, NeuronFlags::HAS_EXT),
        };
        self.apply_values(li, di, values, var, flag)
    }

    /// Apply targets to any layer regardless of its kind
    pub fn apply_target(&mut self, layer: &str, di: usize, values: &[f32]) -> Result<()> {
        let li = self.layer_index(layer)?;
        self.apply_values(li, di, values, NV::Target, NeuronFlags::HAS_TARG)
    }

    fn apply_values(&mut self, li: u32, di: usize, values: &[f32], var: NV, flag: NeuronFlags) -> Result<()> {
        let range = self.topology.layers[li as usize].neurons();
        if values.len() > range.len() {
            return Err(Error::InvalidNetwork(format!(
                "{} values for layer '{}' of {} neurons",
                values.len(),
                self.layers[li as usize].name,
                range.len()
            )));
        }
        if di >= self.ndata() {
            return Err(Error::InvalidNetwork(format!("data replica {} out of range", di)));
        }
        for ni in range.clone() {
            self.clear_ext_neuron(ni, di);
        }
        for (ni, &val) in range.zip(values) {
            if val < 0.0 {
                continue;
            }
            self.store.set_nrn_v(ni, var, di, val);
            self.store.nrn_flags_mut(ni, di).insert(flag);
        }
        Ok(())
    }

    /// Lesion (`off = true`) or restore neurons of a layer in every replica
    pub fn lesion_neurons(&mut self, layer: &str, lay_idxs: &[u32], off: bool) -> Result<()> {
        let li = self.layer_index(layer)?;
        let ly = &self.topology.layers[li as usize];
        let (st, n) = (ly.neur_st as usize, ly.n_neurons);
        for &i in lay_idxs {
            if i >= n {
                return Err(Error::InvalidNetwork(format!(
                    "neuron {} out of range for layer '{}'",
                    i, layer
                )));
            }
            for di in 0..self.ndata() {
                self.store.nrn_flags_mut(st + i as usize, di).set(NeuronFlags::OFF, off);
            }
        }
        Ok(())
    }

    /// Re-run path scale normalization after parameter changes
    pub fn update_path_scales(&mut self) {
        compute_path_scales(&self.topology, &self.layers, &mut self.paths);
    }

    /// Reinitialize weights and activation state from the seed
    pub fn init_weights(&mut self) {
        init_synapses(&self.topology, &self.paths, &mut self.store, self.seed);
        init_neurons(&self.topology, &mut self.layers, &mut self.store, self.seed);
    }
}

/// Collects layers and paths, then builds a [`Network`]
pub struct NetworkBuilder {
    name: String,
    ndata: u32,
    seed: u64,
    layers: Vec<LayerSpec>,
    paths: Vec<PathSpec>,
}

impl NetworkBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ndata: 1,
            seed: 1,
            layers: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn ndata(&mut self, ndata: u32) -> &mut Self {
        self.ndata = ndata;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    /// Add a layer with kind defaults; returns its parameters for tuning
    pub fn add_layer(&mut self, name: &str, kind: LayerKind, n_neurons: u32) -> &mut LayerParams {
        self.add_pooled_layer(name, kind, n_neurons, &[])
    }

    /// Add a layer split into sub-pools of the given sizes
    pub fn add_pooled_layer(
        &mut self,
        name: &str,
        kind: LayerKind,
        n_neurons: u32,
        pool_sizes: &[u32],
    ) -> &mut LayerParams {
        let mut params = LayerParams::for_kind(kind);
        if pool_sizes.len() > 1 {
            params.inhib.pool.on = true;
        }
        self.layers.push(LayerSpec {
            name: name.to_string(),
            kind,
            n_neurons,
            pool_sizes: pool_sizes.to_vec(),
            params,
        });
        let last = self.layers.len() - 1;
        &mut self.layers[last].params
    }

    pub fn connect(&mut self, send: &str, recv: &str, conns: Connectivity, params: PathParams) -> &mut PathParams {
        self.paths.push(PathSpec {
            send: send.to_string(),
            recv: recv.to_string(),
            conns,
            params,
        });
        let last = self.paths.len() - 1;
        &mut self.paths[last].params
    }

    pub fn connect_full(&mut self, send: &str, recv: &str, params: PathParams) -> &mut PathParams {
        self.connect(send, recv, Connectivity::Full, params)
    }

    pub fn layer_params_mut(&mut self, name: &str) -> Option<&mut LayerParams> {
        self.layers
            .iter_mut()
            .find(|l| l.name == name)
            .map(|l| &mut l.params)
    }

    pub fn build(&mut self) -> Result<Network> {
        if self.layers.is_empty() {
            return Err(Error::InvalidNetwork("network has no layers".into()));
        }
        let mut names: AHashMap<String, u32> = AHashMap::with_capacity(self.layers.len());
        let mut topology = Topology::new();
        for spec in &self.layers {
            if names.contains_key(&spec.name) {
                return Err(Error::InvalidNetwork(format!("duplicate layer name '{}'", spec.name)));
            }
            let li = topology.add_layer(spec.n_neurons, &spec.pool_sizes)?;
            names.insert(spec.name.clone(), li);
        }

        let ndata = self.ndata.max(1) as usize;
        let mut layers = Vec::with_capacity(self.layers.len());
        for (li, spec) in self.layers.iter().enumerate() {
            let mut params = spec.params.clone();
            params.update();
            let lay_inhib = &mut params.inhib.lay_inhib;
            if lay_inhib.layers.len() > lay_inhib.idxs.len() {
                return Err(Error::InvalidNetwork(format!(
                    "layer '{}' borrows inhibition from {} layers, at most {} allowed",
                    spec.name,
                    lay_inhib.layers.len(),
                    lay_inhib.idxs.len()
                )));
            }
            lay_inhib.idxs = [None; 4];
            for (k, other) in lay_inhib.layers.iter().enumerate() {
                let oi = names
                    .get(other)
                    .copied()
                    .ok_or_else(|| Error::UnknownLayer(other.clone()))?;
                lay_inhib.idxs[k] = Some(oi);
            }
            layers.push(Layer::new(&spec.name, spec.kind, li as u32, params, ndata));
        }

        let mut paths = Vec::with_capacity(self.paths.len());
        for spec in &self.paths {
            let si = *names.get(&spec.send).ok_or_else(|| Error::UnknownLayer(spec.send.clone()))?;
            let ri = *names.get(&spec.recv).ok_or_else(|| Error::UnknownLayer(spec.recv.clone()))?;
            let mut params = spec.params.clone();
            params.update();
            let pairs = spec
                .conns
                .pairs(self.layers[si as usize].n_neurons, self.layers[ri as usize].n_neurons);
            topology.add_path(si, ri, params.delay, &pairs)?;
            paths.push(Path {
                name: format!("{}To{}", spec.send, spec.recv),
                send_layer: si,
                recv_layer: ri,
                params,
                gscale: 0.0,
            });
        }
        topology.finalize()?;
        let mut store = StateStore::new(&topology, ndata as u32)?;

        compute_path_scales(&topology, &layers, &mut paths);
        init_synapses(&topology, &paths, &mut store, self.seed);
        init_neurons(&topology, &mut layers, &mut store, self.seed);

        info!(
            "[NPU-BUILD] Built network '{}': {} layers, {} paths, {} neurons, {} synapses, {} replicas",
            self.name,
            layers.len(),
            paths.len(),
            topology.n_neurons(),
            topology.n_synapses(),
            ndata
        );
        Ok(Network {
            name: self.name.clone(),
            topology,
            layers,
            paths,
            store,
            seed: self.seed,
            layer_names: names,
        })
    }
}

/// `gscale = abs * rel / sum(rel) * expected sender activity scale`, where
/// the sum runs over paths of the same type into the same layer
fn compute_path_scales(topology: &Topology, layers: &[Layer], paths: &mut [Path]) {
    let mut rel_sums: AHashMap<(u32, PathType), f32> = AHashMap::new();
    for pj in paths.iter() {
        *rel_sums.entry((pj.recv_layer, pj.params.path_type)).or_insert(0.0) += pj.params.scale.rel;
    }
    for (pi, pj) in paths.iter_mut().enumerate() {
        let idx = &topology.paths[pi];
        let send = &layers[pj.send_layer as usize];
        let ncon = if idx.recv_n > 0 {
            idx.n_syn as f32 / idx.recv_n as f32
        } else {
            0.0
        };
        let slay = ScaleParams::slay_act_scale(send.params.inhib.act_avg.nominal, idx.send_n as f32, ncon);
        let sum = rel_sums
            .get(&(pj.recv_layer, pj.params.path_type))
            .copied()
            .unwrap_or(0.0);
        let rel = if sum > 0.0 { pj.params.scale.rel / sum } else { 0.0 };
        pj.gscale = pj.params.scale.abs * rel * slay;
        debug!("[NPU-BUILD] Path {} scale {:.4}", pj.name, pj.gscale);
    }
}

fn init_synapses(topology: &Topology, paths: &[Path], store: &mut StateStore, seed: u64) {
    let ndata = store.ndata();
    let counter = seed.rotate_left(17);
    for (pi, pj) in paths.iter().enumerate() {
        let swt = &pj.params.swt;
        for syni in topology.paths[pi].syn_st as usize..(topology.paths[pi].syn_st + topology.paths[pi].n_syn) as usize {
            let r = random_number(syni as u32, counter, RandFun::SWtInit);
            let (wt, s, l) = swt.init_wts_syn(r, swt.init.mean, swt.init.spct);
            store.set_syn_v(syni, SV::Wt, wt);
            store.set_syn_v(syni, SV::SWt, s);
            store.set_syn_v(syni, SV::LWt, l);
            store.set_syn_v(syni, SV::DWt, 0.0);
            store.set_syn_v(syni, SV::DSWt, 0.0);
            for di in 0..ndata {
                for var in SynCaVar::ALL {
                    store.set_syn_ca_v(syni, *var, di, 0.0);
                }
                store.set_syn_ca_v(syni, SynCaVar::CaUpT, di, -1.0);
            }
        }
    }
}

/// Target activity values spread over `range`, optionally permuted
fn trg_avgs(n: usize, layer: &LayerParams, first_ni: u32, seed: u64) -> Vec<f32> {
    let ta = &layer.learn.trg_avg_act;
    let mut vals: Vec<f32> = if n <= 1 {
        vec![0.5 * (ta.trg_range.min + ta.trg_range.max); n]
    } else {
        (0..n)
            .map(|i| ta.trg_range.min + ta.trg_range.range() * i as f32 / (n - 1) as f32)
            .collect()
    };
    if ta.permute && n > 1 {
        let mut keyed: Vec<(f32, f32)> = vals
            .iter()
            .enumerate()
            .map(|(i, &v)| (random_number(first_ni + i as u32, seed, RandFun::TrgAvgPermute), v))
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        vals = keyed.into_iter().map(|(_, v)| v).collect();
    }
    vals
}

fn init_neurons(topology: &Topology, layers: &mut [Layer], store: &mut StateStore, seed: u64) {
    let ndata = store.ndata();
    for (li, ly) in topology.layers.iter().enumerate() {
        let layer = &mut layers[li];
        let params = &layer.params;
        let nominal = params.inhib.act_avg.nominal;
        layer.act_avg = LayerActAvg::new(nominal);
        for v in layer.vals.iter_mut() {
            *v = LayerValues::default();
        }

        // target activity per sub-pool or across the layer
        let groups: Vec<(usize, usize)> = if params.learn.trg_avg_act.pool && ly.has_sub_pools() {
            (ly.pool_st + 1..ly.pool_st + ly.n_pools)
                .map(|pi| {
                    let p = &topology.pools[pi as usize];
                    (p.neur_st as usize, p.neur_ed as usize)
                })
                .collect()
        } else {
            vec![(ly.neurons().start, ly.neurons().end)]
        };
        for (st, ed) in groups {
            let trg = trg_avgs(ed - st, params, st as u32, seed);
            for (ni, t) in (st..ed).zip(trg) {
                let t = if params.learn.trg_avg_act.on { t } else { 1.0 };
                store.set_nrn_avg_v(ni, NAV::TrgAvg, t);
            }
        }

        for ni in ly.neurons() {
            let ge_base = params.acts.init.ge_base_for(ni as u32, seed);
            let gi_base = params.acts.init.gi_base_for(ni as u32, seed);
            store.set_nrn_avg_v(ni, NAV::GeBase, ge_base);
            store.set_nrn_avg_v(ni, NAV::GiBase, gi_base);
            store.set_nrn_avg_v(ni, NAV::ActAvg, nominal);
            store.set_nrn_avg_v(ni, NAV::AvgPct, nominal);
            store.set_nrn_avg_v(ni, NAV::DTrgAvg, 0.0);
            store.set_nrn_avg_v(ni, NAV::AvgDif, 0.0);
            for di in 0..ndata {
                *store.nrn_flags_mut(ni, di) = NeuronFlags::EMPTY;
                let mut n = store.neuron_view(ni, di);
                params.acts.init_acts(&mut n, ge_base, gi_base);
                params.learn.init_neur_ca(&mut n);
                for var in [NV::ActM, NV::ActP, NV::SpkPrv, NV::CaDiff] {
                    n.set(var, 0.0);
                }
            }
        }

        let clamped = if params.acts.clamp.is_input && !params.acts.clamp.add { 1.0 } else { 0.0 };
        for pi in ly.pool_st as usize..(ly.pool_st + ly.n_pools) as usize {
            for di in 0..ndata {
                for var in PV::ALL {
                    store.set_pool_v(pi, *var, di, 0.0);
                }
                store.set_pool_v(pi, PV::Clamped, di, clamped);
            }
        }
    }
    store.reset_conductances();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Network {
        let mut b = NetworkBuilder::new("small");
        b.ndata(2).seed(7);
        b.add_layer("in", LayerKind::Input, 3);
        b.add_pooled_layer("hid", LayerKind::Super, 4, &[2, 2]);
        b.add_layer("out", LayerKind::Target, 2);
        b.connect_full("in", "hid", PathParams::excitatory());
        b.connect_full("hid", "out", PathParams::excitatory());
        b.connect("out", "hid", Connectivity::Full, PathParams::excitatory()).scale.rel = 0.2;
        b.build().unwrap()
    }

    #[test]
    fn test_build_counts() {
        let net = small();
        assert_eq!(net.n_neurons(), 9);
        assert_eq!(net.n_synapses(), 12 + 8 + 8);
        assert_eq!(net.ndata(), 2);
        assert_eq!(net.layer_index("out").unwrap(), 2);
        assert!(matches!(net.layer_index("nope"), Err(Error::UnknownLayer(_))));
    }

    #[test]
    fn test_weights_in_range_and_consistent() {
        let net = small();
        for syni in 0..net.n_synapses() {
            let wt = net.store.syn_v(syni, SV::Wt);
            let swt = net.store.syn_v(syni, SV::SWt);
            let lwt = net.store.syn_v(syni, SV::LWt);
            assert!((0.0..=2.0).contains(&wt));
            assert!((0.2..=0.8).contains(&swt));
            assert!((0.0..=1.0).contains(&lwt));
            let sw = &net.paths[net.topology.syns[syni].path as usize].params.swt;
            assert!((sw.wt_val(swt, lwt) - wt).abs() < 1e-5);
            assert_eq!(net.store.syn_ca_v(syni, SynCaVar::CaUpT, 1), -1.0);
        }
    }

    #[test]
    fn test_rel_normalization() {
        let net = small();
        // in->hid and out->hid share the excitatory rel sum of 1.2
        let in_hid = &net.paths[0];
        let out_hid = &net.paths[2];
        let slay_in = ScaleParams::slay_act_scale(0.1, 3.0, 3.0);
        assert!((in_hid.gscale - slay_in / 1.2).abs() < 1e-6);
        let slay_out = ScaleParams::slay_act_scale(0.1, 2.0, 2.0);
        assert!((out_hid.gscale - 0.2 * slay_out / 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_rel_sums_split_by_path_type() {
        let mut b = NetworkBuilder::new("types");
        b.add_layer("in", LayerKind::Input, 2);
        b.add_layer("hid", LayerKind::Super, 2);
        b.connect_full("in", "hid", PathParams::excitatory()).scale.rel = 0.5;
        b.connect_full("hid", "hid", PathParams::inhibitory()).scale.rel = 3.0;
        let net = b.build().unwrap();
        // each path is alone in its (layer, type) group
        let exc = ScaleParams::slay_act_scale(0.1, 2.0, 2.0);
        assert!((net.paths[0].gscale - exc).abs() < 1e-6);
        assert!((net.paths[1].gscale - exc).abs() < 1e-6);

        let mut keys = ahash::AHashSet::new();
        for pj in &net.paths {
            keys.insert((pj.recv_layer, pj.params.path_type));
        }
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&(1, PathType::Inhibitory)));
    }

    #[test]
    fn test_apply_ext_by_kind() {
        let mut net = small();
        net.apply_ext("in", 1, &[1.0, -1.0, 0.5]).unwrap();
        let st = net.topology.layers[0].neur_st as usize;
        assert!(net.store.nrn_flags(st, 1).contains(NeuronFlags::HAS_EXT));
        assert!(!net.store.nrn_flags(st + 1, 1).contains(NeuronFlags::HAS_EXT));
        assert!(!net.store.nrn_flags(st, 0).contains(NeuronFlags::HAS_EXT));
        assert_eq!(net.store.nrn_v(st + 2, NV::Ext, 1), 0.5);

        net.apply_ext("out", 0, &[1.0, 0.0]).unwrap();
        let out = net.topology.layers[2].neur_st as usize;
        assert!(net.store.nrn_flags(out, 0).contains(NeuronFlags::HAS_TARG));
        assert_eq!(net.store.nrn_v(out, NV::Target, 0), 1.0);

        assert!(net.apply_ext("in", 0, &[1.0; 4]).is_err());
        net.init_ext(1);
        assert!(!net.store.nrn_flags(st, 1).intersects(NeuronFlags::EXT_MASK));
    }

    #[test]
    fn test_lesion() {
        let mut net = small();
        net.lesion_neurons("hid", &[1], true).unwrap();
        let ni = net.topology.layers[1].neur_st as usize + 1;
        assert!(net.store.nrn_is_off(ni));
        assert!(net.store.nrn_flags(ni, 1).is_off());
        net.lesion_neurons("hid", &[1], false).unwrap();
        assert!(!net.store.nrn_is_off(ni));
        assert!(net.lesion_neurons("hid", &[9], true).is_err());
    }

    #[test]
    fn test_trg_avg_spread() {
        let net = small();
        let st = net.topology.layers[0].neur_st as usize;
        let mut vals: Vec<f32> = (st..st + 3).map(|ni| net.store.nrn_avg_v(ni, NAV::TrgAvg)).collect();
        vals.sort_by(f32::total_cmp);
        assert_eq!(vals, vec![0.5, 1.25, 2.0]);
    }

    #[test]
    fn test_unknown_layer_in_path() {
        let mut b = NetworkBuilder::new("bad");
        b.add_layer("a", LayerKind::Super, 2);
        b.connect_full("a", "b", PathParams::excitatory());
        assert!(matches!(b.build(), Err(Error::UnknownLayer(_))));
    }

    #[test]
    fn test_input_pools_clamped() {
        let net = small();
        assert_eq!(net.store.pool_v(0, PV::Clamped, 0), 1.0);
        assert_eq!(net.store.pool_v(1, PV::Clamped, 1), 0.0);
    }
}
