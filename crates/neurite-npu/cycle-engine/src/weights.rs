// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Weight Persistence
//!
//! Learned state as versioned JSON: per-path Wt, LWt and SWt, per-neuron
//! long-run averages and per-replica layer values. Structure is not saved;
//! a file can only be restored into a network built the same way, which is
//! checked layer by layer and path by path.

use crate::error::{Error, Result};
use crate::layer::{LayerActAvg, LayerValues};
use crate::network::Network;
use neurite_npu_neural::{NeuronAvgVar as NAV, SynapseVar as SV};
use neurite_npu_runtime::{RuntimeError, LAYOUT_VERSION};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path as FsPath;
use tracing::info;

/// Current weight file format (increment when the format changes)
pub const WEIGHTS_FORMAT_VERSION: u32 = 1;

/// Per-neuron averages carried across runs
const SAVED_AVGS: [NAV; 4] = [NAV::ActAvg, NAV::AvgPct, NAV::TrgAvg, NAV::AvgDif];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsMetadata {
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub description: String,
}

impl Default for WeightsMetadata {
    fn default() -> Self {
        Self {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerWeights {
    pub name: String,
    pub n_neurons: usize,
    /// One vector per saved average, neuron-major within each
    pub act_avg: Vec<f32>,
    pub avg_pct: Vec<f32>,
    pub trg_avg: Vec<f32>,
    pub avg_dif: Vec<f32>,
    /// Layer-wide running averages and GiMult
    pub layer_avg: LayerActAvg,
    pub vals: Vec<LayerValues>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathWeights {
    pub name: String,
    pub n_synapses: usize,
    pub wt: Vec<f32>,
    pub lwt: Vec<f32>,
    pub swt: Vec<f32>,
}

/// Everything a trained network needs to resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsSnapshot {
    pub version: u32,
    pub layout_version: u32,
    pub network: String,
    pub metadata: WeightsMetadata,
    pub layers: Vec<LayerWeights>,
    pub paths: Vec<PathWeights>,
}

impl WeightsSnapshot {
    /// Capture the learned state of `net`
    pub fn capture(net: &Network) -> Self {
        let store = &net.store;
        let layers = net
            .layers
            .iter()
            .zip(&net.topology.layers)
            .map(|(layer, ly)| {
                let col = |var: NAV| ly.neurons().map(|ni| store.nrn_avg_v(ni, var)).collect::<Vec<_>>();
                LayerWeights {
                    name: layer.name.clone(),
                    n_neurons: ly.n_neurons as usize,
                    act_avg: col(SAVED_AVGS[0]),
                    avg_pct: col(SAVED_AVGS[1]),
                    trg_avg: col(SAVED_AVGS[2]),
                    avg_dif: col(SAVED_AVGS[3]),
                    layer_avg: layer.act_avg,
                    vals: layer.vals.clone(),
                }
            })
            .collect();

        let paths = net
            .paths
            .iter()
            .zip(&net.topology.paths)
            .map(|(path, pj)| {
                let syns = pj.syn_st as usize..(pj.syn_st + pj.n_syn) as usize;
                let col = |var: SV| syns.clone().map(|s| store.syn_v(s, var)).collect::<Vec<_>>();
                PathWeights {
                    name: path.name.clone(),
                    n_synapses: pj.n_syn as usize,
                    wt: col(SV::Wt),
                    lwt: col(SV::LWt),
                    swt: col(SV::SWt),
                }
            })
            .collect();

        Self {
            version: WEIGHTS_FORMAT_VERSION,
            layout_version: LAYOUT_VERSION,
            network: net.name.clone(),
            metadata: WeightsMetadata::default(),
            layers,
            paths,
        }
    }

    /// Write the captured state back; fails without changes on any mismatch
    pub fn restore(&self, net: &mut Network) -> Result<()> {
        self.check(net)?;
        let Network {
            topology,
            layers,
            store,
            ..
        } = net;

        for ((lw, layer), ly) in self.layers.iter().zip(layers.iter_mut()).zip(&topology.layers) {
            let cols = [&lw.act_avg, &lw.avg_pct, &lw.trg_avg, &lw.avg_dif];
            for (var, col) in SAVED_AVGS.iter().zip(cols) {
                for (ni, &v) in ly.neurons().zip(col.iter()) {
                    store.set_nrn_avg_v(ni, *var, v);
                }
            }
            layer.act_avg = lw.layer_avg;
            for (dst, src) in layer.vals.iter_mut().zip(&lw.vals) {
                *dst = *src;
            }
        }

        for (pw, pj) in self.paths.iter().zip(&topology.paths) {
            for (k, s) in (pj.syn_st as usize..(pj.syn_st + pj.n_syn) as usize).enumerate() {
                store.set_syn_v(s, SV::Wt, pw.wt[k]);
                store.set_syn_v(s, SV::LWt, pw.lwt[k]);
                store.set_syn_v(s, SV::SWt, pw.swt[k]);
                store.set_syn_v(s, SV::DWt, 0.0);
                store.set_syn_v(s, SV::DSWt, 0.0);
            }
        }
        Ok(())
    }

    fn check(&self, net: &Network) -> Result<()> {
        if self.version != WEIGHTS_FORMAT_VERSION {
            return Err(Error::WeightFile(format!(
                "format version {} not supported (expected {})",
                self.version, WEIGHTS_FORMAT_VERSION
            )));
        }
        if self.layout_version != LAYOUT_VERSION {
            return Err(RuntimeError::LayoutMismatch {
                what: "layout version",
                expected: LAYOUT_VERSION as usize,
                found: self.layout_version as usize,
            }
            .into());
        }
        mismatch("layers", net.layers.len(), self.layers.len())?;
        mismatch("paths", net.paths.len(), self.paths.len())?;

        for ((lw, layer), ly) in self.layers.iter().zip(&net.layers).zip(&net.topology.layers) {
            if lw.name != layer.name {
                return Err(Error::WeightFile(format!(
                    "layer '{}' found where '{}' expected",
                    lw.name, layer.name
                )));
            }
            let n = ly.n_neurons as usize;
            mismatch("layer neurons", n, lw.n_neurons)?;
            for col in [&lw.act_avg, &lw.avg_pct, &lw.trg_avg, &lw.avg_dif] {
                mismatch("neuron averages", n, col.len())?;
            }
            mismatch("data replicas", layer.vals.len(), lw.vals.len())?;
        }
        for ((pw, path), pj) in self.paths.iter().zip(&net.paths).zip(&net.topology.paths) {
            if pw.name != path.name {
                return Err(Error::WeightFile(format!(
                    "path '{}' found where '{}' expected",
                    pw.name, path.name
                )));
            }
            let n = pj.n_syn as usize;
            mismatch("path synapses", n, pw.n_synapses)?;
            for col in [&pw.wt, &pw.lwt, &pw.swt] {
                mismatch("synapse weights", n, col.len())?;
            }
        }
        Ok(())
    }
}

fn mismatch(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(RuntimeError::LayoutMismatch { what, expected, found }.into());
    }
    Ok(())
}

/// Save the learned state of `net` as JSON
pub fn save_weights<P: AsRef<FsPath>>(net: &Network, path: P) -> Result<()> {
    let snapshot = WeightsSnapshot::capture(net);
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
    info!(
        "[NPU-WEIGHTS] Saved {} paths of '{}' to {}",
        snapshot.paths.len(),
        net.name,
        path.as_ref().display()
    );
    Ok(())
}

/// Load a JSON weight file into `net`
pub fn load_weights<P: AsRef<FsPath>>(net: &mut Network, path: P) -> Result<()> {
    let file = File::open(path.as_ref())?;
    let snapshot: WeightsSnapshot = serde_json::from_reader(BufReader::new(file))?;
    snapshot.restore(net)?;
    info!(
        "[NPU-WEIGHTS] Loaded '{}' (saved at {}) from {}",
        snapshot.network,
        snapshot.metadata.timestamp,
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;
    use crate::network::NetworkBuilder;
    use crate::path::PathParams;
    use tempfile::NamedTempFile;

    fn net(seed: u64, n_hid: u32) -> Network {
        let mut b = NetworkBuilder::new("wts");
        b.seed(seed);
        b.add_layer("in", LayerKind::Input, 3);
        b.add_layer("hid", LayerKind::Super, n_hid);
        b.connect_full("in", "hid", PathParams::excitatory());
        b.build().unwrap()
    }

    #[test]
    fn test_save_load_restores_weights() {
        let mut src = net(7, 2);
        src.store.set_syn_v(1, SV::Wt, 0.123);
        src.store.set_nrn_avg_v(4, NAV::ActAvg, 0.33);
        src.layers[1].act_avg.gi_mult = 1.4;
        let file = NamedTempFile::new().unwrap();
        save_weights(&src, file.path()).unwrap();

        let mut dst = net(99, 2);
        load_weights(&mut dst, file.path()).unwrap();
        for s in 0..src.n_synapses() {
            for var in [SV::Wt, SV::LWt, SV::SWt] {
                assert_eq!(dst.store.syn_v(s, var), src.store.syn_v(s, var));
            }
        }
        assert_eq!(dst.store.syn_v(1, SV::Wt), 0.123);
        assert_eq!(dst.store.nrn_avg_v(4, NAV::ActAvg), 0.33);
        assert_eq!(dst.layers[1].act_avg.gi_mult, 1.4);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let src = net(1, 2);
        let mut dst = net(1, 3);
        let before: Vec<f32> = (0..dst.n_synapses()).map(|s| dst.store.syn_v(s, SV::Wt)).collect();
        let err = WeightsSnapshot::capture(&src).restore(&mut dst).unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::LayoutMismatch { .. })));
        let after: Vec<f32> = (0..dst.n_synapses()).map(|s| dst.store.syn_v(s, SV::Wt)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_future_version_rejected() {
        let src = net(1, 2);
        let mut snap = WeightsSnapshot::capture(&src);
        snap.version = WEIGHTS_FORMAT_VERSION + 1;
        let mut dst = net(1, 2);
        assert!(matches!(snap.restore(&mut dst), Err(Error::WeightFile(_))));
    }
}
