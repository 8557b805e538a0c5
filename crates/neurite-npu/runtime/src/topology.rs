// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! Build-time index tables
//!
//! Layers own contiguous neuron ranges and pool ranges. Each path owns a
//! contiguous synapse range grouped by sending neuron (the send view); a
//! second table lists the same synapses grouped by receiving neuron (the
//! recv view). Both views address one physical synapse array.
//!
//! Tables are validated once in [`Topology::finalize`] and never again on
//! the per-cycle path.

use crate::error::{Result, RuntimeError};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Start offset and count into another table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartN {
    pub start: u32,
    pub n: u32,
}

impl StartN {
    #[inline]
    pub fn range(self) -> Range<usize> {
        self.start as usize..(self.start + self.n) as usize
    }
}

/// Per-neuron back references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeuronIndexes {
    pub layer: u32,
    /// Index within the layer
    pub lay_ni: u32,
    /// Global index of the pool used for inhibition (the layer pool when the
    /// layer has no sub-pools)
    pub sub_pool: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerIndexes {
    pub neur_st: u32,
    pub n_neurons: u32,
    /// First pool is the layer-wide pool; sub-pools follow
    pub pool_st: u32,
    pub n_pools: u32,
    pub recv_paths: Vec<u32>,
    pub send_paths: Vec<u32>,
}

impl LayerIndexes {
    #[inline]
    pub fn neurons(&self) -> Range<usize> {
        self.neur_st as usize..(self.neur_st + self.n_neurons) as usize
    }

    #[inline]
    pub fn has_sub_pools(&self) -> bool {
        self.n_pools > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolIndexes {
    pub layer: u32,
    /// Global neuron range [neur_st, neur_ed)
    pub neur_st: u32,
    pub neur_ed: u32,
    pub is_layer_pool: bool,
}

impl PoolIndexes {
    #[inline]
    pub fn n_neurons(&self) -> usize {
        (self.neur_ed - self.neur_st) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathIndexes {
    pub send_layer: u32,
    pub recv_layer: u32,
    pub send_neur_st: u32,
    pub send_n: u32,
    pub recv_neur_st: u32,
    pub recv_n: u32,
    /// Global synapse range of this path
    pub syn_st: u32,
    pub n_syn: u32,
    /// Offset of this path's senders in [`Topology::send_con`]
    pub send_con_st: u32,
    /// Offset of this path's receivers in [`Topology::recv_con`]
    pub recv_con_st: u32,
    /// Transmission delay in cycles (at least 1)
    pub delay: u32,
    /// Ring-buffer slots: `delay + 1`
    pub del_len: u32,
    /// Offset of this path's region in the conductance buffer, in units of
    /// data replicas
    pub gbuf_st: u32,
    /// Slot of this path in the receiving neuron's per-path GSyn block
    pub gsyn_k: u32,
}

/// Per-synapse back references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynIndexes {
    pub send: u32,
    pub recv: u32,
    pub path: u32,
}

/// All index tables of a built network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    pub layers: Vec<LayerIndexes>,
    pub pools: Vec<PoolIndexes>,
    pub neurons: Vec<NeuronIndexes>,
    pub paths: Vec<PathIndexes>,
    pub syns: Vec<SynIndexes>,
    /// Per path, per sending neuron: range into the synapse array
    pub send_con: Vec<StartN>,
    /// Per path, per receiving neuron: range into [`Self::recv_syn_idx`]
    pub recv_con: Vec<StartN>,
    /// Synapse indices grouped by receiving neuron
    pub recv_syn_idx: Vec<u32>,
    /// Largest number of receiving paths on any layer (at least 1)
    pub max_recv_paths: u32,
    /// Total conductance-buffer length per data replica
    pub gbuf_len: u32,
    finalized: bool,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn n_neurons(&self) -> usize {
        self.neurons.len()
    }

    #[inline]
    pub fn n_pools(&self) -> usize {
        self.pools.len()
    }

    #[inline]
    pub fn n_synapses(&self) -> usize {
        self.syns.len()
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Add a layer of `n_neurons`; `pool_sizes` with more than one entry
    /// splits it into sub-pools (sizes must sum to `n_neurons`).
    ///
    /// Returns the layer index.
    pub fn add_layer(&mut self, n_neurons: u32, pool_sizes: &[u32]) -> Result<u32> {
        if self.finalized {
            return Err(RuntimeError::InvalidParameters(
                "topology is finalized; layers are fixed after build".into(),
            ));
        }
        if n_neurons == 0 {
            return Err(RuntimeError::InvalidParameters("layer has no neurons".into()));
        }
        let li = self.layers.len() as u32;
        let neur_st = self.neurons.len() as u32;
        let pool_st = self.pools.len() as u32;

        self.pools.push(PoolIndexes {
            layer: li,
            neur_st,
            neur_ed: neur_st + n_neurons,
            is_layer_pool: true,
        });

        let mut n_pools = 1;
        if pool_sizes.len() > 1 {
            let total: u32 = pool_sizes.iter().sum();
            if total != n_neurons {
                return Err(RuntimeError::InvalidParameters(format!(
                    "sub-pool sizes sum to {} but layer has {} neurons",
                    total, n_neurons
                )));
            }
            let mut st = neur_st;
            for &sz in pool_sizes {
                if sz == 0 {
                    return Err(RuntimeError::InvalidParameters("empty sub-pool".into()));
                }
                self.pools.push(PoolIndexes {
                    layer: li,
                    neur_st: st,
                    neur_ed: st + sz,
                    is_layer_pool: false,
                });
                st += sz;
            }
            n_pools += pool_sizes.len() as u32;
        }

        for lay_ni in 0..n_neurons {
            let ni = neur_st + lay_ni;
            let sub_pool = if n_pools > 1 {
                (pool_st + 1..pool_st + n_pools)
                    .find(|&pi| {
                        let p = &self.pools[pi as usize];
                        ni >= p.neur_st && ni < p.neur_ed
                    })
                    .unwrap_or(pool_st)
            } else {
                pool_st
            };
            self.neurons.push(NeuronIndexes {
                layer: li,
                lay_ni,
                sub_pool,
            });
        }

        self.layers.push(LayerIndexes {
            neur_st,
            n_neurons,
            pool_st,
            n_pools,
            recv_paths: Vec::new(),
            send_paths: Vec::new(),
        });
        Ok(li)
    }

    /// Add a path with explicit `(send_local, recv_local)` connections.
    /// Delays below 1 are raised to 1.
    ///
    /// Returns the path index.
    pub fn add_path(
        &mut self,
        send_layer: u32,
        recv_layer: u32,
        delay: u32,
        conns: &[(u32, u32)],
    ) -> Result<u32> {
        if self.finalized {
            return Err(RuntimeError::InvalidParameters(
                "topology is finalized; paths are fixed after build".into(),
            ));
        }
        let (send, recv) = match (
            self.layers.get(send_layer as usize),
            self.layers.get(recv_layer as usize),
        ) {
            (Some(s), Some(r)) => (s.clone(), r.clone()),
            _ => {
                return Err(RuntimeError::InvalidIndexTable(format!(
                    "path references missing layer ({} -> {})",
                    send_layer, recv_layer
                )))
            }
        };

        let mut sorted: Vec<(u32, u32)> = conns.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for &(s, r) in &sorted {
            if s >= send.n_neurons || r >= recv.n_neurons {
                return Err(RuntimeError::CapacityExceeded {
                    requested: s.max(r) as usize,
                    available: send.n_neurons.min(recv.n_neurons) as usize,
                });
            }
        }

        let pi = self.paths.len() as u32;
        let syn_st = self.syns.len() as u32;
        let send_con_st = self.send_con.len() as u32;

        let mut counts = vec![0u32; send.n_neurons as usize];
        for &(s, _) in &sorted {
            counts[s as usize] += 1;
        }
        let mut st = syn_st;
        for c in counts {
            self.send_con.push(StartN { start: st, n: c });
            st += c;
        }
        for &(s, r) in &sorted {
            self.syns.push(SynIndexes {
                send: send.neur_st + s,
                recv: recv.neur_st + r,
                path: pi,
            });
        }

        let delay = delay.max(1);
        self.paths.push(PathIndexes {
            send_layer,
            recv_layer,
            send_neur_st: send.neur_st,
            send_n: send.n_neurons,
            recv_neur_st: recv.neur_st,
            recv_n: recv.n_neurons,
            syn_st,
            n_syn: sorted.len() as u32,
            send_con_st,
            recv_con_st: 0,
            delay,
            del_len: delay + 1,
            gbuf_st: 0,
            gsyn_k: 0,
        });
        self.layers[send_layer as usize].send_paths.push(pi);
        self.layers[recv_layer as usize].recv_paths.push(pi);
        Ok(pi)
    }

    /// Compute the recv views, buffer offsets and GSyn slots, then validate
    /// every table. After this the topology is immutable.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.recv_con.clear();
        self.recv_syn_idx.clear();
        let mut gbuf_st = 0u32;
        for pi in 0..self.paths.len() {
            let pj = self.paths[pi];
            let recv_con_st = self.recv_con.len() as u32;
            let mut counts = vec![0u32; pj.recv_n as usize];
            for syn in &self.syns[pj.syn_st as usize..(pj.syn_st + pj.n_syn) as usize] {
                counts[(syn.recv - pj.recv_neur_st) as usize] += 1;
            }
            let base = self.recv_syn_idx.len() as u32;
            let mut st = base;
            let mut fill = Vec::with_capacity(counts.len());
            for c in &counts {
                self.recv_con.push(StartN { start: st, n: *c });
                fill.push(st);
                st += c;
            }
            self.recv_syn_idx.resize(st as usize, 0);
            // sender-major synapse order keeps each receiver's list sorted by sender
            for syni in pj.syn_st..pj.syn_st + pj.n_syn {
                let ri = (self.syns[syni as usize].recv - pj.recv_neur_st) as usize;
                self.recv_syn_idx[fill[ri] as usize] = syni;
                fill[ri] += 1;
            }

            let p = &mut self.paths[pi];
            p.recv_con_st = recv_con_st;
            p.gbuf_st = gbuf_st;
            gbuf_st += p.del_len * p.recv_n;
        }
        self.gbuf_len = gbuf_st;

        let mut max_recv = 1u32;
        for li in 0..self.layers.len() {
            let recv_paths = self.layers[li].recv_paths.clone();
            max_recv = max_recv.max(recv_paths.len() as u32);
            for (k, &pi) in recv_paths.iter().enumerate() {
                self.paths[pi as usize].gsyn_k = k as u32;
            }
        }
        self.max_recv_paths = max_recv;

        self.validate()?;
        self.finalized = true;
        tracing::debug!(
            "[NPU-TOPOLOGY] Finalized {} layers, {} pools, {} neurons, {} paths, {} synapses",
            self.layers.len(),
            self.pools.len(),
            self.neurons.len(),
            self.paths.len(),
            self.syns.len()
        );
        Ok(())
    }

    /// Check every cross-reference between tables
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(RuntimeError::InvalidIndexTable(msg));

        let mut next_neur = 0u32;
        let mut next_pool = 0u32;
        for (li, ly) in self.layers.iter().enumerate() {
            if ly.neur_st != next_neur {
                return bad(format!("layer {} neurons not contiguous", li));
            }
            if ly.pool_st != next_pool {
                return bad(format!("layer {} pools not contiguous", li));
            }
            next_neur += ly.n_neurons;
            next_pool += ly.n_pools;
            for pi in ly.pool_st..ly.pool_st + ly.n_pools {
                let Some(pl) = self.pools.get(pi as usize) else {
                    return bad(format!("layer {} pool {} missing", li, pi));
                };
                if pl.layer as usize != li || pl.neur_st < ly.neur_st || pl.neur_ed > ly.neur_st + ly.n_neurons {
                    return bad(format!("pool {} outside layer {}", pi, li));
                }
            }
        }
        if next_neur as usize != self.neurons.len() || next_pool as usize != self.pools.len() {
            return bad("neuron or pool count does not match layer tables".into());
        }
        for (ni, nrn) in self.neurons.iter().enumerate() {
            let Some(ly) = self.layers.get(nrn.layer as usize) else {
                return bad(format!("neuron {} has missing layer", ni));
            };
            if ly.neur_st + nrn.lay_ni != ni as u32 {
                return bad(format!("neuron {} layer index mismatch", ni));
            }
        }

        let mut gbuf_st = 0u32;
        for (pi, pj) in self.paths.iter().enumerate() {
            if pj.delay < 1 || pj.del_len != pj.delay + 1 {
                return bad(format!("path {} has invalid delay {}", pi, pj.delay));
            }
            if pj.gbuf_st != gbuf_st {
                return bad(format!("path {} buffer offset mismatch", pi));
            }
            gbuf_st += pj.del_len * pj.recv_n;
            if pj.gsyn_k >= self.max_recv_paths {
                return bad(format!("path {} GSyn slot out of range", pi));
            }
            let syn_range = pj.syn_st as usize..(pj.syn_st + pj.n_syn) as usize;
            if syn_range.end > self.syns.len() {
                return bad(format!("path {} synapse range out of bounds", pi));
            }
            let send_cons = self
                .send_con
                .get(pj.send_con_st as usize..(pj.send_con_st + pj.send_n) as usize);
            let Some(send_cons) = send_cons else {
                return bad(format!("path {} send table out of bounds", pi));
            };
            let mut expect = pj.syn_st;
            for (si, sc) in send_cons.iter().enumerate() {
                if sc.start != expect {
                    return bad(format!("path {} sender {} synapses not contiguous", pi, si));
                }
                for syni in sc.range() {
                    let syn = &self.syns[syni];
                    if syn.path as usize != pi || syn.send != pj.send_neur_st + si as u32 {
                        return bad(format!("synapse {} not grouped by sender", syni));
                    }
                    if syn.recv < pj.recv_neur_st || syn.recv >= pj.recv_neur_st + pj.recv_n {
                        return bad(format!("synapse {} receiver outside path", syni));
                    }
                }
                expect += sc.n;
            }
            if expect != pj.syn_st + pj.n_syn {
                return bad(format!("path {} send counts do not cover its synapses", pi));
            }

            let recv_cons = self
                .recv_con
                .get(pj.recv_con_st as usize..(pj.recv_con_st + pj.recv_n) as usize);
            let Some(recv_cons) = recv_cons else {
                return bad(format!("path {} recv table out of bounds", pi));
            };
            let mut seen = AHashSet::with_capacity(pj.n_syn as usize);
            for (ri, rc) in recv_cons.iter().enumerate() {
                let Some(list) = self.recv_syn_idx.get(rc.range()) else {
                    return bad(format!("path {} recv list out of bounds", pi));
                };
                for &syni in list {
                    if !syn_range.contains(&(syni as usize))
                        || self.syns[syni as usize].recv != pj.recv_neur_st + ri as u32
                        || !seen.insert(syni)
                    {
                        return bad(format!("path {} recv view is not a permutation", pi));
                    }
                }
            }
            if seen.len() != pj.n_syn as usize {
                return bad(format!("path {} recv view misses synapses", pi));
            }
        }
        if gbuf_st != self.gbuf_len {
            return bad("conductance buffer length mismatch".into());
        }
        Ok(())
    }

    /// Synapses of sending neuron `lay_si` on path `pi`
    #[inline]
    pub fn send_syns(&self, pi: usize, lay_si: usize) -> Range<usize> {
        let pj = &self.paths[pi];
        self.send_con[pj.send_con_st as usize + lay_si].range()
    }

    /// Synapse indices received by neuron `lay_ri` on path `pi`
    #[inline]
    pub fn recv_syns(&self, pi: usize, lay_ri: usize) -> &[u32] {
        let pj = &self.paths[pi];
        let rc = self.recv_con[pj.recv_con_st as usize + lay_ri];
        &self.recv_syn_idx[rc.range()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layers() -> Topology {
        let mut t = Topology::new();
        t.add_layer(3, &[]).unwrap();
        t.add_layer(4, &[2, 2]).unwrap();
        t
    }

    #[test]
    fn test_sub_pools_assigned() {
        let t = two_layers();
        assert_eq!(t.pools.len(), 1 + 3);
        assert_eq!(t.neurons[3].sub_pool, 2);
        assert_eq!(t.neurons[6].sub_pool, 3);
        assert_eq!(t.neurons[0].sub_pool, 0);
    }

    #[test]
    fn test_pool_sizes_must_sum() {
        let mut t = Topology::new();
        assert!(t.add_layer(4, &[1, 2]).is_err());
    }

    #[test]
    fn test_views_are_consistent() {
        let mut t = two_layers();
        let conns: Vec<(u32, u32)> = (0..3).flat_map(|s| (0..4).map(move |r| (s, r))).collect();
        t.add_path(0, 1, 0, &conns).unwrap();
        t.finalize().unwrap();

        let pj = t.paths[0];
        assert_eq!(pj.delay, 1);
        assert_eq!(pj.del_len, 2);
        assert_eq!(t.gbuf_len, 2 * 4);
        assert_eq!(t.send_syns(0, 1), 4..8);
        let recv = t.recv_syns(0, 2);
        assert_eq!(recv.len(), 3);
        for &syni in recv {
            assert_eq!(t.syns[syni as usize].recv, 3 + 2);
        }
    }

    #[test]
    fn test_gsyn_slots_per_recv_layer() {
        let mut t = two_layers();
        t.add_path(0, 1, 2, &[(0, 0)]).unwrap();
        t.add_path(1, 1, 1, &[(1, 0)]).unwrap();
        t.add_path(1, 0, 1, &[(0, 0)]).unwrap();
        t.finalize().unwrap();
        assert_eq!(t.max_recv_paths, 2);
        assert_eq!(t.paths[0].gsyn_k, 0);
        assert_eq!(t.paths[1].gsyn_k, 1);
        assert_eq!(t.paths[2].gsyn_k, 0);
        assert_eq!(t.paths[1].gbuf_st, 3 * 4);
    }

    #[test]
    fn test_out_of_range_connection_rejected() {
        let mut t = two_layers();
        assert!(t.add_path(0, 1, 1, &[(5, 0)]).is_err());
    }

    #[test]
    fn test_corrupted_table_fails_validation() {
        let mut t = two_layers();
        t.add_path(0, 1, 1, &[(0, 0), (1, 1)]).unwrap();
        t.finalize().unwrap();
        let mut broken = t.clone();
        broken.recv_syn_idx[0] = broken.recv_syn_idx[1];
        assert!(matches!(
            broken.validate(),
            Err(RuntimeError::InvalidIndexTable(_))
        ));
    }

    #[test]
    fn test_no_changes_after_finalize() {
        let mut t = two_layers();
        t.finalize().unwrap();
        assert!(t.add_layer(2, &[]).is_err());
    }
}
