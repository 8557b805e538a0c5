// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Stride tables for the structure-of-arrays layout.
//!
//! ```text
//! neuron      [ni][var][di]   ni * NVars*NData + var*NData + di
//! neuron avg  [ni][var]       ni * NAvgVars + var
//! flags       [ni][di]        ni * NData + di
//! synapse     [syni][var]     syni * NSynVars + var
//! syn ca      [syni][var][di] syni * NSynCaVars*NData + var*NData + di
//! pool        [pi][var][di]   pi * NPoolVars*NData + var*NData + di
//! gsyn        [ni][k][di]     ni * MaxRecvPaths*NData + k*NData + di
//! gbuf        [path][slot][recv][di]
//!             (gbuf_st + slot*RecvN + ri) * NData + di
//! ```
//!
//! Every entity's variables are one contiguous block, so phases that own
//! an entity can split the arrays with `chunks_mut`. The GPU kernels use the
//! same formulas; bump [`LAYOUT_VERSION`] whenever one changes.

use neurite_npu_neural::{NeuronAvgVar, NeuronVar, PoolVar, SynCaVar, SynapseVar};
use serde::{Deserialize, Serialize};

/// Version of the memory layout contract shared with GPU kernels and
/// weight files
pub const LAYOUT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strides {
    pub layout_version: u32,
    pub ndata: u32,
    pub n_neurons: u32,
    pub n_pools: u32,
    pub n_synapses: u32,
    pub max_recv_paths: u32,
    /// Conductance buffer length per data replica
    pub gbuf_len: u32,
}

impl Strides {
    pub const N_NEURON_VARS: usize = NeuronVar::COUNT;
    pub const N_AVG_VARS: usize = NeuronAvgVar::COUNT;
    pub const N_SYN_VARS: usize = SynapseVar::COUNT;
    pub const N_SYN_CA_VARS: usize = SynCaVar::COUNT;
    pub const N_POOL_VARS: usize = PoolVar::COUNT;

    /// Floats per neuron block (all variables, all replicas)
    #[inline(always)]
    pub fn neuron_block(&self) -> usize {
        Self::N_NEURON_VARS * self.ndata as usize
    }

    #[inline(always)]
    pub fn pool_block(&self) -> usize {
        Self::N_POOL_VARS * self.ndata as usize
    }

    #[inline(always)]
    pub fn syn_ca_block(&self) -> usize {
        Self::N_SYN_CA_VARS * self.ndata as usize
    }

    #[inline(always)]
    pub fn gsyn_block(&self) -> usize {
        self.max_recv_paths as usize * self.ndata as usize
    }

    #[inline(always)]
    pub fn neuron(&self, ni: usize, var: NeuronVar, di: usize) -> usize {
        ni * self.neuron_block() + var.index() * self.ndata as usize + di
    }

    #[inline(always)]
    pub fn neuron_avg(&self, ni: usize, var: NeuronAvgVar) -> usize {
        ni * Self::N_AVG_VARS + var.index()
    }

    #[inline(always)]
    pub fn flags(&self, ni: usize, di: usize) -> usize {
        ni * self.ndata as usize + di
    }

    #[inline(always)]
    pub fn synapse(&self, syni: usize, var: SynapseVar) -> usize {
        syni * Self::N_SYN_VARS + var.index()
    }

    #[inline(always)]
    pub fn syn_ca(&self, syni: usize, var: SynCaVar, di: usize) -> usize {
        syni * self.syn_ca_block() + var.index() * self.ndata as usize + di
    }

    #[inline(always)]
    pub fn pool(&self, pi: usize, var: PoolVar, di: usize) -> usize {
        pi * self.pool_block() + var.index() * self.ndata as usize + di
    }

    #[inline(always)]
    pub fn gsyn(&self, ni: usize, k: usize, di: usize) -> usize {
        ni * self.gsyn_block() + k * self.ndata as usize + di
    }

    /// Conductance buffer index for a path region starting at `gbuf_st`
    #[inline(always)]
    pub fn gbuf(&self, gbuf_st: usize, recv_n: usize, slot: usize, ri: usize, di: usize) -> usize {
        (gbuf_st + slot * recv_n + ri) * self.ndata as usize + di
    }

    pub fn neurons_len(&self) -> usize {
        self.n_neurons as usize * self.neuron_block()
    }

    pub fn neuron_avgs_len(&self) -> usize {
        self.n_neurons as usize * Self::N_AVG_VARS
    }

    pub fn flags_len(&self) -> usize {
        self.n_neurons as usize * self.ndata as usize
    }

    pub fn synapses_len(&self) -> usize {
        self.n_synapses as usize * Self::N_SYN_VARS
    }

    pub fn syn_cas_len(&self) -> usize {
        self.n_synapses as usize * self.syn_ca_block()
    }

    pub fn pools_len(&self) -> usize {
        self.n_pools as usize * self.pool_block()
    }

    pub fn gsyn_len(&self) -> usize {
        self.n_neurons as usize * self.gsyn_block()
    }

    pub fn gbuf_total(&self) -> usize {
        self.gbuf_len as usize * self.ndata as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strides() -> Strides {
        Strides {
            layout_version: LAYOUT_VERSION,
            ndata: 3,
            n_neurons: 5,
            n_pools: 2,
            n_synapses: 7,
            max_recv_paths: 2,
            gbuf_len: 10,
        }
    }

    #[test]
    fn test_neuron_offsets_do_not_overlap() {
        let s = strides();
        let last = s.neuron(4, *NeuronVar::ALL.last().unwrap(), 2);
        assert_eq!(last + 1, s.neurons_len());
        assert_eq!(s.neuron(1, NeuronVar::Spike, 0), s.neuron_block());
        assert_eq!(s.neuron(0, NeuronVar::Spiked, 0), 3);
    }

    #[test]
    fn test_gbuf_index() {
        let s = strides();
        assert_eq!(s.gbuf(4, 3, 1, 2, 0), (4 + 3 + 2) * 3);
        assert_eq!(s.gbuf_total(), 30);
    }

    #[test]
    fn test_syn_ca_and_pool_extents() {
        let s = strides();
        assert_eq!(s.syn_ca(6, SynCaVar::DiDWt, 2) + 1, s.syn_cas_len());
        assert_eq!(s.pool(1, *PoolVar::ALL.last().unwrap(), 2) + 1, s.pools_len());
    }
}
