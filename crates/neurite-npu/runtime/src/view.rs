// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Views that present one entity's block of the store to the update
//! equations through [`VarAccess`].
//!
//! A block is the contiguous `[var][di]` region of one neuron, pool or
//! synapse. The view fixes the data replica `di`.

use core::marker::PhantomData;
use neurite_npu_neural::{NeuronVar, PoolVar, SynCaVar, VarAccess};

/// Mutable view of one entity for one data replica
pub struct BlockMut<'a, V> {
    block: &'a mut [f32],
    ndata: usize,
    di: usize,
    _var: PhantomData<V>,
}

impl<'a, V> BlockMut<'a, V> {
    #[inline(always)]
    pub fn new(block: &'a mut [f32], ndata: usize, di: usize) -> Self {
        debug_assert!(di < ndata);
        Self {
            block,
            ndata,
            di,
            _var: PhantomData,
        }
    }

    #[inline(always)]
    pub fn di(&self) -> usize {
        self.di
    }
}

/// Read-only view of one entity for one data replica
#[derive(Clone, Copy)]
pub struct BlockRef<'a, V> {
    block: &'a [f32],
    ndata: usize,
    di: usize,
    _var: PhantomData<V>,
}

impl<'a, V> BlockRef<'a, V> {
    #[inline(always)]
    pub fn new(block: &'a [f32], ndata: usize, di: usize) -> Self {
        debug_assert!(di < ndata);
        Self {
            block,
            ndata,
            di,
            _var: PhantomData,
        }
    }
}

macro_rules! impl_block_access {
    ($($var:ty),+) => {$(
        impl VarAccess<$var> for BlockMut<'_, $var> {
            #[inline(always)]
            fn get(&self, var: $var) -> f32 {
                self.block[var.index() * self.ndata + self.di]
            }

            #[inline(always)]
            fn set(&mut self, var: $var, val: f32) {
                self.block[var.index() * self.ndata + self.di] = val;
            }
        }

        impl BlockRef<'_, $var> {
            #[inline(always)]
            pub fn get(&self, var: $var) -> f32 {
                self.block[var.index() * self.ndata + self.di]
            }
        }
    )+};
}

impl_block_access!(NeuronVar, PoolVar, SynCaVar);

pub type NeuronView<'a> = BlockMut<'a, NeuronVar>;
pub type NeuronRef<'a> = BlockRef<'a, NeuronVar>;
pub type PoolView<'a> = BlockMut<'a, PoolVar>;
pub type PoolRef<'a> = BlockRef<'a, PoolVar>;
pub type SynCaView<'a> = BlockMut<'a, SynCaVar>;
