// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Work Partitioning
//!
//! Splits an index range into contiguous chunks and runs them:
//! - **Sequential**: in index order on the calling thread
//! - **Rayon**: on a dedicated, fixed-size rayon pool
//! - **AtomicChunks**: on scoped threads that claim chunks greedily through
//!   a shared `AtomicUsize`
//!
//! Every phase hands each index only the storage that index owns (one
//! entity block of a structure-of-arrays buffer), so the result never
//! depends on which thread ran which chunk.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Default number of entities per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMode {
    Sequential,
    #[default]
    Rayon,
    #[serde(alias = "atomic")]
    AtomicChunks,
}

impl std::fmt::Display for PartitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionMode::Sequential => write!(f, "sequential"),
            PartitionMode::Rayon => write!(f, "rayon"),
            PartitionMode::AtomicChunks => write!(f, "atomic"),
        }
    }
}

impl std::str::FromStr for PartitionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(PartitionMode::Sequential),
            "rayon" => Ok(PartitionMode::Rayon),
            "atomic" | "atomicchunks" | "atomic_chunks" => Ok(PartitionMode::AtomicChunks),
            _ => Err(Error::InvalidBackend(format!("unknown partition mode '{}'", s))),
        }
    }
}

/// Runs per-index work over contiguous chunks
#[derive(Clone)]
pub struct WorkPartitioner {
    mode: PartitionMode,
    threads: usize,
    chunk_size: usize,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for WorkPartitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkPartitioner")
            .field("mode", &self.mode)
            .field("threads", &self.threads)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl WorkPartitioner {
    /// `threads == 0` uses all available cores
    pub fn new(mode: PartitionMode, threads: usize, chunk_size: usize) -> Result<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };
        let chunk_size = chunk_size.max(1);
        let pool = match mode {
            PartitionMode::Rayon => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("neurite-worker-{}", i))
                    .build()
                    .map_err(|e| Error::ThreadPool(e.to_string()))?;
                Some(Arc::new(pool))
            }
            _ => None,
        };
        info!(
            "[PARTITION] {} mode, {} threads, chunk size {}",
            mode, threads, chunk_size
        );
        Ok(Self {
            mode,
            threads,
            chunk_size,
            pool,
        })
    }

    pub fn sequential() -> Self {
        Self {
            mode: PartitionMode::Sequential,
            threads: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pool: None,
        }
    }

    pub fn mode(&self) -> PartitionMode {
        self.mode
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Call `f(i, block_i)` for every `block`-sized block of `data`
    pub fn for_each_mut<T, F>(&self, data: &mut [T], block: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        if block == 0 || data.is_empty() {
            return;
        }
        match (self.mode, &self.pool) {
            (PartitionMode::Rayon, Some(pool)) => pool.install(|| {
                data.par_chunks_mut(block)
                    .with_min_len(self.chunk_size)
                    .enumerate()
                    .for_each(|(i, b)| f(i, b));
            }),
            (PartitionMode::AtomicChunks, _) if self.threads > 1 => {
                let work: Vec<Mutex<Option<&mut [T]>>> = data
                    .chunks_mut(block * self.chunk_size)
                    .map(|c| Mutex::new(Some(c)))
                    .collect();
                self.run_claimed(&work, |ci, chunk| {
                    let st = ci * self.chunk_size;
                    for (j, b) in chunk.chunks_mut(block).enumerate() {
                        f(st + j, b);
                    }
                });
            }
            _ => {
                for (i, b) in data.chunks_mut(block).enumerate() {
                    f(i, b);
                }
            }
        }
    }

    /// Like [`Self::for_each_mut`] over two arrays with one block each per
    /// index
    pub fn for_each_mut2<A, B, F>(&self, a: &mut [A], a_block: usize, b: &mut [B], b_block: usize, f: F)
    where
        A: Send,
        B: Send,
        F: Fn(usize, &mut [A], &mut [B]) + Sync,
    {
        if a_block == 0 || b_block == 0 || a.is_empty() || b.is_empty() {
            return;
        }
        match (self.mode, &self.pool) {
            (PartitionMode::Rayon, Some(pool)) => pool.install(|| {
                a.par_chunks_mut(a_block)
                    .zip(b.par_chunks_mut(b_block))
                    .with_min_len(self.chunk_size)
                    .enumerate()
                    .for_each(|(i, (x, y))| f(i, x, y));
            }),
            (PartitionMode::AtomicChunks, _) if self.threads > 1 => {
                let work: Vec<Mutex<Option<(&mut [A], &mut [B])>>> = a
                    .chunks_mut(a_block * self.chunk_size)
                    .zip(b.chunks_mut(b_block * self.chunk_size))
                    .map(|c| Mutex::new(Some(c)))
                    .collect();
                self.run_claimed(&work, |ci, (x, y)| {
                    let st = ci * self.chunk_size;
                    for (j, (xb, yb)) in x.chunks_mut(a_block).zip(y.chunks_mut(b_block)).enumerate() {
                        f(st + j, xb, yb);
                    }
                });
            }
            _ => {
                for (i, (x, y)) in a.chunks_mut(a_block).zip(b.chunks_mut(b_block)).enumerate() {
                    f(i, x, y);
                }
            }
        }
    }

    /// Call `f(i)` for every `i` in `0..n`; `f` may only write through
    /// atomics or interior storage it owns
    pub fn for_each_index<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Sync,
    {
        if n == 0 {
            return;
        }
        match (self.mode, &self.pool) {
            (PartitionMode::Rayon, Some(pool)) => pool.install(|| {
                (0..n)
                    .into_par_iter()
                    .with_min_len(self.chunk_size)
                    .for_each(|i| f(i));
            }),
            (PartitionMode::AtomicChunks, _) if self.threads > 1 => {
                let n_chunks = n.div_ceil(self.chunk_size);
                let next = AtomicUsize::new(0);
                std::thread::scope(|s| {
                    for _ in 0..self.threads.min(n_chunks) {
                        s.spawn(|| loop {
                            let ci = next.fetch_add(1, Ordering::Relaxed);
                            if ci >= n_chunks {
                                break;
                            }
                            let st = ci * self.chunk_size;
                            for i in st..(st + self.chunk_size).min(n) {
                                f(i);
                            }
                        });
                    }
                });
            }
            _ => (0..n).for_each(f),
        }
    }

    /// Scoped workers claim work items until none are left
    fn run_claimed<W, G>(&self, work: &[Mutex<Option<W>>], g: G)
    where
        W: Send,
        G: Fn(usize, W) + Sync,
    {
        let next = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..self.threads.min(work.len()) {
                s.spawn(|| loop {
                    let ci = next.fetch_add(1, Ordering::Relaxed);
                    let Some(slot) = work.get(ci) else {
                        break;
                    };
                    if let Some(item) = slot.lock().take() {
                        g(ci, item);
                    }
                });
            }
        });
    }
}

impl Default for WorkPartitioner {
    fn default() -> Self {
        Self::sequential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitioners() -> Vec<WorkPartitioner> {
        vec![
            WorkPartitioner::sequential(),
            WorkPartitioner::new(PartitionMode::Rayon, 3, 2).unwrap(),
            WorkPartitioner::new(PartitionMode::AtomicChunks, 4, 3).unwrap(),
        ]
    }

    #[test]
    fn test_for_each_mut_visits_every_block_once() {
        for p in partitioners() {
            let mut data = vec![0u32; 3 * 17];
            p.for_each_mut(&mut data, 3, |i, b| {
                for v in b.iter_mut() {
                    *v += i as u32 + 1;
                }
            });
            for (i, b) in data.chunks(3).enumerate() {
                assert!(b.iter().all(|&v| v == i as u32 + 1), "{:?}", p.mode());
            }
        }
    }

    #[test]
    fn test_for_each_mut2_pairs_blocks() {
        for p in partitioners() {
            let mut a = vec![0.0f32; 2 * 11];
            let mut b = vec![0u8; 11];
            p.for_each_mut2(&mut a, 2, &mut b, 1, |i, x, y| {
                x[1] = i as f32;
                y[0] = i as u8;
            });
            for i in 0..11 {
                assert_eq!(a[2 * i + 1], i as f32);
                assert_eq!(b[i], i as u8);
            }
        }
    }

    #[test]
    fn test_for_each_index_counts() {
        for p in partitioners() {
            let hits: Vec<AtomicUsize> = (0..29).map(|_| AtomicUsize::new(0)).collect();
            p.for_each_index(hits.len(), |i| {
                hits[i].fetch_add(1, Ordering::Relaxed);
            });
            assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
        }
    }

    #[test]
    fn test_empty_and_zero_block() {
        let p = WorkPartitioner::new(PartitionMode::AtomicChunks, 2, 1).unwrap();
        let mut empty: Vec<f32> = Vec::new();
        p.for_each_mut(&mut empty, 4, |_, _| panic!("no blocks"));
        let mut data = vec![1.0f32; 4];
        p.for_each_mut(&mut data, 0, |_, _| panic!("no blocks"));
        p.for_each_index(0, |_| panic!("no indices"));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("atomic".parse::<PartitionMode>().unwrap(), PartitionMode::AtomicChunks);
        assert_eq!("Rayon".parse::<PartitionMode>().unwrap(), PartitionMode::Rayon);
        assert!("gpu".parse::<PartitionMode>().is_err());
    }
}
