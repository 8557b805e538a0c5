// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # CPU Backend
//!
//! Runs every phase through the shared kernels on a [`WorkPartitioner`].

use super::ComputeBackend;
use crate::partition::WorkPartitioner;

/// CPU backend over sequential, rayon or atomic-chunk partitioning
pub struct CPUBackend {
    name: String,
    partitioner: WorkPartitioner,
}

impl CPUBackend {
    pub fn new(partitioner: WorkPartitioner) -> Self {
        Self {
            name: format!(
                "CPU ({}, {} threads)",
                partitioner.mode(),
                partitioner.threads()
            ),
            partitioner,
        }
    }
}

impl Default for CPUBackend {
    fn default() -> Self {
        Self::new(WorkPartitioner::sequential())
    }
}

impl ComputeBackend for CPUBackend {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn partitioner(&self) -> &WorkPartitioner {
        &self.partitioner
    }
}
