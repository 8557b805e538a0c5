// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for runtime operations

use thiserror::Error;

/// Runtime errors
///
/// Raised while allocating the state store or validating index tables.
/// Nothing on the per-cycle path returns these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Capacity exceeded
    #[error("Capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded {
        /// Requested capacity
        requested: usize,
        /// Available capacity
        available: usize,
    },

    /// Inconsistent build-time index table
    #[error("Invalid index table: {0}")]
    InvalidIndexTable(String),

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Stored layout does not match the running layout
    #[error("Layout mismatch: {what} expected {expected}, found {found}")]
    LayoutMismatch {
        /// Which dimension differs
        what: &'static str,
        /// Value of the running store
        expected: usize,
        /// Value that was supplied
        found: usize,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Result type for runtime operations
pub type Result<T> = core::result::Result<T, RuntimeError>;
