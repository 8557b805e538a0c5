// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the cycle engine

use neurite_npu_runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Weight file error: {0}")]
    WeightFile(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
