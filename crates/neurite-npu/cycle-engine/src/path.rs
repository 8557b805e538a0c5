// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Projection (path) parameters

use neurite_npu_neural::{LearnSynParams, SWtParams, SynFailParams};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    #[default]
    Excitatory,
    Inhibitory,
    /// Sends sender CaSpkP once per trial into the receiver's `CtxtGeRaw`
    Context,
}

/// Absolute and relative conductance scaling
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleParams {
    pub abs: f32,
    /// Relative to other paths of the same type into the same layer
    pub rel: f32,
}

impl Default for ScaleParams {
    fn default() -> Self {
        Self { abs: 1.0, rel: 1.0 }
    }
}

impl ScaleParams {
    /// Expected-activity correction for the sending layer.
    ///
    /// `savg` is the sending layer's nominal activity, `snu` its size and
    /// `ncon` the average number of connections per receiver.
    pub fn slay_act_scale(savg: f32, snu: f32, ncon: f32) -> f32 {
        let ncon = ncon.max(1.0);
        let slay_act_n = (savg * snu).round().max(1.0);
        if ncon == snu {
            return 1.0 / slay_act_n;
        }
        let max_act_n = ncon.min(slay_act_n);
        let avg_act_n = (savg * ncon).round().max(1.0);
        let exp_act_n = (avg_act_n + 2.0).min(max_act_n);
        1.0 / exp_act_n
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathParams {
    pub path_type: PathType,
    /// Transmission delay in cycles; raised to 1 at build
    pub delay: u32,
    pub scale: ScaleParams,
    pub learn: LearnSynParams,
    pub swt: SWtParams,
    pub syn_fail: SynFailParams,
}

impl PathParams {
    pub fn update(&mut self) {
        self.delay = self.delay.max(1);
        self.learn.update();
        self.swt.update();
        self.syn_fail.update();
    }

    pub fn excitatory() -> Self {
        let mut p = Self::default();
        p.update();
        p
    }

    pub fn inhibitory() -> Self {
        let mut p = Self {
            path_type: PathType::Inhibitory,
            ..Self::default()
        };
        p.learn.learn = false;
        p.update();
        p
    }

    pub fn context() -> Self {
        let mut p = Self {
            path_type: PathType::Context,
            ..Self::default()
        };
        p.update();
        p
    }
}

/// A built path: its parameters plus the normalized conductance scale
#[derive(Debug, Clone)]
pub struct Path {
    pub name: String,
    pub send_layer: u32,
    pub recv_layer: u32,
    pub params: PathParams,
    /// Abs * Rel * expected-activity scale, normalized over the receiving
    /// layer's paths of the same type
    pub gscale: f32,
}

impl Path {
    #[inline]
    pub fn is_context(&self) -> bool {
        self.params.path_type == PathType::Context
    }

    #[inline]
    pub fn learns(&self) -> bool {
        self.params.learn.learn
    }
}
