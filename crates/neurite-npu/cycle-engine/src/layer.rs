// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Layer parameters, kinds and per-replica layer values

use neurite_npu_neural::{ActParams, F32Range, InhibParams, LearnNeurParams};
use serde::{Deserialize, Serialize};

/// Closed set of layer behaviours, resolved once at build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Hidden layer
    #[default]
    Super,
    /// Clamped by external input
    Input,
    /// Clamped to its target in the plus phase
    Target,
    /// Receives comparison values that never drive activity
    Compare,
    /// Corticothalamic context layer integrating `CtxtGe`
    Ct,
    /// Writes the reward prediction signal from its first two neurons
    RewardPred,
}

impl LayerKind {
    #[inline]
    pub fn is_input(self) -> bool {
        matches!(self, LayerKind::Input)
    }

    #[inline]
    pub fn is_target(self) -> bool {
        matches!(self, LayerKind::Target)
    }

    /// Layers whose dendrites get no SST inhibition and whose DTrgAvg is
    /// not error-driven
    #[inline]
    pub fn is_clamped_kind(self) -> bool {
        matches!(self, LayerKind::Input | LayerKind::Target)
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LayerKind::Super => "Super",
            LayerKind::Input => "Input",
            LayerKind::Target => "Target",
            LayerKind::Compare => "Compare",
            LayerKind::Ct => "Ct",
            LayerKind::RewardPred => "RewardPred",
        };
        write!(f, "{}", s)
    }
}

/// Context conductance integration for `Ct` layers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CtParams {
    /// Gain on `CtxtGe` added into excitatory input each cycle
    pub ge_gain: f32,
    /// Decay of `CtxtGe` within the trial; 0 replaces it at the trial end
    pub decay_tau: f32,
    #[serde(skip)]
    pub decay_dt: f32,
}

impl Default for CtParams {
    fn default() -> Self {
        let mut p = Self {
            ge_gain: 1.0,
            decay_tau: 50.0,
            decay_dt: 0.0,
        };
        p.update();
        p
    }
}

impl CtParams {
    pub fn update(&mut self) {
        self.decay_tau = self.decay_tau.max(0.0);
        self.decay_dt = if self.decay_tau > 0.0 {
            1.0 / self.decay_tau
        } else {
            0.0
        };
    }
}

/// Reward prediction read out of `RewardPred` layers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RwPredParams {
    /// Activity is the clipped excitatory conductance
    pub pred_range: F32Range,
}

impl Default for RwPredParams {
    fn default() -> Self {
        Self {
            pred_range: F32Range::new(0.01, 0.99),
        }
    }
}

/// All parameters of one layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerParams {
    pub acts: ActParams,
    pub inhib: InhibParams,
    pub learn: LearnNeurParams,
    pub ct: CtParams,
    pub rw_pred: RwPredParams,
}

impl LayerParams {
    pub fn update(&mut self) {
        self.acts.update();
        self.inhib.update();
        self.learn.update();
        self.ct.update();
    }

    /// Parameter defaults that depend on the layer kind
    pub fn for_kind(kind: LayerKind) -> Self {
        let mut p = Self::default();
        match kind {
            // clamped pools take their mean GeExt as FS drive
            LayerKind::Input => {
                p.acts.clamp.is_input = true;
                p.acts.clamp.ge = 1.5;
                p.acts.decay.act = 1.0;
                p.acts.decay.glong = 1.0;
                p.inhib.layer.gi = 0.9;
            }
            LayerKind::Target => {
                p.acts.clamp.is_target = true;
                p.acts.clamp.ge = 0.8;
                p.acts.decay.act = 1.0;
                p.acts.decay.glong = 1.0;
                p.inhib.layer.gi = 0.65;
            }
            LayerKind::Ct => {
                p.acts.decay.act = 0.0;
                p.acts.decay.glong = 0.0;
            }
            LayerKind::RewardPred => {
                p.acts.decay.act = 1.0;
                p.acts.decay.glong = 1.0;
                p.acts.dt.ge_tau = 40.0;
            }
            _ => {}
        }
        p.update();
        p
    }
}

/// Long-running layer activity, integrated from the mean over all data
/// replicas, and the inhibition gain adapted from it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerActAvg {
    /// Multiplier on pool Gi adapted against target activity
    pub gi_mult: f32,
    /// Running average of minus-phase activity
    pub act_m_avg: f32,
    /// Running average of plus-phase activity
    pub act_p_avg: f32,
}

impl LayerActAvg {
    pub fn new(nominal: f32) -> Self {
        Self {
            gi_mult: 1.0,
            act_m_avg: nominal,
            act_p_avg: nominal,
        }
    }
}

/// Per-replica values that change at trial boundaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerValues {
    /// Centered correlation of plus and minus phase activity
    pub cor_sim: f32,
}

/// A named layer with its parameters, shared running averages and
/// per-replica values
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub index: u32,
    pub params: LayerParams,
    pub act_avg: LayerActAvg,
    pub vals: Vec<LayerValues>,
}

impl Layer {
    pub fn new(name: &str, kind: LayerKind, index: u32, params: LayerParams, ndata: usize) -> Self {
        let nominal = params.inhib.act_avg.nominal;
        Self {
            name: name.to_string(),
            kind,
            index,
            params,
            act_avg: LayerActAvg::new(nominal),
            vals: vec![LayerValues::default(); ndata],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_defaults() {
        let p = LayerParams::for_kind(LayerKind::Input);
        assert!(p.acts.clamp.is_input);
        assert_eq!(p.acts.decay.act, 1.0);
        let t = LayerParams::for_kind(LayerKind::Target);
        assert!(t.acts.clamp.is_target);
        assert!(LayerKind::Target.is_clamped_kind());
        assert!(!LayerKind::Ct.is_clamped_kind());
    }

    #[test]
    fn test_clamped_kinds_clear_threshold() {
        // steady Vm of a clamped neuron with Ext = 1 under its own pool's FS
        // inhibition must sit above the exponential spike onset
        for kind in [LayerKind::Input, LayerKind::Target] {
            let p = LayerParams::for_kind(kind);
            let a = &p.acts;
            let ge = a.clamp.ge;
            let gi = p.inhib.layer.gi * ge;
            let gl = a.gbar.l;
            let vm = (ge * a.erev.e + gl * a.erev.l + gi * a.erev.i) / (ge + gl + gi);
            assert!(vm > a.spikes.thr, "{} settles at {}", kind, vm);
        }
        let input = LayerParams::for_kind(LayerKind::Input);
        assert_eq!(input.acts.clamp.ge, 1.5);
        assert!(input.inhib.layer.gi < 1.0);
    }

    #[test]
    fn test_ct_decay_zero_tau() {
        let mut ct = CtParams {
            decay_tau: 0.0,
            ..Default::default()
        };
        ct.update();
        assert_eq!(ct.decay_dt, 0.0);
        assert_eq!(CtParams::default().decay_dt, 1.0 / 50.0);
    }

    #[test]
    fn test_layer_values_start_at_nominal() {
        let l = Layer::new("hid", LayerKind::Super, 0, LayerParams::default(), 3);
        assert_eq!(l.vals.len(), 3);
        assert_eq!(l.act_avg.act_m_avg, 0.1);
        assert_eq!(l.act_avg.act_p_avg, 0.1);
        assert_eq!(l.act_avg.gi_mult, 1.0);
    }

    #[test]
    fn test_kind_serde_lowercase() {
        let k: LayerKind = serde_json::from_str("\"rewardpred\"").unwrap();
        assert_eq!(k, LayerKind::RewardPred);
    }
}
