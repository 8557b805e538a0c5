// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-neuron status flags stored as a native bit-set.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign, Not};
use serde::{Deserialize, Serialize};

/// Status bits attached to every (neuron, data replica) pair.
///
/// Stored in its own `u32` array next to the float variables, so no float-bit
/// reinterpretation is needed on either backend.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NeuronFlags(u32);

impl NeuronFlags {
    /// No flags set
    pub const EMPTY: NeuronFlags = NeuronFlags(0);
    /// Neuron is lesioned and skipped by every kernel
    pub const OFF: NeuronFlags = NeuronFlags(1);
    /// Neuron receives external input in `Ext`
    pub const HAS_EXT: NeuronFlags = NeuronFlags(1 << 1);
    /// Neuron has a target value in `Target` (clamped in the plus phase)
    pub const HAS_TARG: NeuronFlags = NeuronFlags(1 << 2);
    /// Target is only used for comparison, never clamped
    pub const HAS_CMPR: NeuronFlags = NeuronFlags(1 << 3);

    /// Flags that describe external input, cleared by `init_ext`
    pub const EXT_MASK: NeuronFlags = NeuronFlags((1 << 1) | (1 << 2) | (1 << 3));

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        NeuronFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: NeuronFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: NeuronFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn insert(&mut self, other: NeuronFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: NeuronFlags) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn set(&mut self, other: NeuronFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    #[inline]
    pub const fn is_off(self) -> bool {
        self.contains(Self::OFF)
    }
}

impl BitOr for NeuronFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        NeuronFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for NeuronFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for NeuronFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        NeuronFlags(self.0 & rhs.0)
    }
}

impl Not for NeuronFlags {
    type Output = Self;
    fn not(self) -> Self {
        NeuronFlags(!self.0)
    }
}

impl fmt::Debug for NeuronFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::OFF, "OFF"),
            (Self::HAS_EXT, "HAS_EXT"),
            (Self::HAS_TARG, "HAS_TARG"),
            (Self::HAS_CMPR, "HAS_CMPR"),
        ];
        let mut first = true;
        write!(f, "NeuronFlags(")?;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut flags = NeuronFlags::EMPTY;
        flags.insert(NeuronFlags::HAS_EXT);
        flags.insert(NeuronFlags::HAS_TARG);
        assert!(flags.contains(NeuronFlags::HAS_EXT | NeuronFlags::HAS_TARG));
        assert!(!flags.is_off());

        flags.remove(NeuronFlags::EXT_MASK);
        assert!(flags.is_empty());
    }

    #[test]
    fn test_debug_lists_set_bits() {
        let flags = NeuronFlags::OFF | NeuronFlags::HAS_CMPR;
        assert_eq!(format!("{:?}", flags), "NeuronFlags(OFF | HAS_CMPR)");
    }
}
