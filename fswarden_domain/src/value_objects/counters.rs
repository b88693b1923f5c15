// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy-Run Counters
//!
//! Quantities a policy run tracks against its targets: entry count, volume,
//! block count, and the "targeted" amount (blocks on a specific storage
//! target, when the run is per-OST). A pass stops as soon as *any* field of
//! the achieved counter reaches the corresponding field of the target.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Counts accumulated by a policy run (or declared as its target).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Number of entries.
    pub count: u64,
    /// Bytes (entry sizes).
    pub vol: u64,
    /// 512-byte blocks.
    pub blocks: u64,
    /// Blocks on the targeted storage unit, for targeted runs.
    pub targeted: u64,
}

impl Counters {
    pub const ZERO: Counters = Counters {
        count: 0,
        vol: 0,
        blocks: 0,
        targeted: 0,
    };

    pub fn is_zero(&self) -> bool {
        *self == Counters::ZERO
    }

    /// True when any non-zero field of `target` has been reached.
    ///
    /// A zero target field means "unbounded" for that dimension.
    pub fn reached(&self, target: &Counters) -> bool {
        (target.count != 0 && self.count >= target.count)
            || (target.vol != 0 && self.vol >= target.vol)
            || (target.blocks != 0 && self.blocks >= target.blocks)
            || (target.targeted != 0 && self.targeted >= target.targeted)
    }
}

impl Add for Counters {
    type Output = Counters;

    fn add(self, rhs: Counters) -> Counters {
        Counters {
            count: self.count + rhs.count,
            vol: self.vol + rhs.vol,
            blocks: self.blocks + rhs.blocks,
            targeted: self.targeted + rhs.targeted,
        }
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, rhs: Counters) {
        *self = *self + rhs;
    }
}

/// Summary of one policy run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Entries successfully acted upon.
    pub ok: u64,
    /// Entries examined but not acted upon (out of scope, whitelisted,
    /// changed since selection, ...).
    pub nok: u64,
    /// Entries skipped by a scheduler or by run termination.
    pub skipped: u64,
    /// Action or lookup errors.
    pub errors: u64,
    /// Amounts achieved by successful actions.
    pub action_ctr: Counters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reached_any_dimension() {
        let target = Counters {
            count: 0,
            vol: 1 << 30,
            blocks: 0,
            targeted: 0,
        };
        let mut acc = Counters::ZERO;
        assert!(!acc.reached(&target));

        acc += Counters {
            count: 3,
            vol: 1_200 << 20,
            blocks: 42,
            targeted: 0,
        };
        assert!(acc.reached(&target));
    }

    #[test]
    fn test_zero_target_never_reached() {
        let acc = Counters {
            count: 1_000_000,
            vol: u64::MAX / 2,
            blocks: 99,
            targeted: 7,
        };
        assert!(!acc.reached(&Counters::ZERO));
    }
}
