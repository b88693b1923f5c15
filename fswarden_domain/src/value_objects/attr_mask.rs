// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Mask Algebra
//!
//! This module provides the compact presence/need masks used throughout the
//! engine to describe *which* attributes a caller has or wants, without
//! carrying the attribute values themselves.
//!
//! ## Overview
//!
//! A mask is a triple of machine words covering three disjoint attribute
//! families:
//!
//! - **Standard attributes** (`std`, one bit per [`StdAttr`])
//! - **Statuses** (`status`, one bit per registered status-manager instance)
//! - **Per-instance info** (`sm_info`, one bit per declared info slot,
//!   allocated as a running offset across instances)
//!
//! Masks support union, intersection, difference and complement, plus
//! single-bit test/set/clear. The "generic → actual" relocation of
//! status-manager masks (a module authors its needs as if it were the only
//! registered instance) lives in the status-manager registry, which knows
//! the slot assignments; this module only provides the raw bit algebra and
//! the generic-slot conventions.
//!
//! ## Capacity
//!
//! Capacity limits are hard: at most [`MAX_STATUS_SLOTS`] status bits and
//! [`MAX_INFO_SLOTS`] info bits. Registration of a status manager fails
//! (it does not panic) when a slot would overflow either word.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not, Sub};

/// Width of the status word: one bit per status-manager instance.
pub const MAX_STATUS_SLOTS: usize = 32;

/// Width of the info word: one bit per declared info attribute, across all
/// status-manager instances.
pub const MAX_INFO_SLOTS: usize = 64;

/// Standard entry attributes, one bit each in the `std` mask word.
///
/// The discriminants are frozen: they index both the mask word and the
/// attribute-set storage, and the store's column binding relies on them
/// being stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum StdAttr {
    Name = 0,
    ParentId = 1,
    Fullpath = 2,
    Depth = 3,
    Dircount = 4,
    /// Reserved slot (average entry size of a directory, store-generated).
    Avgsize = 5,
    Owner = 6,
    Group = 7,
    Size = 8,
    Blocks = 9,
    LastAccess = 10,
    LastMod = 11,
    LastMdChange = 12,
    Kind = 13,
    Mode = 14,
    Nlink = 15,
    StripeInfo = 16,
    StripeItems = 17,
    Link = 18,
    Fileclass = 19,
    ClassUpdate = 20,
    CreationTime = 21,
    RmTime = 22,
    Invalid = 23,
    MdUpdate = 24,
    PathUpdate = 25,
}

/// Number of standard attributes.
pub const STD_ATTR_COUNT: usize = 26;

impl StdAttr {
    /// All standard attributes in index order.
    pub const ALL: [StdAttr; STD_ATTR_COUNT] = [
        StdAttr::Name,
        StdAttr::ParentId,
        StdAttr::Fullpath,
        StdAttr::Depth,
        StdAttr::Dircount,
        StdAttr::Avgsize,
        StdAttr::Owner,
        StdAttr::Group,
        StdAttr::Size,
        StdAttr::Blocks,
        StdAttr::LastAccess,
        StdAttr::LastMod,
        StdAttr::LastMdChange,
        StdAttr::Kind,
        StdAttr::Mode,
        StdAttr::Nlink,
        StdAttr::StripeInfo,
        StdAttr::StripeItems,
        StdAttr::Link,
        StdAttr::Fileclass,
        StdAttr::ClassUpdate,
        StdAttr::CreationTime,
        StdAttr::RmTime,
        StdAttr::Invalid,
        StdAttr::MdUpdate,
        StdAttr::PathUpdate,
    ];

    /// The bit this attribute occupies in the `std` mask word.
    pub const fn bit(self) -> u64 {
        1u64 << (self as u32)
    }

    /// The mask-word index of this attribute.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// User-visible attribute name, as used in rule conditions and
    /// placeholder substitution.
    pub fn as_str(self) -> &'static str {
        match self {
            StdAttr::Name => "name",
            StdAttr::ParentId => "parent_id",
            StdAttr::Fullpath => "fullpath",
            StdAttr::Depth => "depth",
            StdAttr::Dircount => "dircount",
            StdAttr::Avgsize => "avgsize",
            StdAttr::Owner => "owner",
            StdAttr::Group => "group",
            StdAttr::Size => "size",
            StdAttr::Blocks => "blocks",
            StdAttr::LastAccess => "last_access",
            StdAttr::LastMod => "last_mod",
            StdAttr::LastMdChange => "last_mdchange",
            StdAttr::Kind => "type",
            StdAttr::Mode => "mode",
            StdAttr::Nlink => "nlink",
            StdAttr::StripeInfo => "stripe_info",
            StdAttr::StripeItems => "stripe_items",
            StdAttr::Link => "link",
            StdAttr::Fileclass => "fileclass",
            StdAttr::ClassUpdate => "class_update",
            StdAttr::CreationTime => "creation_time",
            StdAttr::RmTime => "rm_time",
            StdAttr::Invalid => "invalid",
            StdAttr::MdUpdate => "md_update",
            StdAttr::PathUpdate => "path_update",
        }
    }

    /// Resolves a user-visible attribute name.
    pub fn from_name(name: &str) -> Option<StdAttr> {
        StdAttr::ALL.iter().copied().find(|a| a.as_str() == name)
    }

    /// Read-only attributes are generated by the store from other columns;
    /// they are never written back on updates.
    pub const fn is_read_only(self) -> bool {
        matches!(self, StdAttr::Depth | StdAttr::Dircount)
    }

    /// Time-like attributes, eligible as LRU sort criteria.
    pub const fn is_time(self) -> bool {
        matches!(
            self,
            StdAttr::LastAccess
                | StdAttr::LastMod
                | StdAttr::LastMdChange
                | StdAttr::CreationTime
                | StdAttr::RmTime
        )
    }
}

impl fmt::Display for StdAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence/need mask over the three attribute families.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrMask {
    /// Standard-attribute bits, indexed by [`StdAttr`].
    pub std: u64,
    /// One bit per status-manager instance (`smi_index`).
    pub status: u32,
    /// One bit per assigned info slot.
    pub sm_info: u64,
}

/// `bit_range(start, count)`: `count` consecutive bits starting at `start`.
pub const fn bit_range(start: usize, count: usize) -> u64 {
    if count == 0 {
        0
    } else if count >= 64 {
        !0u64 << start
    } else {
        ((1u64 << count) - 1) << start
    }
}

impl AttrMask {
    /// The empty mask.
    pub const EMPTY: AttrMask = AttrMask {
        std: 0,
        status: 0,
        sm_info: 0,
    };

    /// A mask with the given standard attributes set.
    pub fn of_std(attrs: &[StdAttr]) -> AttrMask {
        let mut m = AttrMask::EMPTY;
        for a in attrs {
            m.std |= a.bit();
        }
        m
    }

    /// The status bit for instance index `i` (`SMI_MASK(i)`).
    pub const fn status_bit(i: usize) -> u32 {
        1u32 << i
    }

    /// A mask holding only the status bit of instance `i`.
    pub const fn of_status(i: usize) -> AttrMask {
        AttrMask {
            std: 0,
            status: Self::status_bit(i),
            sm_info: 0,
        }
    }

    /// A mask holding only the info bit of global slot `i`.
    pub const fn of_info(i: usize) -> AttrMask {
        AttrMask {
            std: 0,
            status: 0,
            sm_info: 1u64 << i,
        }
    }

    /// The *generic* status bit, used by status managers to mean "my
    /// status" before slot assignment.
    pub const GENERIC_STATUS: AttrMask = AttrMask::of_status(0);

    /// A generic info mask: "my `i`-th declared info attribute", before
    /// slot assignment (generic info bits start at offset 0).
    pub const fn generic_info(i: usize) -> AttrMask {
        AttrMask::of_info(i)
    }

    pub fn is_empty(&self) -> bool {
        self.std == 0 && self.status == 0 && self.sm_info == 0
    }

    /// True when the two masks share at least one bit.
    pub fn intersects(&self, other: &AttrMask) -> bool {
        !(*self & *other).is_empty()
    }

    /// True when every bit of `other` is present in `self`.
    pub fn contains(&self, other: &AttrMask) -> bool {
        (*other - *self).is_empty()
    }

    pub fn test_std(&self, attr: StdAttr) -> bool {
        self.std & attr.bit() != 0
    }

    pub fn set_std(&mut self, attr: StdAttr) {
        self.std |= attr.bit();
    }

    pub fn clear_std(&mut self, attr: StdAttr) {
        self.std &= !attr.bit();
    }

    pub fn test_status(&self, i: usize) -> bool {
        self.status & Self::status_bit(i) != 0
    }

    pub fn set_status(&mut self, i: usize) {
        self.status |= Self::status_bit(i);
    }

    pub fn clear_status(&mut self, i: usize) {
        self.status &= !Self::status_bit(i);
    }

    pub fn test_info(&self, i: usize) -> bool {
        self.sm_info & (1u64 << i) != 0
    }

    pub fn set_info(&mut self, i: usize) {
        self.sm_info |= 1u64 << i;
    }

    pub fn clear_info(&mut self, i: usize) {
        self.sm_info &= !(1u64 << i);
    }

    /// Standard attributes present in this mask, in index order.
    pub fn std_attrs(&self) -> impl Iterator<Item = StdAttr> + '_ {
        StdAttr::ALL.iter().copied().filter(|a| self.test_std(*a))
    }

    /// Indices of status bits present in this mask.
    pub fn status_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_STATUS_SLOTS).filter(|i| self.test_status(*i))
    }

    /// Indices of info bits present in this mask.
    pub fn info_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_INFO_SLOTS).filter(|i| self.test_info(*i))
    }
}

impl BitOr for AttrMask {
    type Output = AttrMask;

    fn bitor(self, rhs: AttrMask) -> AttrMask {
        AttrMask {
            std: self.std | rhs.std,
            status: self.status | rhs.status,
            sm_info: self.sm_info | rhs.sm_info,
        }
    }
}

impl BitAnd for AttrMask {
    type Output = AttrMask;

    fn bitand(self, rhs: AttrMask) -> AttrMask {
        AttrMask {
            std: self.std & rhs.std,
            status: self.status & rhs.status,
            sm_info: self.sm_info & rhs.sm_info,
        }
    }
}

impl Sub for AttrMask {
    type Output = AttrMask;

    /// Set difference: bits of `self` not present in `rhs`.
    fn sub(self, rhs: AttrMask) -> AttrMask {
        AttrMask {
            std: self.std & !rhs.std,
            status: self.status & !rhs.status,
            sm_info: self.sm_info & !rhs.sm_info,
        }
    }
}

impl Not for AttrMask {
    type Output = AttrMask;

    fn not(self) -> AttrMask {
        AttrMask {
            std: !self.std,
            status: !self.status,
            sm_info: !self.sm_info,
        }
    }
}

impl std::ops::BitOrAssign for AttrMask {
    fn bitor_assign(&mut self, rhs: AttrMask) {
        *self = *self | rhs;
    }
}

impl std::ops::BitAndAssign for AttrMask {
    fn bitand_assign(&mut self, rhs: AttrMask) {
        *self = *self & rhs;
    }
}

impl fmt::Display for AttrMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "std={:#x},status={:#x},info={:#x}",
            self.std, self.status, self.sm_info
        )
    }
}
