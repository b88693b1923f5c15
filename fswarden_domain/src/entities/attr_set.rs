// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Set
//!
//! The central value of the engine: a set of entry attributes together with
//! the presence mask saying which of them actually carry a value.
//!
//! ## Overview
//!
//! An [`AttrSet`] holds the three attribute families of the data model:
//!
//! - standard attributes (stat-derived fields, names, paths, structural
//!   timestamps), guarded bit-by-bit by the `std` mask word,
//! - one status slot per registered status-manager instance,
//! - one typed info slot per declared info attribute.
//!
//! Every accessor checks the mask: a getter returns `None` for an attribute
//! whose bit is clear even if a stale value is still in storage, and every
//! setter sets the corresponding bit. Each operation owns its attribute
//! sets, so no locking is needed around them.
//!
//! Statuses are stored as indices into the owning manager's status
//! enumeration (the interned form); rendering back to the user-visible
//! string goes through the status-manager registry.

use crate::entities::entry_id::EntryId;
use crate::value_objects::attr_mask::{AttrMask, StdAttr};
use crate::value_objects::info_value::InfoValue;
use serde::{Deserialize, Serialize};

/// Entry type, as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FsKind {
    #[default]
    File,
    Dir,
    Symlink,
    Chr,
    Blk,
    Fifo,
    Sock,
}

impl FsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FsKind::File => "file",
            FsKind::Dir => "dir",
            FsKind::Symlink => "symlink",
            FsKind::Chr => "chr",
            FsKind::Blk => "blk",
            FsKind::Fifo => "fifo",
            FsKind::Sock => "sock",
        }
    }
}

/// Striping summary of an entry (filesystems with striped layouts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StripeInfo {
    pub stripe_count: u32,
    pub stripe_size: u64,
    pub pool: String,
}

/// One storage target holding a stripe of the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeItem {
    pub ost_idx: u32,
}

/// An attribute set: values plus their presence mask.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttrSet {
    mask: AttrMask,

    name: String,
    parent_id: Option<EntryId>,
    fullpath: String,
    depth: u32,
    dircount: u32,
    avgsize: u64,
    owner: String,
    group: String,
    size: u64,
    blocks: u64,
    last_access: i64,
    last_mod: i64,
    last_mdchange: i64,
    kind: FsKind,
    mode: u32,
    nlink: u32,
    stripe_info: Option<StripeInfo>,
    stripe_items: Vec<StripeItem>,
    link: String,
    fileclass: String,
    class_update: i64,
    creation_time: i64,
    rm_time: i64,
    invalid: bool,
    md_update: i64,
    path_update: i64,

    /// Status value per instance index: index into the manager's enum.
    statuses: Vec<Option<u8>>,
    /// Info value per global slot.
    sm_info: Vec<Option<InfoValue>>,
}

macro_rules! std_accessors {
    ($attr:expr, $get:ident, $set:ident, $field:ident, $ty:ty) => {
        pub fn $get(&self) -> Option<$ty> {
            if self.mask.test_std($attr) {
                Some(self.$field)
            } else {
                None
            }
        }

        pub fn $set(&mut self, v: $ty) {
            self.$field = v;
            self.mask.set_std($attr);
        }
    };
}

macro_rules! std_str_accessors {
    ($attr:expr, $get:ident, $set:ident, $field:ident) => {
        pub fn $get(&self) -> Option<&str> {
            if self.mask.test_std($attr) {
                Some(self.$field.as_str())
            } else {
                None
            }
        }

        pub fn $set(&mut self, v: impl Into<String>) {
            self.$field = v.into();
            self.mask.set_std($attr);
        }
    };
}

impl AttrSet {
    pub fn new() -> AttrSet {
        AttrSet::default()
    }

    /// The presence mask.
    pub fn mask(&self) -> AttrMask {
        self.mask
    }

    std_str_accessors!(StdAttr::Name, name, set_name, name);
    std_str_accessors!(StdAttr::Fullpath, fullpath, set_fullpath, fullpath);
    std_str_accessors!(StdAttr::Owner, owner, set_owner, owner);
    std_str_accessors!(StdAttr::Group, group, set_group, group);
    std_str_accessors!(StdAttr::Link, link, set_link, link);
    std_str_accessors!(StdAttr::Fileclass, fileclass, set_fileclass, fileclass);

    std_accessors!(StdAttr::Depth, depth, set_depth, depth, u32);
    std_accessors!(StdAttr::Dircount, dircount, set_dircount, dircount, u32);
    std_accessors!(StdAttr::Avgsize, avgsize, set_avgsize, avgsize, u64);
    std_accessors!(StdAttr::Size, size, set_size, size, u64);
    std_accessors!(StdAttr::Blocks, blocks, set_blocks, blocks, u64);
    std_accessors!(StdAttr::LastAccess, last_access, set_last_access, last_access, i64);
    std_accessors!(StdAttr::LastMod, last_mod, set_last_mod, last_mod, i64);
    std_accessors!(StdAttr::LastMdChange, last_mdchange, set_last_mdchange, last_mdchange, i64);
    std_accessors!(StdAttr::Kind, kind, set_kind, kind, FsKind);
    std_accessors!(StdAttr::Mode, mode, set_mode, mode, u32);
    std_accessors!(StdAttr::Nlink, nlink, set_nlink, nlink, u32);
    std_accessors!(StdAttr::ClassUpdate, class_update, set_class_update, class_update, i64);
    std_accessors!(StdAttr::CreationTime, creation_time, set_creation_time, creation_time, i64);
    std_accessors!(StdAttr::RmTime, rm_time, set_rm_time, rm_time, i64);
    std_accessors!(StdAttr::Invalid, invalid, set_invalid, invalid, bool);
    std_accessors!(StdAttr::MdUpdate, md_update, set_md_update, md_update, i64);
    std_accessors!(StdAttr::PathUpdate, path_update, set_path_update, path_update, i64);

    pub fn parent_id(&self) -> Option<EntryId> {
        if self.mask.test_std(StdAttr::ParentId) {
            self.parent_id
        } else {
            None
        }
    }

    pub fn set_parent_id(&mut self, id: EntryId) {
        self.parent_id = Some(id);
        self.mask.set_std(StdAttr::ParentId);
    }

    pub fn stripe_info(&self) -> Option<&StripeInfo> {
        if self.mask.test_std(StdAttr::StripeInfo) {
            self.stripe_info.as_ref()
        } else {
            None
        }
    }

    pub fn set_stripe_info(&mut self, info: StripeInfo) {
        self.stripe_info = Some(info);
        self.mask.set_std(StdAttr::StripeInfo);
    }

    pub fn stripe_items(&self) -> Option<&[StripeItem]> {
        if self.mask.test_std(StdAttr::StripeItems) {
            Some(&self.stripe_items)
        } else {
            None
        }
    }

    pub fn set_stripe_items(&mut self, items: Vec<StripeItem>) {
        self.stripe_items = items;
        self.mask.set_std(StdAttr::StripeItems);
    }

    /// A time-like attribute by its [`StdAttr`] tag, for LRU ordering and
    /// the end-of-list heuristic.
    pub fn time_attr(&self, attr: StdAttr) -> Option<i64> {
        match attr {
            StdAttr::LastAccess => self.last_access(),
            StdAttr::LastMod => self.last_mod(),
            StdAttr::LastMdChange => self.last_mdchange(),
            StdAttr::CreationTime => self.creation_time(),
            StdAttr::RmTime => self.rm_time(),
            _ => None,
        }
    }

    /// Sets a time-like attribute by tag. Non-time tags are ignored.
    pub fn set_time_attr(&mut self, attr: StdAttr, value: i64) {
        match attr {
            StdAttr::LastAccess => self.set_last_access(value),
            StdAttr::LastMod => self.set_last_mod(value),
            StdAttr::LastMdChange => self.set_last_mdchange(value),
            StdAttr::CreationTime => self.set_creation_time(value),
            StdAttr::RmTime => self.set_rm_time(value),
            _ => {}
        }
    }

    // --- statuses ---

    /// Status slot of instance `idx`, as an index into the manager's enum.
    pub fn status_slot(&self, idx: usize) -> Option<u8> {
        if self.mask.test_status(idx) {
            self.statuses.get(idx).copied().flatten()
        } else {
            None
        }
    }

    pub fn set_status_slot(&mut self, idx: usize, value: u8) {
        if self.statuses.len() <= idx {
            self.statuses.resize(idx + 1, None);
        }
        self.statuses[idx] = Some(value);
        self.mask.set_status(idx);
    }

    pub fn clear_status_slot(&mut self, idx: usize) {
        if let Some(s) = self.statuses.get_mut(idx) {
            *s = None;
        }
        self.mask.clear_status(idx);
    }

    // --- per-instance info ---

    /// Info value at global slot `slot`.
    pub fn info_slot(&self, slot: usize) -> Option<&InfoValue> {
        if self.mask.test_info(slot) {
            self.sm_info.get(slot).and_then(|v| v.as_ref())
        } else {
            None
        }
    }

    pub fn set_info_slot(&mut self, slot: usize, value: InfoValue) {
        if self.sm_info.len() <= slot {
            self.sm_info.resize(slot + 1, None);
        }
        self.sm_info[slot] = Some(value);
        self.mask.set_info(slot);
    }

    pub fn clear_info_slot(&mut self, slot: usize) {
        if let Some(s) = self.sm_info.get_mut(slot) {
            *s = None;
        }
        self.mask.clear_info(slot);
    }

    // --- whole-set operations ---

    /// Clears the attributes in `drop`, leaving the rest untouched.
    pub fn drop_attrs(&mut self, drop: AttrMask) {
        for attr in StdAttr::ALL {
            if drop.test_std(attr) {
                self.mask.clear_std(attr);
            }
        }
        for i in drop.status_slots() {
            self.clear_status_slot(i);
        }
        for i in drop.info_slots() {
            self.clear_info_slot(i);
        }
    }

    /// Keeps only the attributes in `keep`.
    pub fn retain(&mut self, keep: AttrMask) {
        self.drop_attrs(self.mask - keep);
    }

    /// Copies every attribute present in `other` into `self`, overwriting.
    pub fn apply(&mut self, other: &AttrSet) {
        for attr in other.mask.std_attrs() {
            self.copy_std_from(other, attr);
        }
        for i in other.mask.status_slots() {
            if let Some(v) = other.status_slot(i) {
                self.set_status_slot(i, v);
            }
        }
        for i in other.mask.info_slots() {
            if let Some(v) = other.info_slot(i) {
                self.set_info_slot(i, v.clone());
            }
        }
    }

    /// Copies attributes present in `other` but missing here (gap fill;
    /// existing values win).
    pub fn merge_missing(&mut self, other: &AttrSet) {
        for attr in other.mask.std_attrs() {
            if !self.mask.test_std(attr) {
                self.copy_std_from(other, attr);
            }
        }
        for i in other.mask.status_slots() {
            if !self.mask.test_status(i) {
                if let Some(v) = other.status_slot(i) {
                    self.set_status_slot(i, v);
                }
            }
        }
        for i in other.mask.info_slots() {
            if !self.mask.test_info(i) {
                if let Some(v) = other.info_slot(i) {
                    self.set_info_slot(i, v.clone());
                }
            }
        }
    }

    fn copy_std_from(&mut self, other: &AttrSet, attr: StdAttr) {
        match attr {
            StdAttr::Name => self.name = other.name.clone(),
            StdAttr::ParentId => self.parent_id = other.parent_id,
            StdAttr::Fullpath => self.fullpath = other.fullpath.clone(),
            StdAttr::Depth => self.depth = other.depth,
            StdAttr::Dircount => self.dircount = other.dircount,
            StdAttr::Avgsize => self.avgsize = other.avgsize,
            StdAttr::Owner => self.owner = other.owner.clone(),
            StdAttr::Group => self.group = other.group.clone(),
            StdAttr::Size => self.size = other.size,
            StdAttr::Blocks => self.blocks = other.blocks,
            StdAttr::LastAccess => self.last_access = other.last_access,
            StdAttr::LastMod => self.last_mod = other.last_mod,
            StdAttr::LastMdChange => self.last_mdchange = other.last_mdchange,
            StdAttr::Kind => self.kind = other.kind,
            StdAttr::Mode => self.mode = other.mode,
            StdAttr::Nlink => self.nlink = other.nlink,
            StdAttr::StripeInfo => self.stripe_info = other.stripe_info.clone(),
            StdAttr::StripeItems => self.stripe_items = other.stripe_items.clone(),
            StdAttr::Link => self.link = other.link.clone(),
            StdAttr::Fileclass => self.fileclass = other.fileclass.clone(),
            StdAttr::ClassUpdate => self.class_update = other.class_update,
            StdAttr::CreationTime => self.creation_time = other.creation_time,
            StdAttr::RmTime => self.rm_time = other.rm_time,
            StdAttr::Invalid => self.invalid = other.invalid,
            StdAttr::MdUpdate => self.md_update = other.md_update,
            StdAttr::PathUpdate => self.path_update = other.path_update,
        }
        self.mask.set_std(attr);
    }

    fn std_eq(&self, other: &AttrSet, attr: StdAttr) -> bool {
        match attr {
            StdAttr::Name => self.name == other.name,
            StdAttr::ParentId => self.parent_id == other.parent_id,
            StdAttr::Fullpath => self.fullpath == other.fullpath,
            StdAttr::Depth => self.depth == other.depth,
            StdAttr::Dircount => self.dircount == other.dircount,
            StdAttr::Avgsize => self.avgsize == other.avgsize,
            StdAttr::Owner => self.owner == other.owner,
            StdAttr::Group => self.group == other.group,
            StdAttr::Size => self.size == other.size,
            StdAttr::Blocks => self.blocks == other.blocks,
            StdAttr::LastAccess => self.last_access == other.last_access,
            StdAttr::LastMod => self.last_mod == other.last_mod,
            StdAttr::LastMdChange => self.last_mdchange == other.last_mdchange,
            StdAttr::Kind => self.kind == other.kind,
            StdAttr::Mode => self.mode == other.mode,
            StdAttr::Nlink => self.nlink == other.nlink,
            StdAttr::StripeInfo => self.stripe_info == other.stripe_info,
            StdAttr::StripeItems => self.stripe_items == other.stripe_items,
            StdAttr::Link => self.link == other.link,
            StdAttr::Fileclass => self.fileclass == other.fileclass,
            StdAttr::ClassUpdate => self.class_update == other.class_update,
            StdAttr::CreationTime => self.creation_time == other.creation_time,
            StdAttr::RmTime => self.rm_time == other.rm_time,
            StdAttr::Invalid => self.invalid == other.invalid,
            StdAttr::MdUpdate => self.md_update == other.md_update,
            StdAttr::PathUpdate => self.path_update == other.path_update,
        }
    }

    /// Mask of attributes present in `self` that are missing from `db` or
    /// carry a different value there. This is the reference diff used by
    /// stores that do not compute their own.
    pub fn diff(&self, db: &AttrSet) -> AttrMask {
        let mut out = AttrMask::EMPTY;
        for attr in self.mask.std_attrs() {
            if !db.mask.test_std(attr) || !self.std_eq(db, attr) {
                out.set_std(attr);
            }
        }
        for i in self.mask.status_slots() {
            if db.status_slot(i) != self.status_slot(i) {
                out.set_status(i);
            }
        }
        for i in self.mask.info_slots() {
            if db.info_slot(i) != self.info_slot(i) {
                out.set_info(i);
            }
        }
        out
    }

    /// Renders an attribute as a string for placeholder substitution and
    /// report lines. Returns `None` when absent.
    pub fn std_attr_string(&self, attr: StdAttr) -> Option<String> {
        if !self.mask.test_std(attr) {
            return None;
        }
        Some(match attr {
            StdAttr::Name => self.name.clone(),
            StdAttr::ParentId => self.parent_id.map(|p| p.to_string()).unwrap_or_default(),
            StdAttr::Fullpath => self.fullpath.clone(),
            StdAttr::Depth => self.depth.to_string(),
            StdAttr::Dircount => self.dircount.to_string(),
            StdAttr::Avgsize => self.avgsize.to_string(),
            StdAttr::Owner => self.owner.clone(),
            StdAttr::Group => self.group.clone(),
            StdAttr::Size => self.size.to_string(),
            StdAttr::Blocks => self.blocks.to_string(),
            StdAttr::LastAccess => self.last_access.to_string(),
            StdAttr::LastMod => self.last_mod.to_string(),
            StdAttr::LastMdChange => self.last_mdchange.to_string(),
            StdAttr::Kind => self.kind.as_str().to_string(),
            StdAttr::Mode => format!("{:o}", self.mode),
            StdAttr::Nlink => self.nlink.to_string(),
            StdAttr::StripeInfo => self
                .stripe_info
                .as_ref()
                .map(|s| format!("cnt={},sz={},pool={}", s.stripe_count, s.stripe_size, s.pool))
                .unwrap_or_default(),
            StdAttr::StripeItems => self
                .stripe_items
                .iter()
                .map(|i| i.ost_idx.to_string())
                .collect::<Vec<_>>()
                .join(","),
            StdAttr::Link => self.link.clone(),
            StdAttr::Fileclass => self.fileclass.clone(),
            StdAttr::ClassUpdate => self.class_update.to_string(),
            StdAttr::CreationTime => self.creation_time.to_string(),
            StdAttr::RmTime => self.rm_time.to_string(),
            StdAttr::Invalid => self.invalid.to_string(),
            StdAttr::MdUpdate => self.md_update.to_string(),
            StdAttr::PathUpdate => self.path_update.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_guards_accessors() {
        let mut a = AttrSet::new();
        assert_eq!(a.size(), None);
        a.set_size(100);
        assert_eq!(a.size(), Some(100));
        a.drop_attrs(AttrMask::of_std(&[StdAttr::Size]));
        assert_eq!(a.size(), None);
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut a = AttrSet::new();
        a.set_size(1);

        let mut b = AttrSet::new();
        b.set_size(2);
        b.set_owner("root");

        a.merge_missing(&b);
        assert_eq!(a.size(), Some(1));
        assert_eq!(a.owner(), Some("root"));
    }

    #[test]
    fn test_apply_overwrites() {
        let mut a = AttrSet::new();
        a.set_size(1);

        let mut b = AttrSet::new();
        b.set_size(2);

        a.apply(&b);
        assert_eq!(a.size(), Some(2));
    }

    #[test]
    fn test_diff_detects_changes_and_missing() {
        let mut fresh = AttrSet::new();
        fresh.set_size(100);
        fresh.set_owner("alice");
        fresh.set_nlink(1);

        let mut db = AttrSet::new();
        db.set_size(100);
        db.set_owner("bob");

        let d = fresh.diff(&db);
        assert!(!d.test_std(StdAttr::Size)); // unchanged
        assert!(d.test_std(StdAttr::Owner)); // changed
        assert!(d.test_std(StdAttr::Nlink)); // missing from db
    }

    #[test]
    fn test_status_and_info_slots() {
        let mut a = AttrSet::new();
        assert_eq!(a.status_slot(2), None);
        a.set_status_slot(2, 1);
        assert_eq!(a.status_slot(2), Some(1));

        a.set_info_slot(5, InfoValue::Uint(1234));
        assert_eq!(a.info_slot(5), Some(&InfoValue::Uint(1234)));
        a.clear_info_slot(5);
        assert_eq!(a.info_slot(5), None);
    }

    #[test]
    fn test_retain() {
        let mut a = AttrSet::new();
        a.set_size(7);
        a.set_owner("x");
        a.retain(AttrMask::of_std(&[StdAttr::Size]));
        assert_eq!(a.size(), Some(7));
        assert_eq!(a.owner(), None);
    }
}
