// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry Store Port
//!
//! The relational store the engine mirrors the namespace into, expressed as
//! a trait. The concrete driver (schema, query grammar, transactions) is an
//! external collaborator: the engine only relies on the operations below
//! and on the store's own answers for diffing and batch compatibility.
//!
//! ## Contract highlights
//!
//! - `get` returns the cached attribute set with the store's presence mask;
//!   absent rows are `Ok(None)`, not errors.
//! - `batch_apply` is atomic: either every operation in the batch is
//!   applied or none is.
//! - `soft_remove` moves a row into the tombstone table, preserving the
//!   attributes listed by the deletion-managing status managers.
//! - Iterators deliver `(id, attrs)` pages ordered by the requested LRU
//!   attribute; the page size is the caller's cursor window.
//! - The store persists named variables (e.g. the end time of the last
//!   full scan) via `get_var`/`set_var`.

use crate::entities::attr_set::AttrSet;
use crate::entities::entry_id::EntryId;
use crate::error::EngineError;
use crate::value_objects::attr_mask::{AttrMask, StdAttr};
use serde::{Deserialize, Serialize};

/// Store variable holding the end time of the last completed full scan.
pub const VAR_LAST_SCAN_END_TIME: &str = "LAST_SCAN_END_TIME";

/// Comparison operator in a store filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Shell-style pattern match (strings only).
    Like,
}

/// A filterable column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Num(i64),
    Str(String),
    Bool(bool),
}

/// The column a filter item applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterAttr {
    Std(StdAttr),
    /// Status slot of the given instance index.
    Status(usize),
    /// Global info slot.
    Info(usize),
}

/// One conjunct of a store filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterItem {
    pub attr: FilterAttr,
    pub op: FilterOp,
    pub value: FilterValue,
    /// Also accept rows where the column is NULL (used when filtering on
    /// attributes that may legitimately be absent).
    pub allow_null: bool,
}

impl FilterItem {
    pub fn new(attr: FilterAttr, op: FilterOp, value: FilterValue) -> FilterItem {
        FilterItem {
            attr,
            op,
            value,
            allow_null: false,
        }
    }

    pub fn std(attr: StdAttr, op: FilterOp, value: FilterValue) -> FilterItem {
        FilterItem::new(FilterAttr::Std(attr), op, value)
    }
}

/// A conjunction of filter items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreFilter {
    pub items: Vec<FilterItem>,
}

impl StoreFilter {
    pub fn new() -> StoreFilter {
        StoreFilter::default()
    }

    pub fn push(&mut self, item: FilterItem) {
        self.items.push(item);
    }

    /// Convenience: `invalid != true` (or NULL), excluding rows tagged
    /// stale by identity checks.
    pub fn not_invalid() -> FilterItem {
        FilterItem {
            attr: FilterAttr::Std(StdAttr::Invalid),
            op: FilterOp::Ne,
            value: FilterValue::Bool(true),
            allow_null: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The attribute candidates are ordered by (ascending) when iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortAttr {
    LastAccess,
    LastMod,
    CreationTime,
    RmTime,
    /// A status-manager info slot (global index); must be numeric.
    Info(usize),
}

impl SortAttr {
    /// The mask bit(s) needed to read the sort value from a row.
    pub fn need_mask(&self) -> AttrMask {
        match self {
            SortAttr::LastAccess => AttrMask::of_std(&[StdAttr::LastAccess]),
            SortAttr::LastMod => AttrMask::of_std(&[StdAttr::LastMod]),
            SortAttr::CreationTime => AttrMask::of_std(&[StdAttr::CreationTime]),
            SortAttr::RmTime => AttrMask::of_std(&[StdAttr::RmTime]),
            SortAttr::Info(slot) => AttrMask::of_info(*slot),
        }
    }

    /// Reads the sort value from an attribute set.
    pub fn value_of(&self, attrs: &AttrSet) -> Option<i64> {
        match self {
            SortAttr::LastAccess => attrs.last_access(),
            SortAttr::LastMod => attrs.last_mod(),
            SortAttr::CreationTime => attrs.creation_time(),
            SortAttr::RmTime => attrs.rm_time(),
            SortAttr::Info(slot) => attrs.info_slot(*slot).and_then(|v| v.as_uint()).map(|v| v as i64),
        }
    }

    /// The corresponding standard attribute, when there is one.
    pub fn as_std(&self) -> Option<StdAttr> {
        match self {
            SortAttr::LastAccess => Some(StdAttr::LastAccess),
            SortAttr::LastMod => Some(StdAttr::LastMod),
            SortAttr::CreationTime => Some(StdAttr::CreationTime),
            SortAttr::RmTime => Some(StdAttr::RmTime),
            SortAttr::Info(_) => None,
        }
    }
}

/// Iterator ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// No ordering requested (fastest).
    #[default]
    None,
    /// Ascending by the sort attribute (LRU first).
    Asc,
}

/// Cursor options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IterOpts {
    /// Page size; 0 means the store's default window.
    pub list_count_max: u64,
}

/// A cursor over `(id, attrs)` rows.
pub trait EntryCursor: Send {
    fn next_entry(&mut self) -> Result<Option<(EntryId, AttrSet)>, EngineError>;
}

/// The relational store collaborator.
pub trait EntryStore: Send + Sync {
    /// Fetches the cached attributes of an entry. `need` is a hint of the
    /// attributes the caller wants; the store may return more. Absent rows
    /// yield `Ok(None)`.
    fn get(&self, id: &EntryId, need: &AttrMask) -> Result<Option<AttrSet>, EngineError>;

    fn insert(&self, id: &EntryId, attrs: &AttrSet) -> Result<(), EngineError>;

    fn update(&self, id: &EntryId, attrs: &AttrSet) -> Result<(), EngineError>;

    /// Applies a homogeneous batch atomically. `is_update` selects between
    /// batched inserts and batched updates.
    fn batch_apply(&self, ops: &[(EntryId, AttrSet)], is_update: bool) -> Result<(), EngineError>;

    /// Removes one name of the entry (`last == false`) or the entry and
    /// all its names (`last == true`). `db_attrs` carries the identity key
    /// (`parent_id`, `name`) of the removed name.
    fn remove(&self, id: &EntryId, db_attrs: &AttrSet, last: bool) -> Result<(), EngineError>;

    /// Moves the row into the tombstone table.
    fn soft_remove(&self, id: &EntryId, attrs: &AttrSet) -> Result<(), EngineError>;

    /// Purges a tombstone row.
    fn soft_remove_discard(&self, id: &EntryId) -> Result<(), EngineError>;

    /// Opens a cursor on the live table.
    fn iterator(
        &self,
        filter: &StoreFilter,
        sort: Option<(SortAttr, SortOrder)>,
        opts: IterOpts,
    ) -> Result<Box<dyn EntryCursor>, EngineError>;

    /// Opens a cursor on the tombstone table.
    fn rm_list_iterator(
        &self,
        filter: &StoreFilter,
        sort: Option<(SortAttr, SortOrder)>,
        opts: IterOpts,
    ) -> Result<Box<dyn EntryCursor>, EngineError>;

    /// Mass removal of all rows matching `filter`; the callback observes
    /// each removed identity. Returns the number of removed rows.
    fn mass_remove(
        &self,
        filter: &StoreFilter,
        cb: &mut dyn FnMut(&EntryId),
    ) -> Result<u64, EngineError>;

    /// Mass soft-removal, stamping `rm_time` on every tombstone.
    fn mass_soft_remove(
        &self,
        filter: &StoreFilter,
        rm_time: i64,
        cb: &mut dyn FnMut(&EntryId),
    ) -> Result<u64, EngineError>;

    /// Resolves an identity from the name table (`parent` + `name`), for
    /// changelog streams that omit the target identity on some records.
    fn get_fid_from_name(
        &self,
        _parent: &EntryId,
        _name: &str,
    ) -> Result<Option<EntryId>, EngineError> {
        Ok(None)
    }

    fn get_var(&self, name: &str) -> Result<Option<String>, EngineError>;

    fn set_var(&self, name: &str, value: &str) -> Result<(), EngineError>;

    /// Forces (or releases) synchronous commit around mass operations.
    fn force_commit(&self, on: bool) -> Result<(), EngineError>;

    /// Computes store-generated virtual fields (e.g. depth from fullpath)
    /// for the attributes in `mask`.
    fn generate_fields(&self, attrs: &mut AttrSet, mask: AttrMask) -> Result<(), EngineError>;

    /// The store's notion of "which of `fresh`'s fields differ from `db`".
    fn what_diff(&self, fresh: &AttrSet, db: &AttrSet) -> AttrMask {
        fresh.diff(db)
    }

    /// Whether two attribute masks can share one batched statement.
    fn batch_compat(&self, a: &AttrMask, b: &AttrMask) -> bool {
        a == b
    }

    /// True when the driver cannot tolerate concurrent writers; the
    /// DB-apply stage then runs single-threaded.
    fn single_writer(&self) -> bool {
        false
    }
}
