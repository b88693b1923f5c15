// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # In-Memory Entry Store
//!
//! A complete [`EntryStore`] implementation backed by in-process maps.
//! This is the reference adapter used by the test suites and demos; a
//! production deployment plugs a relational driver behind the same trait.
//!
//! Semantics follow the trait contract: `get` returns only the columns the
//! row actually has, batches apply atomically under one lock, soft-removed
//! rows move to a tombstone map, and iterators deliver pages sorted by the
//! requested LRU attribute.

use fswarden_domain::entities::{AttrSet, EntryId};
use fswarden_domain::error::EngineError;
use fswarden_domain::services::entry_store::{
    EntryCursor, EntryStore, FilterAttr, FilterItem, FilterOp, FilterValue, IterOpts, SortAttr,
    SortOrder, StoreFilter,
};
use fswarden_domain::value_objects::attr_mask::{AttrMask, StdAttr};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct Tables {
    /// Live rows.
    entries: BTreeMap<EntryId, AttrSet>,
    /// Tombstones.
    soft_removed: BTreeMap<EntryId, AttrSet>,
    /// Named variables.
    vars: BTreeMap<String, String>,
}

/// In-memory [`EntryStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    single_writer: bool,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// A store that declares itself intolerant of concurrent writers
    /// (caps the DB-apply stage at one thread).
    pub fn new_single_writer() -> MemoryStore {
        MemoryStore {
            single_writer: true,
            ..MemoryStore::default()
        }
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.tables.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstone rows.
    pub fn soft_removed_len(&self) -> usize {
        self.tables.lock().soft_removed.len()
    }

    /// Test hook: a full copy of one live row.
    pub fn row(&self, id: &EntryId) -> Option<AttrSet> {
        self.tables.lock().entries.get(id).cloned()
    }

    /// Test hook: a full copy of one tombstone row.
    pub fn tombstone(&self, id: &EntryId) -> Option<AttrSet> {
        self.tables.lock().soft_removed.get(id).cloned()
    }
}

fn filter_value_of(attrs: &AttrSet, attr: &FilterAttr) -> Option<FilterValue> {
    match attr {
        FilterAttr::Std(a) => match a {
            StdAttr::Size => attrs.size().map(|v| FilterValue::Num(v as i64)),
            StdAttr::Blocks => attrs.blocks().map(|v| FilterValue::Num(v as i64)),
            StdAttr::Nlink => attrs.nlink().map(|v| FilterValue::Num(v as i64)),
            StdAttr::Depth => attrs.depth().map(|v| FilterValue::Num(v as i64)),
            StdAttr::Dircount => attrs.dircount().map(|v| FilterValue::Num(v as i64)),
            StdAttr::Avgsize => attrs.avgsize().map(|v| FilterValue::Num(v as i64)),
            StdAttr::Mode => attrs.mode().map(|v| FilterValue::Num(v as i64)),
            StdAttr::LastAccess => attrs.last_access().map(FilterValue::Num),
            StdAttr::LastMod => attrs.last_mod().map(FilterValue::Num),
            StdAttr::LastMdChange => attrs.last_mdchange().map(FilterValue::Num),
            StdAttr::ClassUpdate => attrs.class_update().map(FilterValue::Num),
            StdAttr::CreationTime => attrs.creation_time().map(FilterValue::Num),
            StdAttr::RmTime => attrs.rm_time().map(FilterValue::Num),
            StdAttr::MdUpdate => attrs.md_update().map(FilterValue::Num),
            StdAttr::PathUpdate => attrs.path_update().map(FilterValue::Num),
            StdAttr::Invalid => attrs.invalid().map(FilterValue::Bool),
            StdAttr::Kind => attrs.kind().map(|k| FilterValue::Str(k.as_str().to_string())),
            _ => attrs.std_attr_string(*a).map(FilterValue::Str),
        },
        FilterAttr::Status(i) => attrs.status_slot(*i).map(|v| FilterValue::Num(v as i64)),
        FilterAttr::Info(slot) => attrs.info_slot(*slot).map(|v| match v {
            fswarden_domain::value_objects::InfoValue::Text(s) => FilterValue::Str(s.clone()),
            other => FilterValue::Num(other.as_uint().unwrap_or(0) as i64),
        }),
    }
}

fn like_match(pattern: &str, value: &str) -> bool {
    // shell-style '*' / '?' patterns, as produced by the filter builders
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map(|r| r.is_match(value)).unwrap_or(false)
}

fn item_matches(attrs: &AttrSet, item: &FilterItem) -> bool {
    let val = match filter_value_of(attrs, &item.attr) {
        Some(v) => v,
        None => return item.allow_null,
    };
    match (&val, &item.value, item.op) {
        (FilterValue::Num(a), FilterValue::Num(b), op) => match op {
            FilterOp::Eq => a == b,
            FilterOp::Ne => a != b,
            FilterOp::Gt => a > b,
            FilterOp::Ge => a >= b,
            FilterOp::Lt => a < b,
            FilterOp::Le => a <= b,
            FilterOp::Like => false,
        },
        (FilterValue::Bool(a), FilterValue::Bool(b), op) => match op {
            FilterOp::Eq => a == b,
            FilterOp::Ne => a != b,
            _ => false,
        },
        (FilterValue::Str(a), FilterValue::Str(b), op) => match op {
            FilterOp::Eq => a == b,
            FilterOp::Ne => a != b,
            FilterOp::Like => like_match(b, a),
            FilterOp::Gt => a > b,
            FilterOp::Ge => a >= b,
            FilterOp::Lt => a < b,
            FilterOp::Le => a <= b,
        },
        _ => false,
    }
}

fn filter_matches(attrs: &AttrSet, filter: &StoreFilter) -> bool {
    filter.items.iter().all(|item| item_matches(attrs, item))
}

struct VecCursor {
    rows: std::vec::IntoIter<(EntryId, AttrSet)>,
}

impl EntryCursor for VecCursor {
    fn next_entry(&mut self) -> Result<Option<(EntryId, AttrSet)>, EngineError> {
        Ok(self.rows.next())
    }
}

fn open_cursor(
    table: &BTreeMap<EntryId, AttrSet>,
    filter: &StoreFilter,
    sort: Option<(SortAttr, SortOrder)>,
    opts: IterOpts,
) -> Box<dyn EntryCursor> {
    let mut rows: Vec<(EntryId, AttrSet)> = table
        .iter()
        .filter(|(_, attrs)| filter_matches(attrs, filter))
        .map(|(id, attrs)| (*id, attrs.clone()))
        .collect();

    if let Some((attr, SortOrder::Asc)) = sort {
        rows.sort_by_key(|(_, attrs)| attr.value_of(attrs).unwrap_or(i64::MAX));
    }
    if opts.list_count_max > 0 {
        rows.truncate(opts.list_count_max as usize);
    }

    Box::new(VecCursor {
        rows: rows.into_iter(),
    })
}

impl EntryStore for MemoryStore {
    fn get(&self, id: &EntryId, _need: &AttrMask) -> Result<Option<AttrSet>, EngineError> {
        Ok(self.tables.lock().entries.get(id).cloned())
    }

    fn insert(&self, id: &EntryId, attrs: &AttrSet) -> Result<(), EngineError> {
        self.tables.lock().entries.insert(*id, attrs.clone());
        Ok(())
    }

    fn update(&self, id: &EntryId, attrs: &AttrSet) -> Result<(), EngineError> {
        let mut t = self.tables.lock();
        match t.entries.get_mut(id) {
            Some(row) => {
                row.apply(attrs);
                Ok(())
            }
            None => {
                t.entries.insert(*id, attrs.clone());
                Ok(())
            }
        }
    }

    fn batch_apply(&self, ops: &[(EntryId, AttrSet)], is_update: bool) -> Result<(), EngineError> {
        // one lock for the whole batch: all or nothing
        let mut t = self.tables.lock();
        for (id, attrs) in ops {
            if is_update {
                if let Some(row) = t.entries.get_mut(id) {
                    row.apply(attrs);
                    continue;
                }
            }
            t.entries.insert(*id, attrs.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &EntryId, db_attrs: &AttrSet, last: bool) -> Result<(), EngineError> {
        let mut t = self.tables.lock();
        if last {
            t.entries.remove(id);
        } else if let Some(row) = t.entries.get_mut(id) {
            // remove one name: decrement the link count, drop the name key
            if let (Some(n), Some(rn)) = (row.nlink(), db_attrs.name()) {
                if row.name() == Some(rn) {
                    row.drop_attrs(AttrMask::of_std(&[StdAttr::Name, StdAttr::ParentId]));
                }
                row.set_nlink(n.saturating_sub(1));
            }
        }
        Ok(())
    }

    fn soft_remove(&self, id: &EntryId, attrs: &AttrSet) -> Result<(), EngineError> {
        let mut t = self.tables.lock();
        let mut row = t.entries.remove(id).unwrap_or_default();
        row.apply(attrs);
        t.soft_removed.insert(*id, row);
        Ok(())
    }

    fn soft_remove_discard(&self, id: &EntryId) -> Result<(), EngineError> {
        self.tables.lock().soft_removed.remove(id);
        Ok(())
    }

    fn iterator(
        &self,
        filter: &StoreFilter,
        sort: Option<(SortAttr, SortOrder)>,
        opts: IterOpts,
    ) -> Result<Box<dyn EntryCursor>, EngineError> {
        Ok(open_cursor(&self.tables.lock().entries, filter, sort, opts))
    }

    fn rm_list_iterator(
        &self,
        filter: &StoreFilter,
        sort: Option<(SortAttr, SortOrder)>,
        opts: IterOpts,
    ) -> Result<Box<dyn EntryCursor>, EngineError> {
        Ok(open_cursor(&self.tables.lock().soft_removed, filter, sort, opts))
    }

    fn mass_remove(
        &self,
        filter: &StoreFilter,
        cb: &mut dyn FnMut(&EntryId),
    ) -> Result<u64, EngineError> {
        let mut t = self.tables.lock();
        let victims: Vec<EntryId> = t
            .entries
            .iter()
            .filter(|(_, a)| filter_matches(a, filter))
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            t.entries.remove(id);
            cb(id);
        }
        Ok(victims.len() as u64)
    }

    fn mass_soft_remove(
        &self,
        filter: &StoreFilter,
        rm_time: i64,
        cb: &mut dyn FnMut(&EntryId),
    ) -> Result<u64, EngineError> {
        let mut t = self.tables.lock();
        let victims: Vec<EntryId> = t
            .entries
            .iter()
            .filter(|(_, a)| filter_matches(a, filter))
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            if let Some(mut row) = t.entries.remove(id) {
                row.set_rm_time(rm_time);
                t.soft_removed.insert(*id, row);
            }
            cb(id);
        }
        Ok(victims.len() as u64)
    }

    fn get_fid_from_name(
        &self,
        parent: &EntryId,
        name: &str,
    ) -> Result<Option<EntryId>, EngineError> {
        let t = self.tables.lock();
        Ok(t.entries
            .iter()
            .find(|(_, a)| a.parent_id() == Some(*parent) && a.name() == Some(name))
            .map(|(id, _)| *id))
    }

    fn get_var(&self, name: &str) -> Result<Option<String>, EngineError> {
        Ok(self.tables.lock().vars.get(name).cloned())
    }

    fn set_var(&self, name: &str, value: &str) -> Result<(), EngineError> {
        self.tables.lock().vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn force_commit(&self, _on: bool) -> Result<(), EngineError> {
        Ok(())
    }

    fn generate_fields(&self, attrs: &mut AttrSet, mask: AttrMask) -> Result<(), EngineError> {
        if mask.test_std(StdAttr::Depth) {
            if let Some(path) = attrs.fullpath() {
                let depth = path.matches('/').count().saturating_sub(1) as u32;
                attrs.set_depth(depth);
            }
        }
        Ok(())
    }

    fn single_writer(&self) -> bool {
        self.single_writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: u64, size: u64, last_mod: i64) -> (EntryId, AttrSet) {
        let id = EntryId::fid(0x10, i as u32, 0);
        let mut a = AttrSet::new();
        a.set_size(size);
        a.set_last_mod(last_mod);
        a.set_name(format!("f{}", i));
        (id, a)
    }

    #[test]
    fn test_insert_get_update() {
        let store = MemoryStore::new();
        let (id, attrs) = entry(1, 100, 10);
        store.insert(&id, &attrs).unwrap();

        let row = store.get(&id, &AttrMask::EMPTY).unwrap().unwrap();
        assert_eq!(row.size(), Some(100));

        let mut delta = AttrSet::new();
        delta.set_size(200);
        store.update(&id, &delta).unwrap();
        let row = store.get(&id, &AttrMask::EMPTY).unwrap().unwrap();
        assert_eq!(row.size(), Some(200));
        assert_eq!(row.last_mod(), Some(10)); // untouched column survives
    }

    #[test]
    fn test_iterator_sorted_and_paged() {
        let store = MemoryStore::new();
        for (i, lm) in [(1u64, 30i64), (2, 10), (3, 20)] {
            let (id, a) = entry(i, 1, lm);
            store.insert(&id, &a).unwrap();
        }
        let mut cur = store
            .iterator(
                &StoreFilter::new(),
                Some((SortAttr::LastMod, SortOrder::Asc)),
                IterOpts { list_count_max: 2 },
            )
            .unwrap();
        let first = cur.next_entry().unwrap().unwrap();
        let second = cur.next_entry().unwrap().unwrap();
        assert_eq!(first.1.last_mod(), Some(10));
        assert_eq!(second.1.last_mod(), Some(20));
        assert!(cur.next_entry().unwrap().is_none()); // page limit
    }

    #[test]
    fn test_mass_soft_remove_filters_and_stamps() {
        let store = MemoryStore::new();
        for (i, lm) in [(1u64, 5i64), (2, 50)] {
            let (id, mut a) = entry(i, 1, lm);
            a.set_md_update(lm);
            store.insert(&id, &a).unwrap();
        }
        let mut filter = StoreFilter::new();
        filter.push(FilterItem::std(
            StdAttr::MdUpdate,
            FilterOp::Lt,
            FilterValue::Num(10),
        ));
        let mut seen = Vec::new();
        let n = store
            .mass_soft_remove(&filter, 999, &mut |id| seen.push(*id))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.soft_removed_len(), 1);
        assert_eq!(store.tombstone(&seen[0]).unwrap().rm_time(), Some(999));
    }

    #[test]
    fn test_fid_from_name() {
        let store = MemoryStore::new();
        let parent = EntryId::fid(0x10, 99, 0);
        let (id, mut a) = entry(1, 1, 1);
        a.set_parent_id(parent);
        store.insert(&id, &a).unwrap();

        assert_eq!(store.get_fid_from_name(&parent, "f1").unwrap(), Some(id));
        assert_eq!(store.get_fid_from_name(&parent, "nope").unwrap(), None);
    }

    #[test]
    fn test_not_invalid_filter_allows_null() {
        let store = MemoryStore::new();
        let (id, a) = entry(1, 1, 1); // 'invalid' column absent
        store.insert(&id, &a).unwrap();

        let mut filter = StoreFilter::new();
        filter.push(StoreFilter::not_invalid());
        let mut cur = store
            .iterator(&filter, None, IterOpts::default())
            .unwrap();
        assert!(cur.next_entry().unwrap().is_some());
    }
}
