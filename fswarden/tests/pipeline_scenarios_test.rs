// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end entry-processor scenarios: scan ingestion, changelog
//! removal semantics, record-clear ordering, epoch garbage collection
//! and no-op demotion.

mod common;

use common::{archiver_manager, scan_attrs, MockFs};
use fswarden::domain::entities::changelog::{ChangelogRecord, RecordFlags, RecordType};
use fswarden::domain::entities::{AttrSet, EntryId};
use fswarden::domain::rules::FileClassSet;
use fswarden::domain::services::entry_store::EntryStore;
use fswarden::domain::services::fs_access::FsAccess;
use fswarden::domain::status_manager::SmRegistry;
use fswarden::domain::value_objects::{AttrMask, UpdateParams};
use fswarden::infrastructure::MemoryStore;
use fswarden::pipeline::{EntryProcessor, PipelineConfig, PipelineCtx, PipelineOp};
use parking_lot::Mutex;
use std::sync::Arc;

fn test_registry(with_archiver: bool) -> Arc<SmRegistry> {
    let mut reg = SmRegistry::new();
    if with_archiver {
        reg.register_manager(archiver_manager()).unwrap();
        reg.create_instance("archive", "archiver", None).unwrap();
    } else {
        reg.create_instance("basic_pol", "basic", None).unwrap();
    }
    reg.update_masks();
    reg.init_all().unwrap();
    Arc::new(reg)
}

fn test_ctx(store: Arc<MemoryStore>, fs: Arc<MockFs>, registry: Arc<SmRegistry>) -> PipelineCtx {
    PipelineCtx::new(
        store,
        fs,
        registry,
        UpdateParams::standard(),
        PipelineConfig {
            nb_threads: 4,
            ..PipelineConfig::default()
        },
        FileClassSet::default(),
    )
}

fn record(
    index: u64,
    rec_type: RecordType,
    target: EntryId,
    parent: EntryId,
    name: &str,
    unlink_last: bool,
) -> ChangelogRecord {
    ChangelogRecord {
        index,
        rec_type,
        time: 1_000_000 + index as i64,
        flags: RecordFlags {
            unlink_last,
            unlink_hsm_exists: false,
        },
        target,
        parent: Some(parent),
        name: Some(name.to_string()),
        origin: "mdt0".into(),
    }
}

/// Scenario: a scan inserts a new file with its stat attributes, a
/// creation time, a scan-epoch timestamp, and the status manager's
/// initial status.
#[test]
fn test_scan_inserts_new_file() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(true);

    let file_id = EntryId::fid(0x200000007, 42, 0);
    let parent = EntryId::fid(0x200000007, 1, 0);
    fs.add_file("/fs/a/b", file_id, 100, 1000);

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs.clone(), registry.clone())).unwrap();

    let stat = fs.lstat(std::path::Path::new("/fs/a/b")).unwrap();
    proc.push(PipelineOp::from_scan(scan_attrs("/fs/a/b", "b", parent, &stat)))
        .unwrap();
    proc.flush();
    proc.shutdown();

    assert_eq!(store.len(), 1);
    let row = store.row(&file_id).expect("row inserted under the fid");
    assert_eq!(row.size(), Some(100));
    assert_eq!(row.last_mod(), Some(1000));
    assert!(row.creation_time().is_some());
    assert!(row.md_update().is_some());

    let inst = registry.by_name("archive").unwrap();
    assert_eq!(inst.status_of(&row), Some("new"));
}

/// Scenario: UNLINK of the last link with no deletion policy removes the
/// row outright and acknowledges the record.
#[test]
fn test_unlink_last_without_deletion_policy() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(false); // no deleted-manager

    let file_id = EntryId::fid(0x2, 10, 0);
    let parent = EntryId::fid(0x2, 1, 0);
    let mut row = AttrSet::new();
    row.set_nlink(1);
    row.set_fullpath("/fs/a/b");
    row.set_name("b");
    row.set_parent_id(parent);
    store.insert(&file_id, &row).unwrap();

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs, registry)).unwrap();

    let cleared = Arc::new(Mutex::new(Vec::new()));
    let cleared2 = cleared.clone();
    proc.push(PipelineOp::from_changelog(
        record(7, RecordType::Unlink, file_id, parent, "b", true),
        Some(Box::new(move |op| {
            cleared2.lock().push(op.record().map(|r| r.index));
        })),
    ))
    .unwrap();
    proc.flush();
    proc.shutdown();

    assert!(store.row(&file_id).is_none(), "row must be gone");
    assert_eq!(store.soft_removed_len(), 0);
    assert_eq!(*cleared.lock(), vec![Some(7)]);
}

/// Scenario: UNLINK of the last link with a deletion-managing status
/// manager tombstones the row instead.
#[test]
fn test_unlink_last_with_deletion_policy_soft_removes() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(true); // archiver manages deleted entries

    let file_id = EntryId::fid(0x2, 11, 0);
    let parent = EntryId::fid(0x2, 1, 0);
    let mut row = AttrSet::new();
    row.set_nlink(1);
    row.set_fullpath("/fs/a/c");
    row.set_name("c");
    row.set_parent_id(parent);
    row.set_size(4096);
    store.insert(&file_id, &row).unwrap();

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs, registry)).unwrap();
    proc.push(PipelineOp::from_changelog(
        record(8, RecordType::Unlink, file_id, parent, "c", true),
        Some(Box::new(|_| {})),
    ))
    .unwrap();
    proc.flush();
    proc.shutdown();

    assert!(store.row(&file_id).is_none());
    let tomb = store.tombstone(&file_id).expect("tombstone row");
    assert!(tomb.rm_time().is_some());
    assert_eq!(tomb.fullpath(), Some("/fs/a/c"));
}

/// Scenario: a non-last UNLINK removes the name but keeps the inode row.
#[test]
fn test_unlink_non_last_removes_name_only() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(false);

    let file_id = EntryId::fid(0x2, 12, 0);
    let parent = EntryId::fid(0x2, 1, 0);
    let mut row = AttrSet::new();
    row.set_nlink(3);
    row.set_name("b");
    row.set_parent_id(parent);
    row.set_size(77);
    store.insert(&file_id, &row).unwrap();

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs, registry)).unwrap();
    proc.push(PipelineOp::from_changelog(
        record(9, RecordType::Unlink, file_id, parent, "b", false),
        Some(Box::new(|_| {})),
    ))
    .unwrap();
    proc.flush();
    proc.shutdown();

    let row = store.row(&file_id).expect("inode row persists");
    assert_eq!(row.size(), Some(77));
    // the name under the parent is gone
    assert_eq!(store.get_fid_from_name(&parent, "b").unwrap(), None);
}

/// Changelog-clear ordering invariant: acknowledged record indices are
/// strictly increasing, even with parallel workers and records dropped
/// before the clear stage.
#[test]
fn test_changelog_clear_order_is_strictly_increasing() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(false);

    let parent = EntryId::fid(0x3, 1, 0);
    // script a few files so CREATE records can be enriched
    for i in 0..10u32 {
        fs.add_file(
            format!("/fs/f{}", i),
            EntryId::fid(0x3, 100 + i, 0),
            10 + i as u64,
            2000 + i as i64,
        );
    }

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs, registry)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..10u64 {
        let order2 = order.clone();
        let target = EntryId::fid(0x3, 100 + i as u32, 0);
        let rec = if i == 4 {
            // an UNLINK for an unknown entry is dropped without effect,
            // and must unblock its successors
            record(i, RecordType::Unlink, EntryId::fid(0x9, 999, 0), parent, "ghost", false)
        } else {
            record(i, RecordType::Create, target, parent, &format!("f{}", i), false)
        };
        proc.push(PipelineOp::from_changelog(
            rec,
            Some(Box::new(move |op| {
                if let Some(r) = op.record() {
                    order2.lock().push(r.index);
                }
            })),
        ))
        .unwrap();
    }
    proc.flush();
    proc.shutdown();

    let cleared = order.lock().clone();
    assert!(!cleared.is_empty());
    for pair in cleared.windows(2) {
        assert!(pair[0] < pair[1], "clear order must be strictly increasing: {:?}", cleared);
    }
}

/// Scan-epoch GC invariant: after the end-of-scan operation, surviving
/// rows were all seen by this scan; stale ones are tombstoned when a
/// deletion policy exists.
#[test]
fn test_scan_epoch_gc_soft_removes_stale_rows() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(true);

    // a row from an earlier scan, not seen anymore
    let stale = EntryId::fid(0x4, 50, 0);
    let mut stale_row = AttrSet::new();
    stale_row.set_md_update(1);
    store.insert(&stale, &stale_row).unwrap();

    // one live file scanned now
    let live = EntryId::fid(0x4, 51, 0);
    let parent = EntryId::fid(0x4, 1, 0);
    fs.add_file("/fs/live", live, 10, 3000);

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs.clone(), registry)).unwrap();
    let scan_start = chrono::Utc::now().timestamp();

    let stat = fs.lstat(std::path::Path::new("/fs/live")).unwrap();
    proc.push(PipelineOp::from_scan(scan_attrs("/fs/live", "live", parent, &stat)))
        .unwrap();
    proc.push_gc(PipelineOp::gc(scan_start, true, false, None, None))
        .unwrap();
    proc.flush();
    proc.shutdown();

    assert!(store.row(&stale).is_none(), "stale row collected");
    assert!(store.tombstone(&stale).is_some(), "deletion policy => tombstone");
    let survivor = store.row(&live).expect("scanned row survives");
    assert!(survivor.md_update().unwrap() >= scan_start);
}

/// No-op demotion idempotence: running pre-apply twice on the same
/// attribute sets is equivalent to running it once.
#[test]
fn test_pre_apply_noop_demotion_is_idempotent() {
    use fswarden::pipeline::handlers::pre_apply;
    use fswarden::pipeline::op::DbOpType;

    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(false);
    let ctx = test_ctx(store, fs, registry);

    let mut db_attrs = AttrSet::new();
    db_attrs.set_size(100);
    db_attrs.set_owner("1000");
    db_attrs.set_name("same");
    db_attrs.set_parent_id(EntryId::fid(0x5, 1, 0));

    let mut op = PipelineOp::from_scan(AttrSet::new());
    op.entry_id = Some(EntryId::fid(0x5, 2, 0));
    op.db_op_type = DbOpType::Update;
    op.db_exists = true;
    op.fs_attrs = db_attrs.clone();
    op.db_attrs = db_attrs;

    pre_apply(&ctx, &mut op);
    let mask_once = op.fs_attrs.mask();
    let type_once = op.db_op_type;

    pre_apply(&ctx, &mut op);
    assert_eq!(op.fs_attrs.mask(), mask_once);
    assert_eq!(op.db_op_type, type_once);
}

/// ID-constraint: two operations for the same identity are serialized
/// past the get-info-DB stage; both effects land.
#[test]
fn test_id_constraint_serializes_same_identity() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let registry = test_registry(false);

    let file_id = EntryId::fid(0x6, 20, 0);
    let parent = EntryId::fid(0x6, 1, 0);
    fs.add_file("/fs/x", file_id, 10, 1000);

    let proc = EntryProcessor::start(test_ctx(store.clone(), fs.clone(), registry)).unwrap();

    // two scans of the same entry racing through the pipeline
    let stat = fs.lstat(std::path::Path::new("/fs/x")).unwrap();
    for _ in 0..2 {
        proc.push(PipelineOp::from_scan(scan_attrs("/fs/x", "x", parent, &stat)))
            .unwrap();
    }
    proc.flush();
    proc.shutdown();

    assert_eq!(store.len(), 1);
    let mask = store.row(&file_id).unwrap().mask();
    assert_ne!(mask, AttrMask::EMPTY);
}
