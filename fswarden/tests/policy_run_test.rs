// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Policy-run scenarios: target quotas, the scheduler stack's stop
//! semantics, the heuristic end of list, and outstanding-action
//! reconciliation.

mod common;

use common::MockFs;
use fswarden::domain::entities::{AttrSet, EntryId};
use fswarden::domain::rules::{BoolExpr, CompareOp, CritTarget, CritValue, PolicyRule, RuleSet};
use fswarden::domain::services::action::{ActionParams, PolicyAction, PostAction};
use fswarden::domain::services::entry_store::{EntryStore, SortAttr, VAR_LAST_SCAN_END_TIME};
use fswarden::domain::services::scheduler::{ActionScheduler, SchedDecision, SchedItem, SchedStatus};
use fswarden::domain::status_manager::{SmRegistry, StatusManager};
use fswarden::domain::value_objects::{Counters, StdAttr, UpdateParams};
use fswarden::infrastructure::MemoryStore;
use fswarden::policy::config::MatchSource;
use fswarden::policy::run::{PolicyRun, RunCtx, RunParams, RunTarget};
use fswarden::policy::{PolicyDescriptor, PolicyRunConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const DAY: i64 = 86_400;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn old_file_row(path: &str, size: u64, last_access: i64) -> AttrSet {
    let mut a = AttrSet::new();
    a.set_fullpath(path);
    a.set_name(path.rsplit('/').next().unwrap_or(path));
    a.set_size(size);
    a.set_blocks(size / 512);
    a.set_last_access(last_access);
    a.set_last_mod(last_access);
    a.set_md_update(last_access);
    a
}

/// An action function recording the paths it was applied to.
fn recording_action(acted: Arc<Mutex<Vec<String>>>, delay_ms: u64) -> PolicyAction {
    PolicyAction::function(
        "record",
        Arc::new(move |_id, attrs, _params, _out| {
            if delay_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
            }
            acted.lock().push(attrs.fullpath().unwrap_or("?").to_string());
            Ok(PostAction::Update)
        }),
    )
}

fn purge_descriptor(action: PolicyAction) -> PolicyDescriptor {
    PolicyDescriptor {
        name: "purge".into(),
        scope: BoolExpr::Constant(true),
        manage_deleted: false,
        status_manager: None,
        status_current: None,
        rules: RuleSet {
            rules: vec![PolicyRule {
                name: "purge_old".into(),
                fileclasses: vec![],
                condition: Some(BoolExpr::cond(
                    CritTarget::Std(StdAttr::LastAccess),
                    CompareOp::Gt,
                    CritValue::AgeSecs(30 * DAY),
                )),
                action_params: ActionParams::new(),
            }],
            ignore: vec![],
            ignore_fileclasses: vec![],
        },
        fileclasses: Default::default(),
        default_action: action,
        default_action_params: ActionParams::new(),
    }
}

fn run_ctx(store: Arc<MemoryStore>, fs: Arc<MockFs>, config: PolicyRunConfig) -> RunCtx {
    let mut reg = SmRegistry::new();
    reg.create_instance("purge", "basic", None).unwrap();
    reg.update_masks();
    RunCtx {
        store,
        fs,
        registry: Arc::new(reg),
        updt: UpdateParams::standard(),
        fileclasses: Default::default(),
        config,
        match_classes: false,
        cfg_path: String::new(),
    }
}

fn cache_only_config() -> PolicyRunConfig {
    PolicyRunConfig {
        nb_threads: 2,
        lru_sort_attr: Some(SortAttr::LastAccess),
        pre_sched_match: MatchSource::CacheOnly,
        post_sched_match: MatchSource::CacheOnly,
        report_actions: false,
        ..PolicyRunConfig::default()
    }
}

/// Scenario: the pass stops once the achieved volume reaches the target;
/// remaining candidates are not acted on.
#[test]
fn test_run_stops_at_target_volume() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    store.set_var(VAR_LAST_SCAN_END_TIME, "1").unwrap();

    let la = now() - 40 * DAY;
    for i in 0..4u32 {
        let id = EntryId::fid(0x10, i, 0);
        store
            .insert(&id, &old_file_row(&format!("/fs/f{}", i), 400 * MIB, la + i as i64))
            .unwrap();
    }

    let acted = Arc::new(Mutex::new(Vec::new()));
    let run = PolicyRun::new(
        purge_descriptor(recording_action(acted.clone(), 30)),
        run_ctx(store, fs, cache_only_config()),
        vec![],
    )
    .unwrap();

    let params = RunParams {
        target: RunTarget::All,
        target_ctr: Counters {
            count: 0,
            vol: GIB,
            blocks: 0,
            targeted: 0,
        },
        ..RunParams::default()
    };
    let summary = run.run(&params).unwrap();

    // the 3rd successful action crosses 1 GiB (1.2 GiB); the 4th
    // candidate must not be acted on
    assert_eq!(summary.ok, 3, "summary: {:?}", summary);
    assert_eq!(acted.lock().len(), 3);
    assert!(summary.action_ctr.vol >= GIB);
}

/// A scheduler admitting a fixed number of entries, then stopping the
/// run.
struct StopAfter {
    admitted: AtomicUsize,
    limit: usize,
}

impl ActionScheduler for StopAfter {
    fn name(&self) -> &str {
        "stop_after"
    }
    fn reset(&self) -> Result<(), fswarden::domain::EngineError> {
        self.admitted.store(0, Ordering::SeqCst);
        Ok(())
    }
    fn schedule(&self, item: SchedItem) -> SchedDecision {
        if self.admitted.fetch_add(1, Ordering::SeqCst) < self.limit {
            (item.callback)(SchedStatus::Ok);
            SchedDecision::Accepted
        } else {
            SchedDecision::StopRun(item)
        }
    }
}

/// A scheduler that completes entries from a background thread after a
/// short delay (entries are "inside" it for a while).
struct SlowPass;

impl ActionScheduler for SlowPass {
    fn name(&self) -> &str {
        "slow_pass"
    }
    fn reset(&self) -> Result<(), fswarden::domain::EngineError> {
        Ok(())
    }
    fn schedule(&self, item: SchedItem) -> SchedDecision {
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            (item.callback)(SchedStatus::Ok);
        });
        SchedDecision::Accepted
    }
}

/// Scenario: the first scheduler stops the run while an earlier entry is
/// inside the second scheduler: that entry still completes its action,
/// the stopped entry is not scheduled, and nothing else is submitted.
#[test]
fn test_scheduler_stop_run_flushes_and_finishes_inflight() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    store.set_var(VAR_LAST_SCAN_END_TIME, "1").unwrap();

    let la = now() - 40 * DAY;
    for i in 0..2u32 {
        let id = EntryId::fid(0x11, i, 0);
        store
            .insert(&id, &old_file_row(&format!("/fs/g{}", i), MIB, la + i as i64))
            .unwrap();
    }

    let acted = Arc::new(Mutex::new(Vec::new()));
    let mut config = cache_only_config();
    config.nb_threads = 1; // deterministic submission order
    let run = PolicyRun::new(
        purge_descriptor(recording_action(acted.clone(), 0)),
        run_ctx(store, fs, config),
        vec![
            Arc::new(StopAfter {
                admitted: AtomicUsize::new(0),
                limit: 1,
            }),
            Arc::new(SlowPass),
        ],
    )
    .unwrap();

    let summary = run.run(&RunParams::default()).unwrap();

    assert_eq!(summary.ok, 1, "exactly one action runs: {:?}", summary);
    assert_eq!(acted.lock().len(), 1);
    // the second entry was dropped without an action
    assert!(summary.nok >= 1);
}

/// Scenario: with an ascending last-access ordering, once a candidate is
/// too recent to match any rule the pass ends without listing further
/// pages.
#[test]
fn test_heuristic_end_of_list() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    store.set_var(VAR_LAST_SCAN_END_TIME, "1").unwrap();

    let matching = EntryId::fid(0x12, 1, 0);
    let recent = EntryId::fid(0x12, 2, 0);
    let never_listed = EntryId::fid(0x12, 3, 0);
    store
        .insert(&matching, &old_file_row("/fs/old", MIB, now() - 40 * DAY))
        .unwrap();
    store
        .insert(&recent, &old_file_row("/fs/recent", MIB, now() - 10 * DAY))
        .unwrap();
    store
        .insert(&never_listed, &old_file_row("/fs/newest", MIB, now() - 5 * DAY))
        .unwrap();

    let acted = Arc::new(Mutex::new(Vec::new()));
    let mut config = cache_only_config();
    config.db_request_limit = 2; // force paging after two candidates
    let run = PolicyRun::new(
        purge_descriptor(recording_action(acted.clone(), 0)),
        run_ctx(store.clone(), fs, config),
        vec![],
    )
    .unwrap();

    let summary = run.run(&RunParams::default()).unwrap();

    assert_eq!(summary.ok, 1);
    assert_eq!(acted.lock().as_slice(), ["/fs/old"]);
    // the first page was examined, the third entry never was
    assert_eq!(summary.ok + summary.nok, 2, "summary: {:?}", summary);
    assert!(
        store.row(&never_listed).unwrap().invalid().is_none(),
        "the entry past the heuristic cut must be untouched"
    );
}

/// Out-of-scope candidates are acknowledged as such and skipped.
#[test]
fn test_out_of_scope_entries_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    store.set_var(VAR_LAST_SCAN_END_TIME, "1").unwrap();

    let id = EntryId::fid(0x13, 1, 0);
    let mut row = old_file_row("/fs/root-owned", MIB, now() - 40 * DAY);
    row.set_owner("0");
    store.insert(&id, &row).unwrap();

    let acted = Arc::new(Mutex::new(Vec::new()));
    let mut descr = purge_descriptor(recording_action(acted.clone(), 0));
    // scope: only non-root files (wrapped in a disjunction so it cannot
    // be converted to a store filter and must be checked per entry)
    descr.scope = BoolExpr::Or(vec![BoolExpr::cond(
        CritTarget::Std(StdAttr::Owner),
        CompareOp::Ne,
        CritValue::Str("0".into()),
    )]);

    let run = PolicyRun::new(descr, run_ctx(store, fs, cache_only_config()), vec![]).unwrap();
    let summary = run.run(&RunParams::default()).unwrap();

    assert_eq!(summary.ok, 0);
    assert!(acted.lock().is_empty());
}

/// Outstanding-action recovery counts completed vs still-running
/// actions without cancelling anything.
#[test]
fn test_outstanding_action_recovery() {
    use fswarden::policy::recovery::check_outstanding_actions;

    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");

    // a manager whose re-read always reports the action as finished
    let mut sm = StatusManager::new("runner", &["running", "done"]);
    sm.get_status = Some(Arc::new(|smi, _id, _in, out| {
        smi.set_status_attr(out, "done")
    }));
    let mut reg = SmRegistry::default();
    reg.register_manager(sm).unwrap();
    let idx = reg.create_instance("archive", "runner", None).unwrap();
    reg.update_masks();
    let running_val = reg.by_index(idx).unwrap().sm().status_index("running").unwrap();

    // two stuck rows, one recent row that must not be touched
    for (i, age) in [(1u32, 3 * 3600i64), (2, 4 * 3600), (3, 60)] {
        let id = EntryId::fid(0x14, i, 0);
        let mut row = AttrSet::new();
        row.set_fullpath(format!("/fs/r{}", i));
        row.set_md_update(now() - age);
        row.set_status_slot(idx, running_val);
        store.insert(&id, &row).unwrap();
    }

    let mut ctx = run_ctx(store.clone(), fs, cache_only_config());
    ctx.registry = Arc::new(reg);

    let mut descr = purge_descriptor(PolicyAction::None);
    descr.name = "archive".into();
    descr.status_manager = Some(idx);
    descr.status_current = Some("running".into());

    let stats = check_outstanding_actions(&ctx, &descr).unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.still_running, 0);

    // reconciled rows now carry the refreshed status
    let row = store.row(&EntryId::fid(0x14, 1, 0)).unwrap();
    let inst = ctx.registry.by_index(idx).unwrap();
    assert_eq!(inst.status_of(&row), Some("done"));
    // the recent row was not examined
    let recent = store.row(&EntryId::fid(0x14, 3, 0)).unwrap();
    assert_eq!(inst.status_of(&recent), Some("running"));
}

/// Live reload swaps scalar fields and refuses structural ones.
#[test]
fn test_live_config_reload() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");
    let run = PolicyRun::new(
        purge_descriptor(PolicyAction::None),
        run_ctx(store, fs, cache_only_config()),
        vec![],
    )
    .unwrap();

    let mut new_cfg = cache_only_config();
    new_cfg.nb_threads = 99;
    new_cfg.max_action_count = 7;
    let refused = run.reload_config(&new_cfg);
    assert_eq!(refused, vec!["nb_threads"]);
}

/// The run refuses to start without a completed scan, unless forced.
#[test]
fn test_run_requires_scan_unless_forced() {
    let store = Arc::new(MemoryStore::new());
    let fs = MockFs::new("/fs");

    let acted = Arc::new(Mutex::new(Vec::new()));
    let run = PolicyRun::new(
        purge_descriptor(recording_action(acted.clone(), 0)),
        run_ctx(store, fs, cache_only_config()),
        vec![],
    )
    .unwrap();

    let err = run.run(&RunParams::default()).unwrap_err();
    assert!(matches!(err, fswarden::domain::EngineError::NotReady(_)));

    let summary = run
        .run(&RunParams {
            force: true,
            ..RunParams::default()
        })
        .unwrap();
    assert_eq!(summary.ok, 0); // empty store, nothing to do
}
