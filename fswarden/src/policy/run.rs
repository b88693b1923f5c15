// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy Run
//!
//! The run engine: candidate iteration over ordered store queries, a
//! bounded worker queue, per-entry revalidation and rule matching, the
//! scheduler stack between selection and execution, and target-quota /
//! error-rate bookkeeping.
//!
//! One [`PolicyRun`] value holds the long-lived resources of a policy
//! (queue, scheduler stack, collaborator handles); [`PolicyRun::run`]
//! executes one run and produces a [`RunSummary`].

use crate::policy::check::{
    check_entry, check_entry_times, entry_amount, heuristic_end_of_list, update_entry,
};
use crate::policy::config::{MatchSource, PolicyRunConfig};
use crate::policy::params::{build_action_params, subst_argv, SubstContext};
use crate::policy::queue::{ActionStatus, EntryQueue, QueueItem, QueueStats};
use crate::policy::sched::SchedRes;
use crate::policy::PolicyDescriptor;
use byte_unit::{Byte, UnitType};
use fswarden_domain::entities::{AttrSet, EntryId};
use fswarden_domain::error::EngineError;
use fswarden_domain::rules::{FileClassSet, RuleMatch};
use fswarden_domain::services::action::{ActionParams, PolicyAction, PostAction};
use fswarden_domain::services::entry_store::{
    EntryCursor, EntryStore, FilterAttr, FilterItem, FilterOp, FilterValue, IterOpts, SortOrder,
    StoreFilter, VAR_LAST_SCAN_END_TIME,
};
use fswarden_domain::services::fs_access::FsAccess;
use fswarden_domain::services::scheduler::{ActionScheduler, SchedItem, SchedStatus};
use fswarden_domain::status_manager::{ActionHook, SmRegistry};
use fswarden_domain::value_objects::attr_mask::{AttrMask, StdAttr};
use fswarden_domain::value_objects::{Counters, RunSummary, UpdateParams};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What a run applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunTarget {
    /// Every entry in the policy scope.
    #[default]
    All,
    /// One file, by path.
    File(std::path::PathBuf),
    /// Entries of one fileclass.
    Class(String),
    /// Entries owned by one user.
    User(String),
    /// Entries of one group.
    Group(String),
    /// Entries with data on one storage target.
    Ost(u32),
    /// Entries striped over one pool.
    Pool(String),
}

/// Parameters of one run invocation (typically built by a trigger).
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub target: RunTarget,
    /// Stop once any field is reached; zero fields are unbounded.
    pub target_ctr: Counters,
    /// Trigger-level action-parameter overrides.
    pub action_params: ActionParams,
    /// Run even when no full scan ever completed.
    pub force: bool,
    /// Apply the action to every candidate, ignoring rules and recent
    /// access times.
    pub ignore_policies: bool,
    /// Ignore the configured max_action_count/volume.
    pub no_limit: bool,
}

/// Shared, read-only context of one policy's runs.
pub struct RunCtx {
    pub store: Arc<dyn EntryStore>,
    pub fs: Arc<dyn FsAccess>,
    pub registry: Arc<SmRegistry>,
    pub updt: UpdateParams,
    pub fileclasses: FileClassSet,
    pub config: PolicyRunConfig,
    pub match_classes: bool,
    /// Configuration file path, exposed as `{cfg}`.
    pub cfg_path: String,
}

impl RunCtx {
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[derive(Default)]
struct Progress {
    action_ctr: Counters,
    errors: u64,
    skipped: u64,
    policy_start: i64,
    run_begin: Option<Instant>,
    last_report: i64,
    /// Smallest eligible sort value seen; next run's lower bound.
    first_eligible: Option<i64>,
}

/// Per-entry context travelling through the scheduler stack to the
/// action.
struct EntryCtx {
    item: QueueItem,
    fresh_attrs: AttrSet,
    prev_attrs: AttrSet,
    rule_idx: usize,
    fileclass: Option<String>,
    params: ActionParams,
    time_save: Option<i64>,
    curr_sched: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassStatus {
    /// Iterator exhausted (or heuristic end of list).
    Eol,
    /// The target counters were reached.
    Limit,
    Aborted,
    Error,
}

/// The run engine of one policy.
pub struct PolicyRun {
    descr: Arc<PolicyDescriptor>,
    /// Swapped atomically on configuration reload.
    ctx: parking_lot::RwLock<Arc<RunCtx>>,
    queue: Arc<EntryQueue>,
    scheds: Vec<SchedRes>,
    aborted: AtomicBool,
    stopping: AtomicBool,
    progress: Mutex<Progress>,
    /// Trigger-level parameter overrides of the current run.
    trigger_params: Mutex<ActionParams>,
    ignore_policies: AtomicBool,
    no_limit: AtomicBool,
    run_target: Mutex<RunTarget>,
}

impl PolicyRun {
    pub fn new(
        descr: PolicyDescriptor,
        ctx: RunCtx,
        schedulers: Vec<Arc<dyn ActionScheduler>>,
    ) -> Result<Arc<PolicyRun>, EngineError> {
        ctx.config.validate()?;

        let queue = Arc::new(EntryQueue::new(ctx.config.queue_size));
        let mut scheds = Vec::with_capacity(schedulers.len());
        for s in schedulers {
            scheds.push(SchedRes::start(s, ctx.config.reschedule_delay_ms)?);
        }

        Ok(Arc::new(PolicyRun {
            descr: Arc::new(descr),
            ctx: parking_lot::RwLock::new(Arc::new(ctx)),
            queue,
            scheds,
            aborted: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            progress: Mutex::new(Progress::default()),
            trigger_params: Mutex::new(ActionParams::new()),
            ignore_policies: AtomicBool::new(false),
            no_limit: AtomicBool::new(false),
            run_target: Mutex::new(RunTarget::All),
        }))
    }

    pub fn name(&self) -> &str {
        &self.descr.name
    }

    /// The current context snapshot; a run (or entry) keeps using the
    /// snapshot it started with.
    fn run_ctx(&self) -> Arc<RunCtx> {
        self.ctx.read().clone()
    }

    /// Live configuration reload: dynamic fields swap in atomically and
    /// apply from the next pass; structural fields are refused
    /// individually with a log line. Returns the refused field names.
    pub fn reload_config(&self, new: &PolicyRunConfig) -> Vec<&'static str> {
        let current = self.run_ctx();
        let mut config = current.config.clone();
        let refused = config.reload_from(new);
        let swapped = Arc::new(RunCtx {
            store: current.store.clone(),
            fs: current.fs.clone(),
            registry: current.registry.clone(),
            updt: current.updt,
            fileclasses: current.fileclasses.clone(),
            config,
            match_classes: current.match_classes,
            cfg_path: current.cfg_path.clone(),
        });
        *self.ctx.write() = swapped;
        refused
    }

    /// Requests an abort; queued entries are acknowledged unprocessed.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn ignore_policies(&self) -> bool {
        self.ignore_policies.load(Ordering::Acquire)
    }

    fn no_limit(&self) -> bool {
        self.no_limit.load(Ordering::Acquire)
    }

    /// Executes one policy run.
    pub fn run(self: &Arc<Self>, params: &RunParams) -> Result<RunSummary, EngineError> {
        let ctx = self.run_ctx();
        self.aborted.store(false, Ordering::Release);
        self.stopping.store(false, Ordering::Release);
        self.ignore_policies.store(params.ignore_policies, Ordering::Release);
        self.no_limit.store(params.no_limit, Ordering::Release);
        *self.trigger_params.lock() = params.action_params.clone();
        *self.run_target.lock() = params.target.clone();
        self.queue.reopen();
        {
            let mut p = self.progress.lock();
            // the eligibility bound survives across runs
            let first_eligible = p.first_eligible;
            *p = Progress::default();
            p.first_eligible = first_eligible;
            p.policy_start = ctx.now();
            p.last_report = p.policy_start;
            p.run_begin = Some(Instant::now());
        }

        // single-entry shortcut
        if let RunTarget::File(path) = &params.target {
            return self.single_file_run(path, params);
        }

        // a policy run needs a candidate list
        if !params.force && !self.descr.manage_deleted {
            let scanned = ctx.store.get_var(VAR_LAST_SCAN_END_TIME)?;
            if scanned.is_none() {
                return Err(EngineError::NotReady(
                    "no list available: a full scan must be performed first".into(),
                ));
            }
        }

        let mut filter = self.build_filter(params)?;
        let sort = ctx
            .config
            .lru_sort_attr
            .map(|a| (a, SortOrder::Asc));
        let opts = IterOpts {
            // tombstone listings have no md_update column to page on
            list_count_max: if self.descr.manage_deleted {
                0
            } else {
                ctx.config.db_request_limit
            },
        };

        for s in &self.scheds {
            s.reinit()?;
        }

        let mut it = self.open_iter(&filter, sort, opts)?;

        // worker pool for this run
        let mut workers = Vec::with_capacity(ctx.config.nb_threads);
        for i in 0..ctx.config.nb_threads {
            let me = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-worker-{}", self.descr.name, i))
                .spawn(move || {
                    while let Some(item) = me.queue.get() {
                        me.process_entry(item);
                    }
                })
                .map_err(|e| EngineError::internal_error(format!("cannot spawn worker: {}", e)))?;
            workers.push(handle);
        }

        let mut last_sort_time: i64 = 0;
        let mut page_count: u64 = 0;
        let mut total_count: u64 = 0;

        let rc = loop {
            self.report_progress();

            let st = self.fill_workers_queue(
                params,
                &mut it,
                &mut filter,
                sort,
                opts,
                &mut last_sort_time,
                &mut page_count,
                &mut total_count,
            );

            match st {
                PassStatus::Eol => break Ok(()),
                PassStatus::Aborted => break Err(EngineError::cancelled("policy run aborted")),
                PassStatus::Error => break Err(EngineError::store_error("candidate iteration failed")),
                PassStatus::Limit => {
                    // double-check against the real amount of performed
                    // actions before giving up
                    let p = self.progress.lock();
                    if self.check_limit(&p.action_ctr, p.errors, &params.target_ctr) {
                        break Ok(());
                    }
                    // else: go for another pass
                }
            }
        };

        self.queue.close();
        for w in workers {
            let _ = w.join();
        }

        let summary = self.summary();
        info!(
            policy = self.descr.name.as_str(),
            ok = summary.ok,
            errors = summary.errors,
            skipped = summary.skipped,
            volume = %Byte::from_u64(summary.action_ctr.vol).get_appropriate_unit(UnitType::Binary),
            "policy run complete"
        );

        rc.map(|_| summary)
    }

    fn summary(&self) -> RunSummary {
        let stats = self.queue.stats();
        let p = self.progress.lock();
        RunSummary {
            ok: stats.status[ActionStatus::Ok as usize],
            nok: stats.acked() - stats.status[ActionStatus::Ok as usize],
            skipped: stats.skipped(),
            errors: stats.errors(),
            action_ctr: if p.action_ctr.is_zero() { stats.ok } else { p.action_ctr },
        }
    }

    fn single_file_run(self: &Arc<Self>, path: &std::path::Path, _params: &RunParams) -> Result<RunSummary, EngineError> {
        let ctx = self.run_ctx();
        let id = if ctx.fs.supports_fids() {
            ctx.fs
                .get_fid_by_path(path)?
                .ok_or_else(|| EngineError::vanished(path.display().to_string()))?
        } else {
            let st = ctx.fs.lstat(path)?;
            EntryId::posix(st.dev, st.inode, st.ctime)
        };

        let attrs = ctx
            .store
            .get(&id, &self.db_attr_mask())?
            .unwrap_or_else(|| {
                let mut a = AttrSet::new();
                a.set_fullpath(path.to_string_lossy());
                a
            });

        let targeted = entry_amount(&RunTarget::All, &attrs).targeted;
        self.queue.insert(QueueItem { id, attrs, targeted })?;
        if let Some(item) = self.queue.get() {
            self.process_entry(item);
        }
        self.queue.wait_idle();
        Ok(self.summary())
    }

    /// Attributes candidate rows are read with.
    fn db_attr_mask(&self) -> AttrMask {
        let ctx = self.run_ctx();
        let mut mask = AttrMask::of_std(&[
            StdAttr::Name,
            StdAttr::ParentId,
            StdAttr::Fullpath,
            StdAttr::Size,
            StdAttr::Blocks,
            StdAttr::Kind,
            StdAttr::Nlink,
            StdAttr::CreationTime,
            StdAttr::Fileclass,
            StdAttr::ClassUpdate,
            StdAttr::MdUpdate,
        ]);
        mask |= self.descr.scope.attr_need(&ctx.registry);
        mask |= self.descr.rules.attr_need(&self.descr.fileclasses, &ctx.registry);
        if let Some(sort) = ctx.config.lru_sort_attr {
            mask |= sort.need_mask();
        }
        if let Some(i) = self.descr.status_manager {
            mask.set_status(i);
            if let Some(inst) = ctx.registry.by_index(i) {
                mask |= inst.status_mask_cached;
            }
        }
        if matches!(*self.run_target.lock(), RunTarget::Ost(_) | RunTarget::Pool(_)) {
            mask |= AttrMask::of_std(&[StdAttr::StripeInfo, StdAttr::StripeItems]);
        }
        mask
    }

    fn build_filter(&self, params: &RunParams) -> Result<StoreFilter, EngineError> {
        let ctx = self.run_ctx();
        let mut filter = StoreFilter::new();

        // policy scope, converted best-effort
        let scope_items = self.descr.scope.to_filter_items(&ctx.registry, ctx.now());
        if scope_items.is_empty() && self.descr.scope != fswarden_domain::rules::BoolExpr::Constant(true) {
            warn!(
                policy = self.descr.name.as_str(),
                "scope definition is too complex for an indexed filter and may affect run performance"
            );
        }
        filter.items.extend(scope_items);

        if !self.descr.manage_deleted {
            filter.push(StoreFilter::not_invalid());
        }

        match &params.target {
            RunTarget::All | RunTarget::File(_) => {}
            RunTarget::Class(name) => filter.push(FilterItem::std(
                StdAttr::Fileclass,
                FilterOp::Eq,
                FilterValue::Str(name.clone()),
            )),
            RunTarget::User(name) => filter.push(FilterItem::std(
                StdAttr::Owner,
                FilterOp::Eq,
                FilterValue::Str(name.clone()),
            )),
            RunTarget::Group(name) => filter.push(FilterItem::std(
                StdAttr::Group,
                FilterOp::Eq,
                FilterValue::Str(name.clone()),
            )),
            // per-target amounts are computed entry by entry
            RunTarget::Ost(_) | RunTarget::Pool(_) => {}
        }

        // optimization filters from rule conditions, single-rule policies
        // only (a conjunction cannot express an OR across rules)
        if !params.ignore_policies && self.descr.rules.rules.len() == 1 {
            if let Some(cond) = &self.descr.rules.rules[0].condition {
                let items = cond.to_filter_items(&ctx.registry, ctx.now());
                if items.is_empty() {
                    debug!(policy = self.descr.name.as_str(), "could not convert rule condition to a filter");
                } else {
                    for mut item in items {
                        item.allow_null = true;
                        filter.push(item);
                    }
                }
            }
        }

        // resume after the last known eligible sort value
        let first_eligible = self.progress.lock().first_eligible;
        if let (Some(bound), Some(sort)) = (first_eligible, ctx.config.lru_sort_attr) {
            let attr = sort_filter_attr(sort);
            let mut item = FilterItem::new(attr, FilterOp::Ge, FilterValue::Num(bound));
            item.allow_null = true;
            filter.push(item);
        }

        Ok(filter)
    }

    fn open_iter(
        &self,
        filter: &StoreFilter,
        sort: Option<(fswarden_domain::services::entry_store::SortAttr, SortOrder)>,
        opts: IterOpts,
    ) -> Result<Box<dyn EntryCursor>, EngineError> {
        let ctx = self.run_ctx();
        if self.descr.manage_deleted {
            ctx.store.rm_list_iterator(filter, sort, opts)
        } else {
            ctx.store.iterator(filter, sort, opts)
        }
    }

    /// One pass: feed the worker queue until the iterator dries up or the
    /// target is (potentially) reached.
    #[allow(clippy::too_many_arguments)]
    fn fill_workers_queue(
        self: &Arc<Self>,
        params: &RunParams,
        it: &mut Box<dyn EntryCursor>,
        filter: &mut StoreFilter,
        sort: Option<(fswarden_domain::services::entry_store::SortAttr, SortOrder)>,
        opts: IterOpts,
        last_sort_time: &mut i64,
        page_count: &mut u64,
        total_count: &mut u64,
    ) -> PassStatus {
        let ctx = self.run_ctx();
        let pass_snapshot = self.queue.stats();
        let mut pushed = Counters::ZERO;
        let mut st = PassStatus::Limit;

        loop {
            if self.aborted() || self.stopping() {
                info!(
                    policy = self.descr.name.as_str(),
                    "policy run {}, stop enqueuing requests",
                    if self.aborted() { "aborted" } else { "stopping" }
                );
                st = if self.aborted() { PassStatus::Aborted } else { PassStatus::Eol };
                break;
            }

            let next = match it.next_entry() {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "error getting next entry of iterator");
                    st = PassStatus::Error;
                    break;
                }
            };

            let (id, attrs) = match next {
                Some(pair) => pair,
                None => {
                    // end of page
                    *total_count += *page_count;
                    let partial_page = *page_count == 0
                        || opts.list_count_max == 0
                        || *page_count < opts.list_count_max;
                    if partial_page {
                        debug!(total = *total_count, "end of list");
                        st = PassStatus::Eol;
                        break;
                    }

                    if ctx.config.lru_sort_attr.is_some()
                        && heuristic_end_of_list(
                            &ctx,
                            &self.descr,
                            self.ignore_policies(),
                            *last_sort_time,
                        )
                    {
                        st = PassStatus::Eol;
                        break;
                    }

                    // wait out in-flight entries so re-listing cannot
                    // return them before their update lands
                    self.queue.wait_idle();

                    if !self.descr.manage_deleted {
                        let start = self.progress.lock().policy_start;
                        filter_replace(
                            filter,
                            FilterAttr::Std(StdAttr::MdUpdate),
                            FilterOp::Lt,
                            FilterValue::Num(start),
                        );
                    }
                    if let Some((sort_attr, _)) = sort {
                        filter_replace(
                            filter,
                            sort_filter_attr(sort_attr),
                            FilterOp::Ge,
                            FilterValue::Num(*last_sort_time),
                        );
                        debug!(
                            limit = opts.list_count_max,
                            bound = *last_sort_time,
                            "performing new candidate request"
                        );
                    }

                    *page_count = 0;
                    match self.open_iter(filter, sort, opts) {
                        Ok(new_it) => *it = new_it,
                        Err(e) => {
                            error!(error = %e, "error retrieving candidate list, run cancelled");
                            st = PassStatus::Error;
                            break;
                        }
                    }
                    continue;
                }
            };

            *page_count += 1;

            if let Some(sort_attr) = ctx.config.lru_sort_attr {
                if let Some(v) = sort_attr.value_of(&attrs) {
                    *last_sort_time = v;
                }
            }

            let amount = entry_amount(&params.target, &attrs);
            if matches!(params.target, RunTarget::Ost(_) | RunTarget::Pool(_)) && amount.targeted == 0 {
                // nothing of this entry lives on the targeted unit
                continue;
            }

            if self
                .queue
                .insert(QueueItem {
                    id,
                    attrs,
                    targeted: amount.targeted,
                })
                .is_err()
            {
                st = PassStatus::Error;
                break;
            }
            pushed += amount;

            if self.check_queue_limit(&pushed, &pass_snapshot, &params.target_ctr) {
                st = PassStatus::Limit;
                break;
            }
        }

        // drain the queue before closing the pass
        self.queue.wait_idle();
        self.update_pass_stats(&pass_snapshot);
        st
    }

    /// Samples worker feedback: stop filling when the achieved (or
    /// potentially achieved) amounts reach the target, waiting adaptively
    /// while the in-flight amount could still tip the decision.
    fn check_queue_limit(
        &self,
        pushed: &Counters,
        pass_snapshot: &QueueStats,
        target: &Counters,
    ) -> bool {
        loop {
            let delta = self.queue.stats().since(pass_snapshot);
            let acked = delta.acked();

            let in_flight = Counters {
                count: pushed.count.saturating_sub(acked),
                vol: pushed.vol.saturating_sub(delta.ok.vol + delta.nok.vol),
                blocks: pushed.blocks.saturating_sub(delta.ok.blocks + delta.nok.blocks),
                targeted: pushed
                    .targeted
                    .saturating_sub(delta.ok.targeted + delta.nok.targeted),
            };

            let (prior_ctr, prior_errors) = {
                let p = self.progress.lock();
                (p.action_ctr, p.errors)
            };
            let total_ok = delta.ok + prior_ctr;
            let errors = delta.errors() + prior_errors;

            if self.check_limit(&total_ok, errors, target) {
                // stop the pass: entries still queued are acknowledged
                // as not scheduled instead of being acted on
                self.stopping.store(true, Ordering::Release);
                return true;
            }

            if in_flight.count == 0 {
                return false;
            }

            let potential = total_ok + in_flight;
            if self.check_limit(&potential, errors, target) {
                let processed = delta.acked();
                let delay = self.adaptive_check_delay(processed, in_flight.count);
                debug!(
                    ok = total_ok.count,
                    in_flight = in_flight.count,
                    delay_ms = delay.as_millis() as u64,
                    "limit potentially reached, waiting before re-checking"
                );
                std::thread::sleep(delay);
                continue;
            }
            return false;
        }
    }

    /// Stop conditions: target reached, or error-rate suspension.
    fn check_limit(&self, ok_ctr: &Counters, errors: u64, target: &Counters) -> bool {
        let ctx = self.run_ctx();
        if self.no_limit() {
            return false;
        }

        let mut limit = *target;
        if ctx.config.max_action_count > 0
            && (limit.count == 0 || limit.count > ctx.config.max_action_count)
        {
            limit.count = ctx.config.max_action_count;
        }
        if ctx.config.max_action_volume > 0
            && (limit.vol == 0 || limit.vol > ctx.config.max_action_volume)
        {
            limit.vol = ctx.config.max_action_volume;
        }

        if ok_ctr.reached(&limit) {
            return true;
        }

        let total = ok_ctr.count + errors;
        if total == 0 {
            return false;
        }
        if ctx.config.suspend_error_pct > 0.0
            && ctx.config.suspend_error_min > 0
            && errors >= ctx.config.suspend_error_min
        {
            let pct = 100.0 * errors as f64 / total as f64;
            if pct >= ctx.config.suspend_error_pct {
                info!(
                    policy = self.descr.name.as_str(),
                    errors,
                    rate = pct,
                    "error rate too high, suspending policy run"
                );
                return true;
            }
        }
        false
    }

    /// 10% of the projected time to drain the in-flight entries, clamped
    /// to [10ms, 1s].
    fn adaptive_check_delay(&self, processed: u64, in_flight: u64) -> Duration {
        let spent = self
            .progress
            .lock()
            .run_begin
            .map(|b| b.elapsed())
            .unwrap_or_else(|| Duration::from_millis(100));
        let spent_us = spent.as_micros().max(100_000) as u64;

        let delay_us = if processed > 0 {
            let us_per_entry = spent_us / processed;
            (us_per_entry * in_flight) / 10
        } else {
            spent_us / 10
        };

        Duration::from_micros(delay_us.clamp(10_000, 1_000_000))
    }

    fn update_pass_stats(&self, pass_snapshot: &QueueStats) {
        let delta = self.queue.stats().since(pass_snapshot);
        let mut p = self.progress.lock();
        p.action_ctr += delta.ok;
        p.errors += delta.errors();
        p.skipped += delta.skipped();
    }

    fn report_progress(&self) {
        let ctx = self.run_ctx();
        let now = ctx.now();
        let mut p = self.progress.lock();
        if now - p.last_report < ctx.config.report_interval_secs as i64 {
            return;
        }
        p.last_report = now;
        info!(
            policy = self.descr.name.as_str(),
            actions = p.action_ctr.count,
            volume = %Byte::from_u64(p.action_ctr.vol).get_appropriate_unit(UnitType::Binary),
            errors = p.errors,
            skipped = p.skipped,
            "policy run progress"
        );
    }

    // ----- per-entry lifecycle (worker side) -----

    fn ack(&self, status: ActionStatus, attrs: &AttrSet, targeted: u64) {
        let mut amount = entry_amount(&RunTarget::All, attrs);
        amount.targeted = targeted;
        self.queue.acknowledge(status, amount);
    }

    fn process_entry(self: &Arc<Self>, item: QueueItem) {
        let ctx = self.run_ctx();
        if self.aborted() || self.stopping() {
            debug!(policy = self.descr.name.as_str(), "skipping pending request");
            let status = if self.aborted() { ActionStatus::Abort } else { ActionStatus::NotScheduled };
            self.ack(status, &item.attrs, item.targeted);
            return;
        }

        // with schedulers this is a pre-match; otherwise fold pre/post
        // into the strictest one
        let method = if self.scheds.is_empty() {
            ctx.config.pre_sched_match.max(ctx.config.post_sched_match)
        } else {
            ctx.config.pre_sched_match
        };

        let mut ectx = match self.refresh_and_match(item, method) {
            Ok(ectx) => ectx,
            Err((status, item)) => {
                self.ack(status, &item.attrs, item.targeted);
                return;
            }
        };

        // track the smallest eligible sort value for the next run
        if let Some(sort) = ctx.config.lru_sort_attr {
            if let Some(v) = sort.value_of(&ectx.item.attrs) {
                let mut p = self.progress.lock();
                if p.first_eligible.map(|cur| v < cur).unwrap_or(true) {
                    p.first_eligible = Some(v);
                }
                ectx.time_save = Some(v);
            }
        }

        // build and substitute action parameters
        let rule = &self.descr.rules.rules[ectx.rule_idx];
        let class = ectx
            .fileclass
            .as_deref()
            .and_then(|n| self.descr.fileclasses.by_name(n));
        let smi = self.descr.status_manager.and_then(|i| ctx.registry.by_index(i));
        match build_action_params(
            &self.descr.name,
            &self.descr.default_action_params,
            &self.trigger_params.lock(),
            rule,
            class,
            &ectx.item.id,
            &ectx.fresh_attrs,
            &ctx.registry,
            smi,
            ctx.fs.fsname(),
            &ctx.fs.root().to_string_lossy(),
            &ctx.cfg_path,
        ) {
            Ok(params) => ectx.params = params,
            Err(e) => {
                warn!(id = %ectx.item.id, error = %e, "failed to build action parameters");
                if !self.descr.manage_deleted {
                    update_entry(&ctx, &ectx.item.id, &ectx.fresh_attrs);
                }
                self.ack(ActionStatus::Error, &ectx.item.attrs, ectx.item.targeted);
                return;
            }
        }

        ectx.prev_attrs = ectx.fresh_attrs.clone();

        if self.scheds.is_empty() {
            let rc = self.policy_action(&mut ectx);
            self.action_fini(rc, ectx);
            return;
        }

        ectx.curr_sched = 0;
        self.push_to_sched(ectx);
    }

    fn push_to_sched(self: &Arc<Self>, ectx: EntryCtx) {
        let idx = ectx.curr_sched;
        let me = self.clone();
        let item = SchedItem {
            id: ectx.item.id,
            attrs: Arc::new(ectx.fresh_attrs.clone()),
            callback: Box::new(move |st| me.run_sched_cb(ectx, st)),
        };
        if let Err(item_back) = self.scheds[idx].push(item) {
            // scheduler already terminated this run
            (item_back.callback)(SchedStatus::SkipEntry);
        }
    }

    /// Scheduler-callback path: advance through the stack, then re-check
    /// and run the action after the last scheduler.
    fn run_sched_cb(self: &Arc<Self>, mut ectx: EntryCtx, st: SchedStatus) {
        let ctx = self.run_ctx();
        debug!(
            policy = self.descr.name.as_str(),
            sched = ectx.curr_sched,
            status = ?st,
            "received scheduler callback"
        );

        let mut flush_up_to: Option<usize> = None;

        match st {
            SchedStatus::Ok => {
                ectx.curr_sched += 1;
                if ectx.curr_sched == self.scheds.len() {
                    // final rule check before running the action
                    if let Err(status) = self.refresh_into(&mut ectx, ctx.config.post_sched_match) {
                        self.ack(status, &ectx.item.attrs, ectx.item.targeted);
                        return;
                    }
                    let rc = self.policy_action(&mut ectx);
                    self.action_fini(rc, ectx);
                    return;
                }
                self.push_to_sched(ectx);
                return;
            }
            SchedStatus::SkipEntry => {
                // fall through to the not-scheduled finalization
            }
            SchedStatus::StopRun => {
                self.stopping.store(true, Ordering::Release);
                flush_up_to = Some(ectx.curr_sched.saturating_sub(1));
            }
            SchedStatus::KillRun => {
                self.stopping.store(true, Ordering::Release);
                flush_up_to = Some(self.scheds.len().saturating_sub(1));
            }
            SchedStatus::Error => {
                self.ack(ActionStatus::Error, &ectx.item.attrs, ectx.item.targeted);
                return;
            }
        }

        if !self.descr.manage_deleted {
            update_entry(&ctx, &ectx.item.id, &ectx.fresh_attrs);
        }
        self.ack(ActionStatus::NotScheduled, &ectx.item.attrs, ectx.item.targeted);

        if let Some(last) = flush_up_to {
            if st == SchedStatus::StopRun && ectx.curr_sched == 0 {
                // stop from the first scheduler: nothing earlier to flush
                return;
            }
            debug!(policy = self.descr.name.as_str(), last, "flushing schedulers");
            for i in 0..=last.min(self.scheds.len().saturating_sub(1)) {
                self.scheds[i].flush(SchedStatus::SkipEntry);
            }
        }
    }

    /// First full revalidation of a queued entry.
    fn refresh_and_match(
        self: &Arc<Self>,
        item: QueueItem,
        method: MatchSource,
    ) -> Result<EntryCtx, (ActionStatus, QueueItem)> {
        let mut ectx = EntryCtx {
            item,
            fresh_attrs: AttrSet::new(),
            prev_attrs: AttrSet::new(),
            rule_idx: 0,
            fileclass: None,
            params: ActionParams::new(),
            time_save: None,
            curr_sched: 0,
        };
        match self.refresh_into(&mut ectx, method) {
            Ok(()) => Ok(ectx),
            Err(status) => Err((status, ectx.item)),
        }
    }

    /// Refresh-and-match, reusable for the post-scheduling re-check.
    fn refresh_into(&self, ectx: &mut EntryCtx, method: MatchSource) -> Result<(), ActionStatus> {
        let ctx = &self.run_ctx();
        let descr = &self.descr;
        let now = ctx.now();

        ectx.fresh_attrs = AttrSet::new();

        if !descr.manage_deleted {
            check_entry(ctx, descr, &ectx.item, &mut ectx.fresh_attrs, method)?;
        }
        // complete with missing attrs from the candidate row
        let db_attrs = ectx.item.attrs.clone();
        ectx.fresh_attrs.merge_missing(&db_attrs);
        // from here, the entry is assumed valid
        ectx.fresh_attrs.set_invalid(false);

        // scope re-check on fresh attributes
        match descr.scope.matches(&ectx.fresh_attrs, &ctx.registry, now) {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %ectx.item.id, policy = descr.name.as_str(), "entry out of policy scope");
                if !descr.manage_deleted {
                    update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                }
                return Err(ActionStatus::OutOfScope);
            }
            Err(_) if descr.manage_deleted => {
                // deleted entries legitimately miss attributes
            }
            Err(_) => {
                warn!(id = %ectx.item.id, "cannot determine if entry matches the policy scope, skipping");
                update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                return Err(ActionStatus::MissingMd);
            }
        }

        if self.ignore_policies() || method == MatchSource::None {
            // pick the first applicable rule without conditions
            ectx.rule_idx = 0;
            ectx.fileclass = None;
            return if descr.rules.rules.is_empty() {
                Err(ActionStatus::NoPolicy)
            } else {
                Ok(())
            };
        }

        // whitelist + rule selection
        let (rule_idx, class) = match descr.rules.match_entry(
            &ectx.fresh_attrs,
            &descr.fileclasses,
            &ctx.registry,
            now,
        ) {
            Ok(RuleMatch::Ignored) => {
                debug!(id = %ectx.item.id, "entry matches an ignore rule");
                if !descr.manage_deleted {
                    update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                }
                return Err(ActionStatus::Whitelisted);
            }
            Ok(RuleMatch::NoMatch) => {
                debug!(id = %ectx.item.id, "entry matches no policy rule");
                if !descr.manage_deleted {
                    update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                }
                return Err(ActionStatus::NoPolicy);
            }
            Ok(RuleMatch::Rule(rule, class)) => {
                let idx = descr
                    .rules
                    .rules
                    .iter()
                    .position(|r| r.name == rule.name)
                    .unwrap_or(0);
                (idx, class.map(|c| c.to_string()))
            }
            Err(_) => {
                if !descr.manage_deleted {
                    update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                }
                return Err(ActionStatus::MissingMd);
            }
        };

        // time-ordering invariant
        check_entry_times(ctx, descr, &ectx.item, &ectx.fresh_attrs)?;

        // re-evaluate the winning rule's condition on fresh attributes
        if let Some(cond) = &descr.rules.rules[rule_idx].condition {
            match cond.matches(&ectx.fresh_attrs, &ctx.registry, now) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(id = %ectx.item.id, rule = descr.rules.rules[rule_idx].name.as_str(),
                           "entry no longer matches the rule condition");
                    if !descr.manage_deleted {
                        update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                    }
                    return Err(ActionStatus::Whitelisted);
                }
                Err(_) => {
                    if !descr.manage_deleted {
                        update_entry(ctx, &ectx.item.id, &ectx.fresh_attrs);
                    }
                    return Err(ActionStatus::MissingMd);
                }
            }
        }

        ectx.rule_idx = rule_idx;
        ectx.fileclass = class;
        Ok(())
    }

    /// Executes the policy action, through the status manager's executor
    /// when it has one.
    fn policy_action(&self, ectx: &mut EntryCtx) -> Result<PostAction, EngineError> {
        let ctx = self.run_ctx();
        let descr = &self.descr;
        let action = &descr.default_action;
        let id = ectx.item.id;

        info!(
            policy = descr.name.as_str(),
            id = %id,
            path = ectx.fresh_attrs.fullpath().unwrap_or("?"),
            "executing policy action"
        );

        let smi = descr
            .status_manager
            .and_then(|i| ctx.registry.by_index(i));

        if let Some(inst) = smi {
            if let ActionHook::Executor(exec) = &inst.sm().action_hook {
                let exec = exec.clone();
                let mut call = |id: &EntryId,
                                attrs: &mut AttrSet,
                                params: &ActionParams,
                                out: &mut String|
                 -> Result<PostAction, EngineError> {
                    self.run_action(action, id, attrs, params, out, ectx.rule_idx, ectx.fileclass.as_deref())
                };
                return exec(inst, &mut call, &id, &mut ectx.fresh_attrs, &ectx.params);
            }
        }

        let mut out = String::new();
        let result = self.run_action(
            action,
            &id,
            &mut ectx.fresh_attrs,
            &ectx.params,
            &mut out,
            ectx.rule_idx,
            ectx.fileclass.as_deref(),
        );

        // thin post-action hook, when the manager has one
        if let Some(inst) = smi {
            if let ActionHook::Cb(cb) = &inst.sm().action_hook {
                let rc = match &result {
                    Ok(_) => 0,
                    Err(EngineError::ActionFailed { rc, .. }) => *rc,
                    Err(_) => -1,
                };
                if let Err(e) = cb(inst, rc, &id, &mut ectx.fresh_attrs) {
                    warn!(id = %id, error = %e, "action callback failed");
                }
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_action(
        &self,
        action: &PolicyAction,
        id: &EntryId,
        attrs: &mut AttrSet,
        params: &ActionParams,
        out: &mut String,
        rule_idx: usize,
        fileclass: Option<&str>,
    ) -> Result<PostAction, EngineError> {
        match action {
            PolicyAction::Unset => {
                warn!(policy = self.descr.name.as_str(), "no action configured");
                Ok(PostAction::Update)
            }
            PolicyAction::None => Ok(PostAction::Update),
            PolicyAction::Function { name, func } => {
                debug!(%id, action = name.as_str(), "running action function");
                func(id, attrs, params, out)
            }
            PolicyAction::Command(argv) => {
                let rctx = self.run_ctx();
                let rule_name = self.descr.rules.rules.get(rule_idx).map(|r| r.name.as_str());
                let fspath = rctx.fs.root().to_string_lossy().into_owned();
                let ctx = SubstContext {
                    id,
                    attrs,
                    params,
                    registry: &rctx.registry,
                    smi: self
                        .descr
                        .status_manager
                        .and_then(|i| rctx.registry.by_index(i)),
                    fsname: rctx.fs.fsname(),
                    fspath: &fspath,
                    cfg_path: &rctx.cfg_path,
                    rule: rule_name,
                    fileclass,
                };
                let argv = subst_argv(argv, &ctx)?;
                if argv.is_empty() {
                    return Err(EngineError::invalid_config("empty action command"));
                }
                debug!(%id, cmd = ?argv, "running action command");
                let output = std::process::Command::new(&argv[0])
                    .args(&argv[1..])
                    .output()
                    .map_err(|e| EngineError::action_failed(-1, format!("cannot execute '{}': {}", argv[0], e)))?;
                out.push_str(&String::from_utf8_lossy(&output.stdout));
                if !output.status.success() {
                    let rc = output.status.code().unwrap_or(-1);
                    return Err(EngineError::action_failed(rc, format!("command '{}' failed", argv[0])));
                }
                // external commands cannot advise: default to update
                Ok(PostAction::Update)
            }
        }
    }

    /// Finalizes an entry after its action: store bookkeeping, report
    /// line, queue acknowledgment.
    fn action_fini(&self, rc: Result<PostAction, EngineError>, ectx: EntryCtx) {
        let ctx = &self.run_ctx();
        let descr = &self.descr;
        let id = ectx.item.id;

        match rc {
            Err(e) => {
                debug!(%id, error = %e, "error applying action on entry");
                // update so the entry is not retried immediately
                if !descr.manage_deleted {
                    update_entry(ctx, &id, &ectx.fresh_attrs);
                }
                self.ack(ActionStatus::Error, &ectx.item.attrs, ectx.item.targeted);
            }
            Ok(post) => {
                self.log_action_success(&ectx);

                if descr.manage_deleted {
                    if matches!(post, PostAction::RmOne | PostAction::RmAll) {
                        // purge the tombstone
                        if let Err(e) = ctx.store.soft_remove_discard(&id) {
                            error!(%id, error = %e, "error discarding tombstone");
                        }
                    }
                } else {
                    match post {
                        PostAction::None => {}
                        PostAction::Update => update_entry(ctx, &id, &ectx.fresh_attrs),
                        PostAction::RmOne => {
                            let last = ectx.prev_attrs.nlink().map(|n| n <= 1).unwrap_or(false);
                            // removal keys come from the candidate row
                            if let Err(e) = ctx.store.remove(&id, &ectx.item.attrs, last) {
                                error!(%id, error = %e, "error removing entry from store");
                            }
                        }
                        PostAction::RmAll => {
                            if let Err(e) = ctx.store.remove(&id, &ectx.item.attrs, true) {
                                error!(%id, error = %e, "error removing entry from store");
                            }
                        }
                    }
                }

                self.ack(ActionStatus::Ok, &ectx.fresh_attrs, ectx.item.targeted);
            }
        }
    }

    fn log_action_success(&self, ectx: &EntryCtx) {
        let ctx = self.run_ctx();
        if !ctx.config.report_actions {
            return;
        }
        let rule = self
            .descr
            .rules
            .rules
            .get(ectx.rule_idx)
            .map(|r| r.name.as_str())
            .unwrap_or("?");
        let age = ectx
            .time_save
            .map(|t| ctx.now().saturating_sub(t))
            .unwrap_or(0);
        info!(
            policy = self.descr.name.as_str(),
            path = ectx.prev_attrs.fullpath().unwrap_or("?"),
            rule,
            fileclass = ectx.fileclass.as_deref().unwrap_or(""),
            size = ectx.prev_attrs.size().unwrap_or(0),
            age_secs = age,
            "action success"
        );
    }
}

impl Drop for PolicyRun {
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn sort_filter_attr(sort: fswarden_domain::services::entry_store::SortAttr) -> FilterAttr {
    use fswarden_domain::services::entry_store::SortAttr;
    match sort {
        SortAttr::LastAccess => FilterAttr::Std(StdAttr::LastAccess),
        SortAttr::LastMod => FilterAttr::Std(StdAttr::LastMod),
        SortAttr::CreationTime => FilterAttr::Std(StdAttr::CreationTime),
        SortAttr::RmTime => FilterAttr::Std(StdAttr::RmTime),
        SortAttr::Info(slot) => FilterAttr::Info(slot),
    }
}

/// Replaces (or adds) the filter conjunct on `attr` with the given
/// comparison; always NULL-tolerant, as re-listing bounds must not hide
/// rows missing the column.
fn filter_replace(filter: &mut StoreFilter, attr: FilterAttr, op: FilterOp, value: FilterValue) {
    filter.items.retain(|i| i.attr != attr);
    let mut item = FilterItem::new(attr, op, value);
    item.allow_null = true;
    filter.push(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_replace_swaps_in_place() {
        let mut f = StoreFilter::new();
        f.push(FilterItem::std(StdAttr::Size, FilterOp::Gt, FilterValue::Num(5)));
        filter_replace(
            &mut f,
            FilterAttr::Std(StdAttr::MdUpdate),
            FilterOp::Lt,
            FilterValue::Num(100),
        );
        filter_replace(
            &mut f,
            FilterAttr::Std(StdAttr::MdUpdate),
            FilterOp::Lt,
            FilterValue::Num(200),
        );
        assert_eq!(f.items.len(), 2);
        let md = f
            .items
            .iter()
            .find(|i| i.attr == FilterAttr::Std(StdAttr::MdUpdate))
            .unwrap();
        assert_eq!(md.value, FilterValue::Num(200));
        assert!(md.allow_null);
    }
}
