// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry-Processor Runtime
//!
//! The worker pool driving operations through the stage table, with the
//! scheduling constraints of the design:
//!
//! - **Bounded capacity** — producers block once `queue_limit` operations
//!   are in flight; backpressure, not buffering.
//! - **Identity constraint** — at most one operation per entry identity
//!   past the get-info-DB stage; later arrivals park on a per-identity
//!   slot and resume when the holder leaves the pipeline.
//! - **Record-order clear gate** — the changelog-clear stage acknowledges
//!   records in strictly increasing record-index order over the still
//!   outstanding records (dropped records unblock their successors).
//! - **Pipeline-order GC** — the end-of-scan stage runs an operation only
//!   once every earlier submission has left the pipeline, giving the
//!   mass removal a flushed view.
//! - **Batching** — at the DB-apply stage, a worker drains consecutive
//!   compatible operations into one atomic batched write.
//!
//! Workers prefer later stages, draining the pipeline before admitting
//! more upstream work.

use crate::pipeline::handlers::{self, dbop_is_batchable, NextStep};
use crate::pipeline::op::PipelineOp;
use crate::pipeline::stages::{
    std_stages, StageConcurrency, StageDef, STAGE_CHGLOG_CLR, STAGE_DB_APPLY, STAGE_GET_ID,
    STAGE_GET_INFO_DB, STAGE_RM_OLD_ENTRIES,
};
use crate::pipeline::PipelineCtx;
use fswarden_domain::entities::EntryId;
use fswarden_domain::error::EngineError;
use fswarden_domain::value_objects::AttrMask;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

#[derive(Default)]
struct ConstraintSlot {
    held: bool,
    parked: VecDeque<Box<PipelineOp>>,
}

struct State {
    queues: Vec<VecDeque<Box<PipelineOp>>>,
    active: Vec<usize>,
    in_flight: usize,
    constraint: HashMap<EntryId, ConstraintSlot>,
    /// Outstanding changelog record indices.
    clear_gate: BTreeSet<u64>,
    /// Submission sequence numbers of operations still in the pipeline.
    alive: BTreeSet<u64>,
    next_seq: u64,
    stopping: bool,
}

struct Shared {
    ctx: PipelineCtx,
    stages: Vec<StageDef>,
    state: Mutex<State>,
    work_ready: Condvar,
    space_ready: Condvar,
    idle: Condvar,
}

enum Work {
    Single(Box<PipelineOp>),
    Batch(Vec<Box<PipelineOp>>),
}

/// The entry-processor: a fixed worker pool over the standard stage table.
pub struct EntryProcessor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EntryProcessor {
    /// Starts the worker pool.
    pub fn start(ctx: PipelineCtx) -> Result<EntryProcessor, EngineError> {
        let nb_threads = ctx.cfg.nb_threads.max(1);
        let stages = std_stages(ctx.store.single_writer());
        let stage_count = stages.len();

        let shared = Arc::new(Shared {
            ctx,
            stages,
            state: Mutex::new(State {
                queues: (0..stage_count).map(|_| VecDeque::new()).collect(),
                active: vec![0; stage_count],
                in_flight: 0,
                constraint: HashMap::new(),
                clear_gate: BTreeSet::new(),
                alive: BTreeSet::new(),
                next_seq: 0,
                stopping: false,
            }),
            work_ready: Condvar::new(),
            space_ready: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(nb_threads);
        for i in 0..nb_threads {
            let sh = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("entryproc-{}", i))
                .spawn(move || worker_loop(sh))
                .map_err(|e| EngineError::internal_error(format!("cannot spawn worker: {}", e)))?;
            workers.push(handle);
        }

        Ok(EntryProcessor {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Submits a scan or changelog operation. Blocks while the pipeline
    /// is at capacity.
    pub fn push(&self, op: PipelineOp) -> Result<(), EngineError> {
        let stage = if op.entry_id.is_none() || op.get_fid_from_db {
            STAGE_GET_ID
        } else {
            STAGE_GET_INFO_DB
        };
        self.push_at(op, stage)
    }

    /// Submits the end-of-scan GC operation; it executes once everything
    /// submitted before it has drained.
    pub fn push_gc(&self, op: PipelineOp) -> Result<(), EngineError> {
        self.push_at(op, STAGE_RM_OLD_ENTRIES)
    }

    fn push_at(&self, mut op: PipelineOp, stage: usize) -> Result<(), EngineError> {
        let sh = &self.shared;
        let mut st = sh.state.lock();

        while st.in_flight >= sh.ctx.cfg.queue_limit && !st.stopping {
            sh.space_ready.wait(&mut st);
        }
        if st.stopping {
            return Err(EngineError::cancelled("entry processor is shutting down"));
        }

        op.seq = st.next_seq;
        st.next_seq += 1;
        st.alive.insert(op.seq);
        st.in_flight += 1;
        if let Some(rec) = op.record() {
            st.clear_gate.insert(rec.index);
        }

        enqueue_locked(sh, &mut st, Box::new(op), stage);
        sh.work_ready.notify_one();
        Ok(())
    }

    /// Waits until every submitted operation has left the pipeline.
    pub fn flush(&self) {
        let sh = &self.shared;
        let mut st = sh.state.lock();
        while st.in_flight > 0 {
            sh.idle.wait(&mut st);
        }
    }

    /// Operations currently in the pipeline.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    /// Stops the pool. Queued operations are abandoned; callers wanting a
    /// clean drain call [`EntryProcessor::flush`] first.
    pub fn shutdown(&self) {
        {
            let mut st = self.shared.state.lock();
            st.stopping = true;
        }
        self.shared.work_ready.notify_all();
        self.shared.space_ready.notify_all();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("entry-processor worker panicked");
            }
        }
    }
}

impl Drop for EntryProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queues the operation at `stage`, parking it when the identity
/// constraint is already held by another operation.
fn enqueue_locked(sh: &Shared, st: &mut State, mut op: Box<PipelineOp>, stage: usize) {
    op.stage = stage;

    if sh.stages[stage].id_constraint && !op.constraint_held {
        if let Some(id) = op.entry_id {
            let slot = st.constraint.entry(id).or_default();
            if slot.held {
                debug!(%id, seq = op.seq, "parking operation on identity constraint");
                slot.parked.push_back(op);
                return;
            }
            slot.held = true;
            op.constraint_held = true;
        }
    }

    st.queues[stage].push_back(op);
}

/// Removes a finished operation from every tracking structure and wakes
/// whoever waits on capacity, idleness, or the constraint slot.
fn finalize_locked(sh: &Shared, st: &mut State, op: Box<PipelineOp>) {
    if op.constraint_held {
        if let Some(id) = op.entry_id {
            if let Some(slot) = st.constraint.get_mut(&id) {
                slot.held = false;
                if let Some(mut parked) = slot.parked.pop_front() {
                    slot.held = true;
                    parked.constraint_held = true;
                    let stage = parked.stage;
                    st.queues[stage].push_back(parked);
                }
                if !slot.held && slot.parked.is_empty() {
                    st.constraint.remove(&id);
                }
            }
        }
    }

    if let Some(rec) = op.record() {
        st.clear_gate.remove(&rec.index);
    }
    st.alive.remove(&op.seq);
    st.in_flight -= 1;

    sh.space_ready.notify_one();
    if st.in_flight == 0 {
        sh.idle.notify_all();
    }
}

/// Picks the next ready work item, preferring later stages.
fn pick_work(sh: &Shared, st: &mut State) -> Option<Work> {
    for s in (0..sh.stages.len()).rev() {
        if st.queues[s].is_empty() {
            continue;
        }

        match sh.stages[s].concurrency {
            StageConcurrency::Sequential => {
                if st.active[s] > 0 {
                    continue;
                }
                let pos = if s == STAGE_CHGLOG_CLR {
                    // only the op holding the smallest outstanding record
                    // index may commit
                    let min = st.clear_gate.iter().next().copied();
                    st.queues[s].iter().position(|o| {
                        match o.record() {
                            Some(r) => Some(r.index) == min,
                            None => true,
                        }
                    })
                } else {
                    // pipeline order: only the oldest live submission runs
                    let min_alive = st.alive.iter().next().copied();
                    match st.queues[s].front() {
                        Some(front) if Some(front.seq) == min_alive => Some(0),
                        _ => None,
                    }
                };
                if let Some(i) = pos {
                    let op = st.queues[s].remove(i).expect("indexed op exists");
                    st.active[s] += 1;
                    return Some(Work::Single(op));
                }
            }
            StageConcurrency::MaxThreads(n) => {
                if st.active[s] >= n {
                    continue;
                }
                let op = st.queues[s].pop_front().expect("non-empty queue");
                st.active[s] += 1;
                return Some(maybe_batch(sh, st, s, op));
            }
            StageConcurrency::Parallel => {
                let op = st.queues[s].pop_front().expect("non-empty queue");
                st.active[s] += 1;
                return Some(maybe_batch(sh, st, s, op));
            }
        }
    }
    None
}

/// At the DB-apply stage, drains consecutive compatible operations into
/// one batch.
fn maybe_batch(sh: &Shared, st: &mut State, stage: usize, first: Box<PipelineOp>) -> Work {
    if stage != STAGE_DB_APPLY || !first.db_op_type.is_batchable() {
        return Work::Single(first);
    }

    let mut full_mask: AttrMask = first.fs_attrs.mask();
    let mut batch = vec![first];

    while batch.len() < sh.ctx.cfg.max_batch_size {
        let compatible = match st.queues[stage].front() {
            Some(next) => dbop_is_batchable(&sh.ctx, &batch[0], next, &mut full_mask),
            None => false,
        };
        if !compatible {
            break;
        }
        let next = st.queues[stage].pop_front().expect("checked front");
        batch.push(next);
    }

    if batch.len() == 1 {
        Work::Single(batch.pop().expect("single op"))
    } else {
        Work::Batch(batch)
    }
}

fn worker_loop(sh: Arc<Shared>) {
    loop {
        let work = {
            let mut st = sh.state.lock();
            loop {
                if st.stopping {
                    return;
                }
                if let Some(work) = pick_work(&sh, &mut st) {
                    break work;
                }
                sh.work_ready.wait(&mut st);
            }
        };

        match work {
            Work::Single(mut op) => {
                let stage = op.stage;
                let next = handlers::run_stage(&sh.ctx, &mut op);
                ack(&sh, stage, vec![(op, next)]);
            }
            Work::Batch(mut ops) => {
                let stage = ops[0].stage;
                handlers::db_batch_apply(&sh.ctx, &mut ops);
                // route every member: record-driven ops go through the
                // clear stage, the rest leave the pipeline
                let routed = ops
                    .into_iter()
                    .map(|op| {
                        let next = if op.callback.is_some() {
                            NextStep::Stage(STAGE_CHGLOG_CLR)
                        } else {
                            NextStep::Drop
                        };
                        (op, next)
                    })
                    .collect();
                ack(&sh, stage, routed);
            }
        }
    }
}

fn ack(sh: &Shared, stage: usize, routed: Vec<(Box<PipelineOp>, NextStep)>) {
    let mut st = sh.state.lock();
    st.active[stage] -= 1;
    for (op, next) in routed {
        match next {
            NextStep::Drop => finalize_locked(sh, &mut st, op),
            NextStep::Stage(s) => enqueue_locked(sh, &mut st, op, s),
        }
    }
    drop(st);
    sh.work_ready.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{MemoryStore, PosixFs};
    use crate::pipeline::{PipelineConfig, PipelineCtx};
    use fswarden_domain::entities::AttrSet;
    use fswarden_domain::rules::FileClassSet;
    use fswarden_domain::EntryStore;
    use fswarden_domain::status_manager::SmRegistry;
    use fswarden_domain::value_objects::UpdateParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ctx(store: Arc<MemoryStore>, dir: &std::path::Path) -> PipelineCtx {
        let mut reg = SmRegistry::new();
        reg.create_instance("test_policy", "basic", None).unwrap();
        reg.update_masks();
        PipelineCtx::new(
            store,
            Arc::new(PosixFs::new(dir, "testfs")),
            Arc::new(reg),
            UpdateParams::standard(),
            PipelineConfig {
                nb_threads: 4,
                ..PipelineConfig::default()
            },
            FileClassSet::default(),
        )
    }

    #[test]
    fn test_scan_file_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        std::fs::write(&file, vec![0u8; 100]).unwrap();

        let store = Arc::new(MemoryStore::new());
        let proc = EntryProcessor::start(test_ctx(store.clone(), dir.path())).unwrap();

        let mut attrs = AttrSet::new();
        attrs.set_fullpath(file.to_string_lossy());
        attrs.set_name("a");
        proc.push(PipelineOp::from_scan(attrs)).unwrap();
        proc.flush();
        proc.shutdown();

        assert_eq!(store.len(), 1);
        let (_, row) = {
            let mut cur = store
                .iterator(
                    &Default::default(),
                    None,
                    Default::default(),
                )
                .unwrap();
            cur.next_entry().unwrap().unwrap()
        };
        assert_eq!(row.size(), Some(100));
        assert!(row.creation_time().is_some());
        assert!(row.md_update().is_some());
    }

    #[test]
    fn test_gc_waits_for_earlier_ops() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("seen");
        std::fs::write(&file, b"x").unwrap();

        let store = Arc::new(MemoryStore::new());
        // a stale row the GC must collect
        let stale = fswarden_domain::EntryId::posix(1, 999, 0);
        let mut stale_attrs = AttrSet::new();
        stale_attrs.set_md_update(5);
        store.insert(&stale, &stale_attrs).unwrap();

        let proc = EntryProcessor::start(test_ctx(store.clone(), dir.path())).unwrap();

        let mut attrs = AttrSet::new();
        attrs.set_fullpath(file.to_string_lossy());
        attrs.set_name("seen");
        proc.push(PipelineOp::from_scan(attrs)).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let scan_start = chrono::Utc::now().timestamp();
        proc.push_gc(PipelineOp::gc(
            scan_start,
            true,
            false,
            None,
            Some(Box::new(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            })),
        ))
        .unwrap();

        proc.flush();
        proc.shutdown();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // the stale row is gone, the scanned row survived the epoch GC
        assert!(store.row(&stale).is_none());
        assert_eq!(store.len(), 1);
    }
}
