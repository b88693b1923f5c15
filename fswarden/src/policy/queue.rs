// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Worker Queue
//!
//! The bounded queue feeding policy-run workers, with the bookkeeping the
//! fill loop samples to enforce limits:
//!
//! - a per-outcome acknowledgment counter (one slot per
//!   [`ActionStatus`]),
//! - a feedback array accumulating successful / unsuccessful amounts
//!   (count, volume, blocks, targeted),
//! - the number of unacknowledged items, for idle waits.
//!
//! Producers block when the queue is full; consumers block on `get` until
//! an item arrives or the queue is closed.

use fswarden_domain::entities::{AttrSet, EntryId};
use fswarden_domain::value_objects::Counters;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Per-entry outcome, reported through queue acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ActionStatus {
    Ok = 0,
    /// Sort-attribute (or size) changed between selection and processing.
    Accessed,
    /// The entry moved or its identity is stale.
    Moved,
    Whitelisted,
    OutOfScope,
    /// No rule matched.
    NoPolicy,
    BadType,
    Busy,
    /// Action already done by someone else.
    Already,
    MissingMd,
    StatFailure,
    Error,
    /// Run aborted before the entry was processed.
    Abort,
    /// Run stopped; the entry was not submitted.
    NotScheduled,
}

/// Number of [`ActionStatus`] values.
pub const ACTION_STATUS_COUNT: usize = 14;

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Ok => "ok",
            ActionStatus::Accessed => "accessed",
            ActionStatus::Moved => "moved",
            ActionStatus::Whitelisted => "whitelisted",
            ActionStatus::OutOfScope => "out_of_scope",
            ActionStatus::NoPolicy => "no_policy",
            ActionStatus::BadType => "bad_type",
            ActionStatus::Busy => "busy",
            ActionStatus::Already => "already",
            ActionStatus::MissingMd => "missing_md",
            ActionStatus::StatFailure => "stat_failure",
            ActionStatus::Error => "error",
            ActionStatus::Abort => "abort",
            ActionStatus::NotScheduled => "not_scheduled",
        }
    }

    /// Outcomes that count as "skipped" in run summaries.
    pub fn is_skipped(self) -> bool {
        matches!(
            self,
            ActionStatus::Accessed
                | ActionStatus::Moved
                | ActionStatus::Whitelisted
                | ActionStatus::OutOfScope
                | ActionStatus::NoPolicy
                | ActionStatus::BadType
                | ActionStatus::Busy
                | ActionStatus::Already
                | ActionStatus::MissingMd
                | ActionStatus::Abort
                | ActionStatus::NotScheduled
        )
    }

    /// Outcomes that count as errors toward the suspension heuristic.
    pub fn is_error(self) -> bool {
        matches!(self, ActionStatus::Error | ActionStatus::StatFailure)
    }
}

/// One candidate handed to a worker.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: EntryId,
    pub attrs: AttrSet,
    /// Amount on the targeted storage unit, for targeted runs.
    pub targeted: u64,
}

/// Cumulative queue statistics, sampled by the fill loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Acknowledgments per outcome.
    pub status: [u64; ACTION_STATUS_COUNT],
    /// Successful amounts.
    pub ok: Counters,
    /// Unsuccessful amounts (skips and errors).
    pub nok: Counters,
}

impl QueueStats {
    pub fn acked(&self) -> u64 {
        self.status.iter().sum()
    }

    pub fn errors(&self) -> u64 {
        self.status[ActionStatus::Error as usize] + self.status[ActionStatus::StatFailure as usize]
    }

    pub fn skipped(&self) -> u64 {
        self.status
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let st = *i != ActionStatus::Ok as usize
                    && *i != ActionStatus::Error as usize
                    && *i != ActionStatus::StatFailure as usize;
                st
            })
            .map(|(_, v)| *v)
            .sum()
    }

    /// Delta since an earlier sample.
    pub fn since(&self, earlier: &QueueStats) -> QueueStats {
        let mut status = [0u64; ACTION_STATUS_COUNT];
        for i in 0..ACTION_STATUS_COUNT {
            status[i] = self.status[i] - earlier.status[i];
        }
        QueueStats {
            status,
            ok: Counters {
                count: self.ok.count - earlier.ok.count,
                vol: self.ok.vol - earlier.ok.vol,
                blocks: self.ok.blocks - earlier.ok.blocks,
                targeted: self.ok.targeted - earlier.ok.targeted,
            },
            nok: Counters {
                count: self.nok.count - earlier.nok.count,
                vol: self.nok.vol - earlier.nok.vol,
                blocks: self.nok.blocks - earlier.nok.blocks,
                targeted: self.nok.targeted - earlier.nok.targeted,
            },
        }
    }
}

struct QueueState {
    items: VecDeque<QueueItem>,
    /// Inserted but not yet acknowledged.
    unacked: usize,
    stats: QueueStats,
    closed: bool,
}

/// Bounded worker queue with acknowledgment bookkeeping.
pub struct EntryQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    all_acked: Condvar,
}

impl EntryQueue {
    pub fn new(capacity: usize) -> EntryQueue {
        EntryQueue {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unacked: 0,
                stats: QueueStats::default(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_acked: Condvar::new(),
        }
    }

    /// Inserts an item; blocks while the queue is full.
    pub fn insert(&self, item: QueueItem) -> Result<(), fswarden_domain::EngineError> {
        let mut st = self.state.lock();
        while st.items.len() >= self.capacity && !st.closed {
            self.not_full.wait(&mut st);
        }
        if st.closed {
            return Err(fswarden_domain::EngineError::cancelled("queue closed"));
        }
        st.items.push_back(item);
        st.unacked += 1;
        drop(st);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the next item; `None` when the queue is closed and drained.
    pub fn get(&self) -> Option<QueueItem> {
        let mut st = self.state.lock();
        loop {
            if let Some(item) = st.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if st.closed {
                return None;
            }
            self.not_empty.wait(&mut st);
        }
    }

    /// Acknowledges one processed item with its outcome and amounts.
    pub fn acknowledge(&self, status: ActionStatus, amount: Counters) {
        let mut st = self.state.lock();
        st.stats.status[status as usize] += 1;
        if status == ActionStatus::Ok {
            st.stats.ok += amount;
        } else {
            st.stats.nok += amount;
        }
        st.unacked = st.unacked.saturating_sub(1);
        if st.unacked == 0 {
            self.all_acked.notify_all();
        }
    }

    /// Current cumulative statistics.
    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats.clone()
    }

    /// Items inserted but not yet acknowledged (queued + being processed).
    pub fn unacked(&self) -> usize {
        self.state.lock().unacked
    }

    /// Blocks until every inserted item has been acknowledged.
    pub fn wait_idle(&self) {
        let mut st = self.state.lock();
        while st.unacked > 0 {
            self.all_acked.wait(&mut st);
        }
    }

    /// Closes the queue: producers fail, consumers drain then stop.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Reopens a closed queue for the next run. Statistics are kept
    /// cumulative; callers diff against snapshots.
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }
}
