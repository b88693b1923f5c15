// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Action Scheduler Port
//!
//! A policy may declare a stack of *schedulers*: admission controllers
//! sitting between candidate selection and action execution. Each entry is
//! offered to scheduler 0; a scheduler that accepts it will invoke the
//! entry's callback when (and if) the entry should proceed, at which point
//! the run engine offers it to the next scheduler in the stack, and after
//! the last one, runs the action.
//!
//! ## Decisions
//!
//! [`ActionScheduler::schedule`] either consumes the item (the scheduler
//! now owes it a callback) or hands it back with a verdict:
//!
//! - `Delay` — nothing wrong with the entry; retry the same item after the
//!   configured delay
//! - `SkipEntry` — drop this entry for the current run
//! - `StopRun` — stop submitting; flush schedulers *before* this one
//! - `KillRun` — stop submitting; flush every scheduler
//!
//! Implementations must be thread-safe: the engine calls `schedule` from a
//! per-scheduler feed thread while completion callbacks may fire from
//! arbitrary threads.

use crate::entities::attr_set::AttrSet;
use crate::entities::entry_id::EntryId;
use crate::error::EngineError;
use std::sync::Arc;

/// Status delivered to an item's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedStatus {
    /// Proceed to the next scheduler (or to the action).
    Ok,
    /// The entry is not acted on in this run.
    SkipEntry,
    /// The run is stopping; the entry was flushed.
    StopRun,
    /// The run is being killed; the entry was flushed.
    KillRun,
    /// Scheduler-side error.
    Error,
}

/// Completion callback carried by a scheduled item.
pub type SchedCallback = Box<dyn FnOnce(SchedStatus) + Send>;

/// An entry offered to a scheduler.
pub struct SchedItem {
    pub id: EntryId,
    pub attrs: Arc<AttrSet>,
    pub callback: SchedCallback,
}

impl std::fmt::Debug for SchedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedItem").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Verdict when a scheduler does not consume the offered item.
#[derive(Debug)]
pub enum SchedDecision {
    /// Item consumed; the scheduler will invoke its callback.
    Accepted,
    /// Retry the same item after `reschedule_delay_ms`.
    Delay(SchedItem),
    /// Skip this entry for the current run.
    SkipEntry(SchedItem),
    /// Stop the run; flush earlier schedulers.
    StopRun(SchedItem),
    /// Kill the run; flush all schedulers.
    KillRun(SchedItem),
}

/// An admission controller in the scheduler stack.
pub trait ActionScheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Drops internal state between policy runs (and after a flush).
    fn reset(&self) -> Result<(), EngineError>;

    /// Offers one entry. See [`SchedDecision`] for the protocol.
    fn schedule(&self, item: SchedItem) -> SchedDecision;
}
