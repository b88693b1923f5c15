// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy Run Engine
//!
//! A scheduler-fed worker pool that selects candidate entries through
//! ordered store queries, revalidates them against fresh attributes,
//! matches them against the policy's rule tree, and executes actions
//! under bounded concurrency with target quotas and suspension
//! heuristics.
//!
//! ## Modules
//!
//! - [`config`] — run configuration and reload semantics
//! - [`queue`] — the bounded worker queue with outcome bookkeeping
//! - [`sched`] — the scheduler-stack runtime (one feed thread per
//!   scheduler) and two bundled schedulers
//! - [`params`] — action-parameter merging and placeholder substitution
//! - [`check`] — per-entry refresh and revalidation helpers
//! - [`run`] — the run engine itself (outer loop, passes, workers)
//! - [`recovery`] — outstanding-action reconciliation
//! - [`triggers`] — trigger interpretation and live reload

pub mod check;
pub mod config;
pub mod params;
pub mod queue;
pub mod recovery;
pub mod run;
pub mod sched;
pub mod triggers;

pub use config::{MatchSource, PolicyRunConfig};
pub use queue::{ActionStatus, EntryQueue, QueueItem};
pub use run::{PolicyRun, RunParams, RunTarget};
pub use triggers::{Threshold, TriggerConfig, TriggerType, UsageSnapshot};

use fswarden_domain::rules::{BoolExpr, FileClassSet, RuleSet};
use fswarden_domain::services::action::{ActionParams, PolicyAction};

/// Static description of one policy: what it applies to and what it does.
///
/// Built from configuration at startup; the run engine never mutates it.
#[derive(Debug, Clone, Default)]
pub struct PolicyDescriptor {
    pub name: String,
    /// The subset of entries the policy applies to.
    pub scope: BoolExpr,
    /// The policy works on soft-removed entries (tombstones) instead of
    /// the live table.
    pub manage_deleted: bool,
    /// Instance index of the policy's status manager, when it has one.
    pub status_manager: Option<usize>,
    /// The status value meaning "action in progress", for outstanding-
    /// action recovery.
    pub status_current: Option<String>,
    pub rules: RuleSet,
    pub fileclasses: FileClassSet,
    pub default_action: PolicyAction,
    pub default_action_params: ActionParams,
}

