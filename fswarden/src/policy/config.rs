// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy-Run Configuration
//!
//! Tunables of one policy's run engine, with live-reload semantics: scalar
//! limits and intervals swap at the next pass boundary; structural fields
//! (thread count, queue size, LRU sort attribute) cannot change while the
//! process runs and are refused individually with a log line.

use fswarden_domain::error::EngineError;
use fswarden_domain::services::entry_store::SortAttr;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How thoroughly an entry is re-checked before (and after) scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// No re-check at all.
    None,
    /// Match on cached attributes only.
    CacheOnly,
    /// Refresh attributes the update policy flags as stale.
    #[default]
    AutoUpdate,
    /// Refresh everything.
    ForceUpdate,
}

/// Configuration of a policy run engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRunConfig {
    /// Worker threads (not reloadable).
    pub nb_threads: usize,
    /// Worker queue depth (not reloadable).
    pub queue_size: usize,
    /// Candidate iterator ordering (not reloadable).
    pub lru_sort_attr: Option<SortAttr>,
    /// Candidate page size; 0 retrieves everything at once.
    pub db_request_limit: u64,

    /// Hard caps per run; 0 means unbounded.
    pub max_action_count: u64,
    pub max_action_volume: u64,

    /// Suspend a pass when at least this many errors occurred...
    pub suspend_error_min: u64,
    /// ...and the error rate reaches this percentage.
    pub suspend_error_pct: f64,

    /// Progress reporting interval.
    pub report_interval_secs: u64,
    /// Consider an action stuck after this long.
    pub action_timeout_secs: u64,
    /// Period of the outstanding-action reconciliation.
    pub check_actions_interval_secs: u64,
    /// Reconcile outstanding actions at startup.
    pub check_actions_on_startup: bool,
    /// Emit one report line per successful action.
    pub report_actions: bool,

    /// Entry re-check before entering the scheduler stack.
    pub pre_sched_match: MatchSource,
    /// Entry re-check after the last scheduler, before the action.
    pub post_sched_match: MatchSource,
    /// Wait before re-offering a delayed entry to a scheduler.
    pub reschedule_delay_ms: u64,

    /// Re-examine entries that previously matched an ignore rule.
    pub recheck_ignored_entries: bool,
}

impl Default for PolicyRunConfig {
    fn default() -> Self {
        PolicyRunConfig {
            nb_threads: 4,
            queue_size: 4096,
            lru_sort_attr: Some(SortAttr::LastAccess),
            db_request_limit: 100_000,
            max_action_count: 0,
            max_action_volume: 0,
            suspend_error_min: 0,
            suspend_error_pct: 0.0,
            report_interval_secs: 600,
            action_timeout_secs: 2 * 3600,
            check_actions_interval_secs: 0,
            check_actions_on_startup: false,
            report_actions: true,
            pre_sched_match: MatchSource::AutoUpdate,
            post_sched_match: MatchSource::AutoUpdate,
            reschedule_delay_ms: 100,
            recheck_ignored_entries: false,
        }
    }
}

impl PolicyRunConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.nb_threads == 0 {
            return Err(EngineError::invalid_config("nb_threads must be > 0"));
        }
        if self.queue_size == 0 {
            return Err(EngineError::invalid_config("queue_size must be > 0"));
        }
        if !(0.0..=100.0).contains(&self.suspend_error_pct) {
            return Err(EngineError::invalid_config(
                "suspend_error_pct must be within [0, 100]",
            ));
        }
        Ok(())
    }

    /// Applies a reloaded configuration: dynamic fields are taken from
    /// `new`, structural fields keep their current value and each refused
    /// change is logged. Returns the refused field names.
    pub fn reload_from(&mut self, new: &PolicyRunConfig) -> Vec<&'static str> {
        let mut refused = Vec::new();

        if new.nb_threads != self.nb_threads {
            warn!(
                current = self.nb_threads,
                requested = new.nb_threads,
                "nb_threads cannot be modified dynamically"
            );
            refused.push("nb_threads");
        }
        if new.queue_size != self.queue_size {
            warn!(
                current = self.queue_size,
                requested = new.queue_size,
                "queue_size cannot be modified dynamically"
            );
            refused.push("queue_size");
        }
        if new.lru_sort_attr != self.lru_sort_attr {
            warn!("lru_sort_attr cannot be modified dynamically");
            refused.push("lru_sort_attr");
        }

        macro_rules! swap_field {
            ($field:ident) => {
                if self.$field != new.$field {
                    info!(
                        field = stringify!($field),
                        "policy run parameter updated"
                    );
                    self.$field = new.$field.clone();
                }
            };
        }

        swap_field!(db_request_limit);
        swap_field!(max_action_count);
        swap_field!(max_action_volume);
        swap_field!(suspend_error_min);
        swap_field!(suspend_error_pct);
        swap_field!(report_interval_secs);
        swap_field!(action_timeout_secs);
        swap_field!(check_actions_interval_secs);
        swap_field!(check_actions_on_startup);
        swap_field!(report_actions);
        swap_field!(pre_sched_match);
        swap_field!(post_sched_match);
        swap_field!(reschedule_delay_ms);
        swap_field!(recheck_ignored_entries);

        refused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_refuses_structural_fields() {
        let mut cfg = PolicyRunConfig::default();
        let mut new = cfg.clone();
        new.nb_threads = 16;
        new.lru_sort_attr = Some(SortAttr::LastMod);
        new.max_action_count = 42;

        let refused = cfg.reload_from(&new);
        assert_eq!(refused, vec!["nb_threads", "lru_sort_attr"]);
        // refused fields keep the old values
        assert_eq!(cfg.nb_threads, 4);
        assert_eq!(cfg.lru_sort_attr, Some(SortAttr::LastAccess));
        // dynamic fields swapped
        assert_eq!(cfg.max_action_count, 42);
    }

    #[test]
    fn test_validate_bounds() {
        let mut cfg = PolicyRunConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.suspend_error_pct = 120.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_match_source_ordering() {
        // the strictest mode wins when pre/post are folded together
        assert!(MatchSource::ForceUpdate > MatchSource::AutoUpdate);
        assert!(MatchSource::AutoUpdate > MatchSource::CacheOnly);
        assert!(MatchSource::CacheOnly > MatchSource::None);
    }
}
