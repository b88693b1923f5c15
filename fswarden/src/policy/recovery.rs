// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Outstanding-Action Recovery
//!
//! Reconciles rows whose status says an action is still in progress
//! (e.g. `archive_running`) long after it started: the action may have
//! completed while the engine was down, or the acting process may have
//! died. The reconciliation re-reads the status and counts entries whose
//! status moved on as completed; it never cancels a running action.
//!
//! Runs at startup (`check_actions_on_startup`) and periodically
//! (`check_actions_interval`), driven by the caller's timer.

use crate::policy::run::RunCtx;
use crate::policy::PolicyDescriptor;
use fswarden_domain::entities::AttrSet;
use fswarden_domain::error::EngineError;
use fswarden_domain::services::entry_store::{
    FilterAttr, FilterItem, FilterOp, FilterValue, IterOpts, StoreFilter,
};
use fswarden_domain::value_objects::attr_mask::StdAttr;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Entries whose status had moved away from "in progress".
    pub completed: u64,
    /// Entries whose action still appears to be running.
    pub still_running: u64,
}

/// Enumerates rows stuck in the policy's "in progress" status for longer
/// than `action_timeout`, refreshes their status, and updates the rows
/// whose action actually finished.
pub fn check_outstanding_actions(
    ctx: &RunCtx,
    descr: &PolicyDescriptor,
) -> Result<RecoveryStats, EngineError> {
    let mut stats = RecoveryStats::default();

    // deleted-entries policies have no in-progress status to reconcile
    if descr.manage_deleted {
        return Ok(stats);
    }

    let (smi_idx, status_current) = match (descr.status_manager, &descr.status_current) {
        (Some(i), Some(s)) => (i, s.as_str()),
        _ => return Ok(stats),
    };
    let inst = ctx
        .registry
        .by_index(smi_idx)
        .ok_or_else(|| EngineError::internal_error("unknown status manager instance"))?;
    let current_val = inst.sm().status_index(status_current).ok_or_else(|| {
        EngineError::invalid_config(format!(
            "status '{}' is not valid for '{}'",
            status_current, inst.instance_name
        ))
    })? as i64;

    let oldest = ctx.now() - ctx.config.action_timeout_secs as i64;
    let mut filter = StoreFilter::new();
    filter.push(FilterItem::new(
        FilterAttr::Status(smi_idx),
        FilterOp::Eq,
        FilterValue::Num(current_val),
    ));
    filter.push(FilterItem::std(
        StdAttr::MdUpdate,
        FilterOp::Lt,
        FilterValue::Num(oldest),
    ));

    let mut cursor = ctx.store.iterator(&filter, None, IterOpts::default())?;
    while let Some((id, attrs)) = cursor.next_entry()? {
        let get_status = match &inst.sm().get_status {
            Some(f) => f,
            None => {
                // nothing to re-read; count as still running
                stats.still_running += 1;
                continue;
            }
        };

        let mut refreshed = AttrSet::new();
        match get_status(inst, &id, &attrs, &mut refreshed) {
            Ok(()) => {}
            Err(e) if e.is_vanished() => {
                debug!(%id, "entry gone while reconciling outstanding action");
                stats.completed += 1;
                continue;
            }
            Err(e) => {
                warn!(%id, error = %e, "failed to refresh status of outstanding action");
                stats.still_running += 1;
                continue;
            }
        }

        let new_status = refreshed
            .status_slot(smi_idx)
            .and_then(|v| inst.sm().status_name(v));
        if new_status == Some(status_current) {
            stats.still_running += 1;
        } else {
            stats.completed += 1;
            refreshed.set_md_update(ctx.now());
            if let Err(e) = ctx.store.update(&id, &refreshed) {
                warn!(%id, error = %e, "failed to record reconciled status");
            }
        }
    }

    info!(
        policy = descr.name.as_str(),
        completed = stats.completed,
        still_running = stats.still_running,
        "outstanding-action reconciliation done"
    );
    Ok(stats)
}
