// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Per-Entry Revalidation
//!
//! Helpers the run engine uses between candidate selection and action
//! execution: refresh an entry's attributes under the configured check
//! mode, verify the sort-order invariant, compute target amounts, and
//! probe for the heuristic end of list.

use crate::policy::config::MatchSource;
use crate::policy::queue::{ActionStatus, QueueItem};
use crate::policy::run::RunCtx;
use crate::policy::{RunTarget, PolicyDescriptor};
use fswarden_domain::entities::{AttrSet, EntryId};
use fswarden_domain::rules::RuleMatch;
use fswarden_domain::services::entry_store::SortAttr;
use fswarden_domain::value_objects::attr_mask::{AttrMask, StdAttr};
use fswarden_domain::value_objects::Counters;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Marks the row stale so the next scan reconciles it. Only meaningful
/// for filesystems without persistent identifiers.
pub fn invalidate_entry(ctx: &RunCtx, id: &EntryId) {
    if ctx.fs.supports_fids() {
        return;
    }
    let mut attrs = AttrSet::new();
    attrs.set_invalid(true);
    if let Err(e) = ctx.store.update(id, &attrs) {
        warn!(%id, error = %e, "error tagging entry as invalid");
    }
}

/// Writes refreshed attributes back, re-matching fileclasses and leaving
/// stripe info, read-only fields and the creation time alone.
pub fn update_entry(ctx: &RunCtx, id: &EntryId, attrs: &AttrSet) {
    let mut tmp = attrs.clone();

    if ctx.match_classes && ctx.updt.need_fileclass_update(&tmp, ctx.now()) {
        match ctx.fileclasses.match_entry(&tmp, &ctx.registry, ctx.now()) {
            Ok(Some(class)) => {
                tmp.set_fileclass(class.name.clone());
                tmp.set_class_update(ctx.now());
            }
            Ok(None) => {
                tmp.set_fileclass("");
                tmp.set_class_update(ctx.now());
            }
            Err(_) => {}
        }
    }

    let mut drop = AttrMask::of_std(&[StdAttr::StripeInfo, StdAttr::StripeItems, StdAttr::CreationTime]);
    for attr in StdAttr::ALL {
        if attr.is_read_only() {
            drop.set_std(attr);
        }
    }
    tmp.drop_attrs(drop);

    if let Err(e) = ctx.store.update(id, &tmp) {
        warn!(%id, error = %e, "error updating entry in store");
    }
}

/// A path to stat the entry: identity-backed when supported, stored
/// fullpath otherwise.
pub fn check_stat_path(ctx: &RunCtx, id: &EntryId, attrs: &AttrSet) -> Option<PathBuf> {
    if ctx.fs.supports_fids() {
        if let Some(p) = ctx.fs.id_path(id) {
            return Some(p);
        }
    }
    attrs.fullpath().map(PathBuf::from)
}

/// Attributes worth refreshing for this policy: whatever its scope,
/// rules and sort order read, plus the stat basics.
pub fn updt_attr_mask(ctx: &RunCtx, descr: &PolicyDescriptor) -> AttrMask {
    let mut mask = crate::pipeline::logrec::posix_attr_mask();
    mask |= descr.scope.attr_need(&ctx.registry);
    mask |= descr.rules.attr_need(&descr.fileclasses, &ctx.registry);
    if let Some(sort) = ctx.config.lru_sort_attr {
        mask |= sort.need_mask();
    }
    if let Some(smi_idx) = descr.status_manager {
        mask.set_status(smi_idx);
    }
    mask
}

fn need_update(method: MatchSource, relevant: bool) -> bool {
    method == MatchSource::ForceUpdate || (method == MatchSource::AutoUpdate && relevant)
}

/// Refreshes `fresh` from the filesystem under the given check mode.
/// Returns `Ok(())` or the outcome to acknowledge.
pub fn check_entry(
    ctx: &RunCtx,
    descr: &PolicyDescriptor,
    item: &QueueItem,
    fresh: &mut AttrSet,
    method: MatchSource,
) -> Result<(), ActionStatus> {
    if method == MatchSource::None || method == MatchSource::CacheOnly {
        return Ok(());
    }

    debug!(id = %item.id, "updating info about entry");
    let updt_mask = updt_attr_mask(ctx, descr);

    let stat_path = match check_stat_path(ctx, &item.id, &item.attrs) {
        Some(p) => p,
        None => {
            debug!(id = %item.id, "no path to access entry, tagging it invalid");
            invalidate_entry(ctx, &item.id);
            return Err(ActionStatus::MissingMd);
        }
    };

    // the stored creation time always wins over a fresh stat
    if let Some(ct) = item.attrs.creation_time() {
        fresh.set_creation_time(ct);
    }

    let mut updated = false;

    if need_update(method, updt_mask.intersects(&crate::pipeline::logrec::posix_attr_mask())) {
        match ctx.fs.lstat(&stat_path) {
            Ok(st) => {
                if !item.id.matches_stat(st.dev, st.inode) {
                    // the name now points to another inode
                    invalidate_entry(ctx, &item.id);
                    return Err(ActionStatus::Moved);
                }
                fresh.set_owner(st.owner);
                fresh.set_group(st.group);
                fresh.set_size(st.size);
                fresh.set_blocks(st.blocks);
                fresh.set_last_access(st.atime);
                fresh.set_last_mod(st.mtime);
                fresh.set_last_mdchange(st.ctime);
                fresh.set_kind(st.kind);
                fresh.set_mode(st.mode);
                fresh.set_nlink(st.nlink);
                updated = true;
            }
            Err(e) if e.is_vanished() => {
                debug!(id = %item.id, "lstat failed, entry gone");
                invalidate_entry(ctx, &item.id);
                return Err(ActionStatus::Moved);
            }
            Err(e) => {
                debug!(id = %item.id, error = %e, "lstat failed, skipping entry");
                invalidate_entry(ctx, &item.id);
                return Err(ActionStatus::StatFailure);
            }
        }
    }

    if need_update(
        method,
        updt_mask.intersects(&AttrMask::of_std(&[StdAttr::Fullpath, StdAttr::Name])),
    ) {
        if let Ok(Some(full)) = ctx.fs.get_fullpath(&item.id) {
            fresh.set_fullpath(full.to_string_lossy());
            fresh.set_path_update(ctx.now());
            updated = true;
        }
    }

    // refresh the policy's status when its scope relies on it
    if let Some(smi_idx) = descr.status_manager {
        let relevant = updt_mask.test_status(smi_idx);
        if need_update(method, relevant) {
            if let Some(inst) = ctx.registry.by_index(smi_idx) {
                if let Some(get_status) = &inst.sm().get_status {
                    let mut merged = fresh.clone();
                    merged.merge_missing(&item.attrs);
                    let mut out = AttrSet::new();
                    match get_status(inst, &item.id, &merged, &mut out) {
                        Ok(()) => {
                            fresh.apply(&out);
                            updated = true;
                        }
                        Err(e) => {
                            warn!(id = %item.id, manager = inst.instance_name.as_str(), error = %e,
                                  "failed to get status");
                            return Err(ActionStatus::Error);
                        }
                    }
                }
            }
        }
    }

    if updated {
        if let Err(e) = ctx.store.generate_fields(fresh, updt_mask) {
            debug!(error = %e, "failed to compute generated fields");
        }
        fresh.set_md_update(ctx.now());
    }

    Ok(())
}

/// Verifies the time-ordering invariant: the sort value read from the
/// filesystem must equal the one that entered the queue, and on
/// access/modification orderings the size must be unchanged.
pub fn check_entry_times(
    ctx: &RunCtx,
    descr: &PolicyDescriptor,
    item: &QueueItem,
    fresh: &AttrSet,
) -> Result<(), ActionStatus> {
    if descr.manage_deleted {
        if ctx.config.lru_sort_attr == Some(SortAttr::RmTime) && item.attrs.rm_time().is_none() {
            debug!(id = %item.id, "rm_time attribute is not set for deleted entry, skipping it");
            return Err(ActionStatus::MissingMd);
        }
        return Ok(());
    }

    let sort = match ctx.config.lru_sort_attr {
        Some(s) => s,
        None => return Ok(()),
    };

    let old = sort.value_of(&item.attrs);
    let new = sort.value_of(fresh);
    match (old, new) {
        (Some(a), Some(b)) if a == b => {}
        (Some(_), Some(_)) => {
            debug!(id = %item.id, "entry accessed/modified since last update, skipping");
            update_entry(ctx, &item.id, fresh);
            return Err(ActionStatus::Accessed);
        }
        _ => {
            debug!(id = %item.id, "cannot determine if sort criterion changed, skipping");
            update_entry(ctx, &item.id, fresh);
            return Err(ActionStatus::MissingMd);
        }
    }

    if matches!(sort, SortAttr::LastAccess | SortAttr::LastMod) {
        if let (Some(a), Some(b)) = (item.attrs.size(), fresh.size()) {
            if a != b {
                debug!(id = %item.id, "size changed since last update, skipping");
                update_entry(ctx, &item.id, fresh);
                return Err(ActionStatus::Accessed);
            }
        }
    }

    Ok(())
}

/// Amount one entry contributes toward the run target.
pub fn entry_amount(target: &RunTarget, attrs: &AttrSet) -> Counters {
    let blocks = attrs.blocks().unwrap_or(0);
    let vol = attrs.size().unwrap_or_else(|| blocks * 512);
    let targeted = match target {
        RunTarget::Ost(idx) => match (attrs.stripe_items(), attrs.stripe_info()) {
            (Some(items), info) if items.iter().any(|s| s.ost_idx == *idx) => {
                let stripes = info.map(|i| i.stripe_count.max(1)).unwrap_or(items.len().max(1) as u32);
                blocks / stripes as u64
            }
            _ => 0,
        },
        RunTarget::Pool(pool) => match attrs.stripe_info() {
            Some(info) if &info.pool == pool => blocks,
            _ => 0,
        },
        _ => 0,
    };
    Counters {
        count: 1,
        vol,
        blocks,
        targeted,
    }
}

/// Sets all time attributes implied by the sort order on a synthetic
/// entry, exploiting the time-ordering relations (`creation_time ≤
/// last_mod ≤ last_access ≤ rm_time`).
pub fn set_max_time_attrs(ctx: &RunCtx, attrs: &mut AttrSet, value: i64) {
    match ctx.config.lru_sort_attr {
        Some(SortAttr::RmTime) => {
            attrs.set_rm_time(value);
            attrs.set_last_access(value);
            attrs.set_last_mod(value);
            attrs.set_creation_time(value);
        }
        Some(SortAttr::LastAccess) => {
            attrs.set_last_access(value);
            attrs.set_last_mod(value);
            attrs.set_creation_time(value);
        }
        Some(SortAttr::LastMod) => {
            attrs.set_last_mod(value);
            attrs.set_creation_time(value);
        }
        Some(SortAttr::CreationTime) => {
            attrs.set_creation_time(value);
        }
        Some(SortAttr::Info(slot)) => {
            // implications on other attributes are unknown: set only the
            // sort attribute itself
            attrs.set_info_slot(slot, fswarden_domain::value_objects::InfoValue::Duration(value.max(0) as u64));
        }
        None => {}
    }
}

/// Heuristic end of list: build a synthetic entry whose time attributes
/// equal the last seen sort value; if it cannot match any rule, no later
/// (newer) entry can either.
pub fn heuristic_end_of_list(
    ctx: &RunCtx,
    descr: &PolicyDescriptor,
    ignore_policies: bool,
    last_sort_value: i64,
) -> bool {
    if ignore_policies {
        return false;
    }
    // don't rely on fake times (0, 1, or in the future)
    if last_sort_value <= 1 || last_sort_value > ctx.now() {
        return false;
    }

    // when sorting on an info attribute, conditions on *other* duration
    // attributes cannot be concluded from the probe
    if let Some(SortAttr::Info(slot)) = ctx.config.lru_sort_attr {
        let refers_others = descr
            .rules
            .rules
            .iter()
            .filter_map(|r| r.condition.as_ref())
            .any(|c| c.references_other_times(None, Some(slot), &ctx.registry));
        if refers_others {
            return false;
        }
    }

    let mut probe = AttrSet::new();
    set_max_time_attrs(ctx, &mut probe, last_sort_value);

    match descr
        .rules
        .match_entry(&probe, &descr.fileclasses, &ctx.registry, ctx.now())
    {
        Ok(RuleMatch::NoMatch) => {
            debug!(
                last_sort_value,
                "entries with later sort values cannot match any rule, stopping retrieval"
            );
            true
        }
        // a definite match, an ignore hit, or an inconclusive probe all
        // mean later entries may still be eligible
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::{StripeInfo, StripeItem};

    #[test]
    fn test_entry_amount_plain() {
        let mut attrs = AttrSet::new();
        attrs.set_size(1000);
        attrs.set_blocks(8);
        let c = entry_amount(&RunTarget::All, &attrs);
        assert_eq!(c.count, 1);
        assert_eq!(c.vol, 1000);
        assert_eq!(c.blocks, 8);
        assert_eq!(c.targeted, 0);
    }

    #[test]
    fn test_entry_amount_targeted_ost() {
        let mut attrs = AttrSet::new();
        attrs.set_blocks(100);
        attrs.set_stripe_info(StripeInfo {
            stripe_count: 2,
            stripe_size: 1 << 20,
            pool: "pool0".into(),
        });
        attrs.set_stripe_items(vec![StripeItem { ost_idx: 3 }, StripeItem { ost_idx: 7 }]);

        let on_target = entry_amount(&RunTarget::Ost(3), &attrs);
        assert_eq!(on_target.targeted, 50);

        let off_target = entry_amount(&RunTarget::Ost(9), &attrs);
        assert_eq!(off_target.targeted, 0);
    }

    #[test]
    fn test_entry_amount_vol_falls_back_to_blocks() {
        let mut attrs = AttrSet::new();
        attrs.set_blocks(4);
        let c = entry_amount(&RunTarget::All, &attrs);
        assert_eq!(c.vol, 4 * 512);
    }
}
