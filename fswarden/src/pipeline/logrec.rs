// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Changelog-Record Interpretation
//!
//! Decides, for one changelog record, which pipeline stage comes next,
//! which store operation applies, and which attributes must still be
//! fetched — the per-record action table of the record taxonomy, plus the
//! status managers' amendments through their changelog callbacks.

use crate::pipeline::op::{DbOpType, PipelineOp};
use crate::pipeline::stages::{STAGE_CHGLOG_CLR, STAGE_GET_INFO_FS, STAGE_PRE_APPLY};
use crate::pipeline::PipelineCtx;
use fswarden_domain::entities::changelog::RecordType;
use fswarden_domain::entities::{AttrSet, FsKind};
use fswarden_domain::status_manager::RecordAction;
use fswarden_domain::value_objects::attr_mask::{AttrMask, StdAttr};
use fswarden_domain::value_objects::update_policy::{UpdateFamily, UpdatePolicy};
use tracing::{debug, info};

/// Where the record interpreter sends the operation next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Stage(usize),
    Drop,
}

/// Attributes a plain `lstat` provides.
pub fn posix_attr_mask() -> AttrMask {
    AttrMask::of_std(&[
        StdAttr::Owner,
        StdAttr::Group,
        StdAttr::Size,
        StdAttr::Blocks,
        StdAttr::LastAccess,
        StdAttr::LastMod,
        StdAttr::LastMdChange,
        StdAttr::Kind,
        StdAttr::Mode,
        StdAttr::Nlink,
    ])
}

/// Object-type hint carried by the record type itself.
pub fn type_clue(rec_type: RecordType) -> Option<FsKind> {
    match rec_type {
        RecordType::Create | RecordType::Hardlink | RecordType::Layout | RecordType::Hsm => {
            Some(FsKind::File)
        }
        RecordType::Mkdir | RecordType::Rmdir => Some(FsKind::Dir),
        RecordType::Softlink => Some(FsKind::Symlink),
        _ => None,
    }
}

fn check_path_info(op: &mut PipelineOp, recname: &str) {
    if op.fs_attrs.name().is_none() || op.fs_attrs.parent_id().is_none() {
        // name-bearing records are expected to provide both
        info!(record = recname, id = ?op.entry_id, "name/parent missing from record, requesting path refresh");
        op.fs_attr_need |= AttrMask::of_std(&[StdAttr::Name, StdAttr::ParentId]);
    }
}

/// Infers information from the record itself, runs the status managers'
/// changelog callbacks, and maps the resulting record action onto a store
/// operation. Port of the record half of the Get-info-DB stage.
fn fill_from_log_rec(ctx: &PipelineCtx, op: &mut PipelineOp, allow_md_update: bool) -> NextStep {
    let record = match op.record() {
        Some(r) => r.clone(),
        None => return NextStep::Stage(STAGE_GET_INFO_FS),
    };
    let now = ctx.now();

    // status mask used both for scope checks and changelog callbacks
    let mut cl_cb_status_mask: Option<AttrMask> = None;

    match record.rec_type {
        RecordType::Create => {
            op.fs_attr_need.clear_std(StdAttr::Link);
            check_path_info(op, "CREATE");

            // A CREATE on a known entry means the identity was reused
            // (e.g. a reformatted filesystem): force a full refresh.
            if op.db_exists {
                info!(id = ?op.entry_id, "CREATE record on already existing entry; this is normal if it was scanned previously");
                op.fs_attrs.set_creation_time(record.time);

                op.fs_attr_need |= posix_attr_mask() | AttrMask::of_std(&[StdAttr::StripeInfo]);
                let scopes = matching_scopes_mask(ctx, &op.fs_attrs, now);
                op.fs_attr_need.status |= scopes.status;
                cl_cb_status_mask = Some(scopes);
            }
        }
        RecordType::Hardlink => {
            // the entry exists, only the name is new
            check_path_info(op, "HARDLINK");
        }
        RecordType::Mkdir | RecordType::Rmdir => {
            op.fs_attrs.set_kind(FsKind::Dir);
            op.fs_attr_need.clear_std(StdAttr::Link);
            op.fs_attr_need.clear_std(StdAttr::StripeInfo);
            op.fs_attr_need.clear_std(StdAttr::StripeItems);
            // a just-created or just-removed directory is empty
            op.fs_attrs.set_dircount(0);
            check_path_info(op, record.rec_type.as_str());
        }
        RecordType::Softlink => {
            op.fs_attrs.set_kind(FsKind::Symlink);
            op.fs_attr_need.set_std(StdAttr::Link);
            op.fs_attr_need.clear_std(StdAttr::StripeInfo);
            op.fs_attr_need.clear_std(StdAttr::StripeItems);
        }
        RecordType::Hsm => {
            op.fs_attr_need.clear_std(StdAttr::Link);
        }
        RecordType::Unlink => {
            check_path_info(op, "UNLINK");
        }
        RecordType::Layout => {
            op.fs_attr_need.set_std(StdAttr::StripeInfo);
            op.fs_attr_need.set_std(StdAttr::StripeItems);
        }
        _ => {}
    }

    if op.db_exists {
        if record.rec_type == RecordType::Ext {
            // rename target: path info must be set
            check_path_info(op, "RENAME");
        }

        if allow_md_update
            && matches!(
                record.rec_type,
                RecordType::Mtime
                    | RecordType::Ctime
                    | RecordType::Close
                    | RecordType::Trunc
                    | RecordType::Hsm
                    | RecordType::Setattr
            )
        {
            debug!(record = %record, "getattr needed: metadata event and cached metadata is stale");
            op.fs_attr_need |= posix_attr_mask();
        }
    }

    // Scope matching must not rely on cached values: a stale status could
    // wrongly exclude the entry.
    let cb_mask = cl_cb_status_mask
        .unwrap_or_else(|| matching_scopes_mask(ctx, &op.fs_attrs, now));

    let mut refreshed = AttrSet::new();
    let id = op.entry_id.unwrap_or(record.target);
    let summary = ctx
        .registry
        .run_all_changelog_cbs(&record, &id, &op.db_attrs, &mut refreshed, cb_mask);
    op.fs_attrs.apply(&refreshed);
    op.fs_attr_need |= summary.status_needs;
    if summary.errors > 0 {
        debug!(errors = summary.errors, record = %record, "changelog callbacks reported errors");
    }

    match summary.action {
        RecordAction::None => NextStep::Stage(STAGE_GET_INFO_FS),
        RecordAction::RmAll => {
            debug!(id = ?op.entry_id, "changelog callbacks: remove from store");
            if op.db_exists {
                op.db_op_type = DbOpType::RemoveLast;
                NextStep::Stage(STAGE_PRE_APPLY)
            } else {
                NextStep::Stage(STAGE_CHGLOG_CLR)
            }
        }
        RecordAction::SoftRmIfExists => {
            if !ctx.registry.has_deleted_manager() {
                op.db_op_type = DbOpType::RemoveLast;
                NextStep::Stage(STAGE_PRE_APPLY)
            } else if op.db_exists {
                op.db_op_type = DbOpType::SoftRemove;
                NextStep::Stage(STAGE_PRE_APPLY)
            } else {
                NextStep::Stage(STAGE_CHGLOG_CLR)
            }
        }
        RecordAction::SoftRmAlways => {
            op.db_op_type = if ctx.registry.has_deleted_manager() {
                DbOpType::SoftRemove
            } else {
                DbOpType::RemoveLast
            };
            NextStep::Stage(STAGE_PRE_APPLY)
        }
    }
}

/// Status bits of the instances whose scope may match the entry.
pub fn matching_scopes_mask(ctx: &PipelineCtx, attrs: &AttrSet, now: i64) -> AttrMask {
    let mut mask = AttrMask::EMPTY;
    for inst in ctx.registry.instances() {
        if inst.scope_may_match(attrs, &ctx.registry, now) {
            mask.set_status(inst.smi_index);
        }
    }
    mask
}

/// Interprets one changelog record against the cached row: resolves the
/// store operation and the remaining attribute needs, then returns the
/// next stage. Port of the record-processing half of Get-info-DB.
pub fn process_log_rec(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    let record = match op.record() {
        Some(r) => r.clone(),
        None => return NextStep::Stage(STAGE_GET_INFO_FS),
    };

    let mut md_allow_event_update = true;

    if record.rec_type == RecordType::Unlink {
        debug!(
            known = op.db_exists,
            last = record.flags.unlink_last,
            archived = record.flags.unlink_hsm_exists,
            id = ?op.entry_id,
            "UNLINK record"
        );

        let mut unlink_last = record.flags.unlink_last;

        if !ctx.registry.has_deleted_manager() && op.check_if_last_entry {
            // the record did not say whether this was the last link; the
            // cached nlink decides
            if let Some(nlink) = op.db_attrs.nlink() {
                if nlink <= 1 {
                    debug!(nlink, id = ?op.entry_id, "UNLINK on entry with single cached link: removing it");
                    unlink_last = true;
                }
            }
        }

        if unlink_last {
            if !ctx.registry.has_deleted_manager() {
                return if op.db_exists {
                    op.db_op_type = DbOpType::RemoveLast;
                    NextStep::Stage(STAGE_PRE_APPLY)
                } else {
                    NextStep::Stage(STAGE_CHGLOG_CLR)
                };
            }
            // deletion-managing policies decide through their callbacks
        } else if op.db_exists {
            // more names refer to the inode: remove this name only
            op.db_op_type = DbOpType::RemoveOne;
            return NextStep::Stage(STAGE_PRE_APPLY);
        } else {
            // UNLINK on an unknown entry: ignore the record
            return NextStep::Stage(STAGE_CHGLOG_CLR);
        }
    } else if record.rec_type == RecordType::Rename {
        // rename source: remove the old name only
        op.db_op_type = DbOpType::RemoveOne;
        return NextStep::Stage(STAGE_PRE_APPLY);
    } else if record.rec_type == RecordType::Rmdir {
        return if op.db_exists {
            op.db_op_type = DbOpType::RemoveLast;
            NextStep::Stage(STAGE_PRE_APPLY)
        } else {
            NextStep::Stage(STAGE_CHGLOG_CLR)
        };
    }

    if record.rec_type != RecordType::Unlink && record.rec_type != RecordType::Rmdir {
        if !op.db_exists {
            debug!(id = ?op.entry_id, "not in store: INSERT");
            op.db_op_type = DbOpType::Insert;
            op.fs_attrs.set_creation_time(record.time);

            // everything the record did not provide must come from FS
            let wanted = posix_attr_mask()
                | AttrMask::of_std(&[
                    StdAttr::Name,
                    StdAttr::ParentId,
                    StdAttr::StripeInfo,
                    StdAttr::StripeItems,
                    StdAttr::Link,
                ]);
            op.fs_attr_need |= wanted - op.fs_attrs.mask();

            if op.db_attr_need.test_std(StdAttr::Fullpath) && op.fs_attrs.fullpath().is_none() {
                op.fs_attr_need.set_std(StdAttr::Fullpath);
            }
        } else {
            op.db_op_type = DbOpType::Update;

            // missing info = what we asked the store for minus what it had
            let db_missing = op.db_attr_need - op.db_attrs.mask();

            if (db_missing & posix_attr_mask()) != AttrMask::EMPTY
                && !op.fs_attrs.mask().contains(&posix_attr_mask())
            {
                op.fs_attr_need |= posix_attr_mask();
            }

            if db_missing.test_std(StdAttr::StripeInfo)
                && op.fs_attrs.stripe_info().is_none()
                && op.kind_any().map(|k| k == FsKind::File).unwrap_or(true)
            {
                op.fs_attr_need.set_std(StdAttr::StripeInfo);
                op.fs_attr_need.set_std(StdAttr::StripeItems);
            }

            if db_missing.test_std(StdAttr::Link)
                && op.fs_attrs.link().is_none()
                && op.kind_any().map(|k| k == FsKind::Symlink).unwrap_or(true)
            {
                op.fs_attr_need.set_std(StdAttr::Link);
            }

            let md = ctx
                .updt
                .need_info_update(&op.db_attrs, UpdateFamily::Metadata, ctx.root_marker(), ctx.now());
            if md.update {
                op.fs_attr_need |= posix_attr_mask();
            }
            md_allow_event_update = md.update || md.may_update_on_event;

            let path_missing = db_missing
                .intersects(&AttrMask::of_std(&[StdAttr::Fullpath, StdAttr::Name, StdAttr::ParentId]));
            if (op.fs_attrs.parent_id().is_none() || op.fs_attrs.name().is_none())
                && (ctx
                    .updt
                    .need_info_update(&op.db_attrs, UpdateFamily::Path, ctx.root_marker(), ctx.now())
                    .update
                    || path_missing)
            {
                op.fs_attr_need |= AttrMask::of_std(&[StdAttr::Name, StdAttr::ParentId]);
            }
        }
    }

    fill_from_log_rec(ctx, op, md_allow_event_update)
}

/// Store attributes worth reading for a changelog record, before the
/// record is interpreted. Port of the changelog branch of Get-info-DB.
pub fn db_attr_need_for_record(ctx: &PipelineCtx, op: &PipelineOp, now: i64) -> AttrMask {
    let record = match op.record() {
        Some(r) => r,
        None => return AttrMask::EMPTY,
    };
    let mut need = AttrMask::EMPTY;

    if type_clue(record.rec_type).is_none() {
        // the type drives getstripe/readlink decisions
        need.set_std(StdAttr::Kind);
    }

    if record.rec_type == RecordType::Unlink && op.check_if_last_entry {
        need.set_std(StdAttr::Nlink);
    } else if record.rec_type == RecordType::Hardlink {
        // nlink will be incremented in pre-apply
        need.set_std(StdAttr::Nlink);
    }

    if ctx.updt.md != UpdatePolicy::Always {
        need.set_std(StdAttr::MdUpdate);
    }
    if ctx.updt.path != UpdatePolicy::Always && record.name.is_none() {
        need.set_std(StdAttr::PathUpdate);
    }

    if ctx.cfg.detect_fake_mtime {
        need.set_std(StdAttr::CreationTime);
    }

    if matches!(type_clue(record.rec_type), None | Some(FsKind::Symlink)) {
        need.set_std(StdAttr::Link);
    }

    if ctx.cfg.match_classes {
        if ctx.updt.fileclass != UpdatePolicy::Always {
            need.set_std(StdAttr::ClassUpdate);
        }
        need |= ctx.fileclass_mask() - op.fs_attrs.mask();
    }

    // attributes the in-scope managers can evaluate from cache
    let scopes = matching_scopes_mask(ctx, &op.fs_attrs, now);
    need |= ctx.registry.attrs_for_missing_status(scopes, false) - op.fs_attrs.mask();

    // unlink may need the softrm filter columns
    if record.rec_type == RecordType::Unlink {
        need |= ctx.registry.softrm_filter_mask_all() | ctx.registry.softrm_table_mask_all();
    }

    need
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_clue_table() {
        assert_eq!(type_clue(RecordType::Create), Some(FsKind::File));
        assert_eq!(type_clue(RecordType::Mkdir), Some(FsKind::Dir));
        assert_eq!(type_clue(RecordType::Softlink), Some(FsKind::Symlink));
        assert_eq!(type_clue(RecordType::Close), None);
        assert_eq!(type_clue(RecordType::Setattr), None);
    }

    #[test]
    fn test_posix_attr_mask_contents() {
        let m = posix_attr_mask();
        assert!(m.test_std(StdAttr::Size));
        assert!(m.test_std(StdAttr::Nlink));
        assert!(!m.test_std(StdAttr::Fullpath));
        assert!(!m.test_std(StdAttr::CreationTime));
    }
}
