// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Stage Handlers
//!
//! The per-stage logic of the entry processor. Handlers take the shared
//! context and the operation, do their work synchronously, and return
//! where the operation goes next ([`NextStep::Stage`]) or that it leaves
//! the pipeline ([`NextStep::Drop`]). Errors that concern a single entry
//! are logged and resolved here (skip, remove decision); they never
//! propagate out of a handler.

use crate::pipeline::logrec::{
    self, db_attr_need_for_record, matching_scopes_mask, posix_attr_mask, process_log_rec,
};
pub use crate::pipeline::logrec::NextStep;
use crate::pipeline::op::{DbOpType, PipelineOp};
use crate::pipeline::stages::{STAGE_CHGLOG_CLR, STAGE_GET_INFO_FS, STAGE_PRE_APPLY};
use crate::pipeline::PipelineCtx;
use fswarden_domain::entities::changelog::RecordType;
use fswarden_domain::entities::{AttrSet, EntryId, Fid, FsKind};
use fswarden_domain::error::EngineError;
use fswarden_domain::status_manager::RecordAction;
use fswarden_domain::value_objects::attr_mask::{AttrMask, StdAttr};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Drop for scan entries, acknowledge-without-effect for records.
fn skip_record(op: &PipelineOp) -> NextStep {
    if op.is_changelog() {
        NextStep::Stage(STAGE_CHGLOG_CLR)
    } else {
        NextStep::Drop
    }
}

/// Store-removal decision for an entry that no longer exists on the
/// filesystem.
fn rm_record(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    if !op.db_exists && !ctx.registry.has_deleted_manager() {
        return skip_record(op);
    }

    if let Some(rec) = op.record() {
        if rec.rec_type != RecordType::Unlink && rec.rec_type != RecordType::Rmdir {
            // lstat by identity failed, so the entry is really gone; a
            // subsequent UNLINK record will remove it
            return skip_record(op);
        }
    }

    let mut merged = op.fs_attrs.clone();
    merged.merge_missing(&op.db_attrs);

    let id = match op.entry_id {
        Some(id) => id,
        None => return skip_record(op),
    };

    match ctx.registry.match_all_softrm_filters(&id, &merged, ctx.now()) {
        RecordAction::None => {
            debug!(%id, "softrm filters: keep current operation");
            // keep the current db_op_type
        }
        RecordAction::RmAll => {
            debug!(%id, "softrm filters: remove from store");
            op.db_op_type = DbOpType::RemoveLast;
        }
        RecordAction::SoftRmIfExists => {
            if op.db_exists {
                op.db_op_type = DbOpType::SoftRemove;
            } else {
                return skip_record(op);
            }
        }
        RecordAction::SoftRmAlways => {
            op.db_op_type = DbOpType::SoftRemove;
        }
    }

    NextStep::Stage(STAGE_PRE_APPLY)
}

/// Partial-path detection: a cached fullpath outside the root marker is
/// stale by construction; unset it and request a path refresh.
fn check_fullpath(ctx: &PipelineCtx, attrs: &mut AttrSet, id: Option<&EntryId>, need: &mut AttrMask) {
    let path = match attrs.fullpath() {
        Some(p) => p.to_string(),
        None => return,
    };
    if path.starts_with(ctx.root_marker()) {
        return;
    }

    let path_bits = AttrMask::of_std(&[StdAttr::ParentId, StdAttr::Name, StdAttr::Fullpath]);

    // for fid filesystems the partial form is '<pid>/name'
    if ctx.fs.supports_fids() {
        match path.split_once('/') {
            Some((pid, rest)) if pid.parse::<Fid>().is_ok() => {
                if !rest.contains('/') {
                    info!(id = ?id, path = %path, "parent dir unknown, updating entry path info");
                } else {
                    debug!(id = ?id, path = %path, "partial path below unknown directory");
                }
            }
            _ => {
                warn!(id = ?id, path = %path, "inconsistent relative path");
            }
        }
    } else {
        warn!(id = ?id, path = %path, "path outside filesystem root");
    }

    attrs.drop_attrs(AttrMask::of_std(&[StdAttr::Fullpath]));
    *need |= path_bits;
}

fn is_special_entry(ctx: &PipelineCtx, op: &PipelineOp) -> bool {
    if let (Some(id), Some(root)) = (op.entry_id, ctx.root_id) {
        if id == root {
            debug!(%id, "ignoring record for root directory");
            return true;
        }
    }
    if let Some(path) = op.fullpath_any() {
        if Path::new(path) == ctx.fs.root() {
            return true;
        }
        for special in ctx.fs.special_dirs() {
            if Path::new(path).starts_with(&special) {
                debug!(path, "ignoring filesystem-internal special directory");
                return true;
            }
        }
    }
    false
}

/// Stage 0 — resolve the entry identity.
///
/// Scan entries resolve from their fullpath (native identifier when the
/// filesystem provides one, `(dev, inode, validator)` otherwise).
/// Identity-less unlink records resolve from the store's name table.
pub fn get_id(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    if op.get_fid_from_db {
        op.get_fid_from_db = false;
        let (parent, name) = match (op.fs_attrs.parent_id(), op.fs_attrs.name()) {
            (Some(p), Some(n)) => (p, n.to_string()),
            _ => {
                debug!("identity-less record without parent/name, dropping");
                return NextStep::Drop;
            }
        };
        match ctx.store.get_fid_from_name(&parent, &name) {
            Ok(Some(id)) => {
                op.entry_id = Some(id);
                return NextStep::Stage(crate::pipeline::stages::STAGE_GET_INFO_DB);
            }
            Ok(None) => {
                debug!(%parent, name, "parent/filename for UNLINK not found");
                return NextStep::Drop;
            }
            Err(e) => {
                error!(error = %e, "store lookup failed while resolving identity");
                return NextStep::Drop;
            }
        }
    }

    let path = match op.fs_attrs.fullpath() {
        Some(p) => PathBuf::from(p),
        None => {
            error!("scan entry without fullpath, dropping");
            return NextStep::Drop;
        }
    };

    if ctx.fs.supports_fids() {
        match ctx.fs.get_fid_by_path(&path) {
            Ok(Some(id)) => {
                op.entry_id = Some(id);
                return NextStep::Stage(crate::pipeline::stages::STAGE_GET_INFO_DB);
            }
            Ok(None) => {}
            Err(e) if e.is_vanished() => {
                debug!(path = %path.display(), "entry vanished before identity resolution");
                return NextStep::Drop;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "identity resolution failed");
                return NextStep::Drop;
            }
        }
    }

    match ctx.fs.lstat(&path) {
        Ok(st) => {
            op.entry_id = Some(EntryId::posix(st.dev, st.inode, st.ctime));
            NextStep::Stage(crate::pipeline::stages::STAGE_GET_INFO_DB)
        }
        Err(e) if e.is_vanished() => {
            debug!(path = %path.display(), "entry vanished before identity resolution");
            NextStep::Drop
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "lstat failed during identity resolution");
            NextStep::Drop
        }
    }
}

/// Stage 1 — read cached attributes and decide what else is needed.
pub fn get_info_db(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    let now = ctx.now();

    if is_special_entry(ctx, op) {
        return NextStep::Drop;
    }

    let next = if op.is_changelog() {
        // type hint from the record itself
        if let Some(kind) = op.record().and_then(|r| logrec::type_clue(r.rec_type)) {
            op.fs_attrs.set_kind(kind);
        }

        op.db_attr_need = db_attr_need_for_record(ctx, op, now);

        // for a rename target, match the new name, not the stored one
        if op.record().map(|r| r.rec_type) == Some(RecordType::Ext)
            && op.db_attr_need.test_std(StdAttr::Fullpath)
        {
            if let Some(id) = op.entry_id {
                if let Ok(Some(path)) = ctx.fs.get_fullpath(&id) {
                    op.fs_attrs.set_fullpath(path.to_string_lossy());
                    op.db_attr_need.clear_std(StdAttr::Fullpath);
                }
            }
        }

        read_db_attrs(ctx, op);

        let next = process_log_rec(ctx, op);

        // fetch whatever the requested statuses need fresh
        op.fs_attr_need |= ctx
            .registry
            .attrs_for_missing_status(op.fs_attr_need, true);
        next
    } else {
        // scan entries must come with their fullpath
        if op.fs_attrs.fullpath().is_none() {
            error!(id = ?op.entry_id, "missing info from FS scan");
            return NextStep::Drop;
        }

        // stamp the scan epoch; end-of-scan GC filters on these
        if op.fs_attrs.md_update().is_none() {
            op.fs_attrs.set_md_update(now);
        }
        if op.fs_attrs.path_update().is_none() {
            op.fs_attrs.set_path_update(now);
        }

        let scopes = matching_scopes_mask(ctx, &op.fs_attrs, now);
        let attr_allow_cached = ctx.registry.attrs_for_missing_status(scopes, false);
        let attr_need_fresh = ctx.registry.attrs_for_missing_status(scopes, true);

        // scanners usually deliver stat attributes with the entry; fetch
        // whatever this one did not provide
        op.fs_attr_need |= posix_attr_mask() - op.fs_attrs.mask();

        if ctx.cfg.detect_fake_mtime {
            op.db_attr_need.set_std(StdAttr::CreationTime);
        }
        op.db_attr_need |= attr_allow_cached - op.fs_attrs.mask();

        match op.fs_attrs.kind() {
            Some(FsKind::Dir) => {}
            Some(_) => op.db_attr_need.clear_std(StdAttr::Dircount),
            None => {}
        }
        match op.fs_attrs.kind() {
            Some(FsKind::Symlink) => {
                op.db_attr_need.set_std(StdAttr::Link);
                op.db_attr_need.clear_std(StdAttr::StripeInfo);
                op.db_attr_need.clear_std(StdAttr::StripeItems);
            }
            Some(_) => op.db_attr_need.clear_std(StdAttr::Link),
            None => {}
        }

        if ctx.cfg.match_classes {
            if ctx.updt.fileclass != fswarden_domain::value_objects::UpdatePolicy::Always {
                op.db_attr_need.set_std(StdAttr::ClassUpdate);
            }
            op.db_attr_need |= ctx.fileclass_mask() - op.fs_attrs.mask();
        }

        read_db_attrs(ctx, op);
        if op.db_exists {
            // whatever the store could not provide must come from FS
            op.fs_attr_need |= op.db_attr_need - op.db_attrs.mask();
        }

        // refresh every status whose scope matches
        op.fs_attr_need.status |= scopes.status;
        op.fs_attr_need |= attr_need_fresh - op.fs_attrs.mask();

        if !op.db_exists {
            op.db_op_type = DbOpType::Insert;

            if op.fs_attrs.creation_time().is_none() {
                op.fs_attrs.set_creation_time(now);
            }

            if op.fs_attrs.kind() == Some(FsKind::File)
                && (op.fs_attrs.stripe_info().is_none() || op.fs_attrs.stripe_items().is_none())
            {
                op.fs_attr_need.set_std(StdAttr::StripeInfo);
                op.fs_attr_need.set_std(StdAttr::StripeItems);
            }

            if op.fs_attrs.kind() == Some(FsKind::Symlink) && op.fs_attrs.link().is_none() {
                op.fs_attr_need.set_std(StdAttr::Link);
            } else {
                op.fs_attr_need.clear_std(StdAttr::Link);
            }
        } else {
            op.db_op_type = DbOpType::Update;

            match op.fs_attrs.kind() {
                Some(FsKind::Symlink) => {
                    // inodes may be recycled on plain POSIX filesystems,
                    // so only trust a link target read in this pass
                    if op.fs_attrs.link().is_some() {
                        op.fs_attr_need.clear_std(StdAttr::Link);
                    } else {
                        op.fs_attr_need.set_std(StdAttr::Link);
                    }
                }
                Some(_) => op.fs_attr_need.clear_std(StdAttr::Link),
                None => {}
            }

            // parent/name may be missing for the scan root
            if op.fs_attrs.name().is_none() {
                op.fs_attr_need.set_std(StdAttr::Name);
            }
            if op.fs_attrs.parent_id().is_none() {
                op.fs_attr_need.set_std(StdAttr::ParentId);
            }
        }
        NextStep::Stage(STAGE_GET_INFO_FS)
    };

    let id = op.entry_id;
    let mut need = op.fs_attr_need;
    check_fullpath(ctx, &mut op.db_attrs, id.as_ref(), &mut need);
    op.fs_attr_need = need;

    next
}

fn read_db_attrs(ctx: &PipelineCtx, op: &mut PipelineOp) {
    let id = match op.entry_id {
        Some(id) => id,
        None => {
            op.db_exists = false;
            return;
        }
    };
    match ctx.store.get(&id, &op.db_attr_need) {
        Ok(Some(attrs)) => {
            op.db_exists = true;
            op.db_attrs = attrs;
        }
        Ok(None) => {
            op.db_exists = false;
            op.db_attrs = AttrSet::new();
        }
        Err(e) => {
            error!(%id, error = %e, "error retrieving entry from store");
            op.db_exists = false;
            op.db_attrs = AttrSet::new();
        }
    }
}

/// Stage 2 — fill the remaining needs from the filesystem.
pub fn get_info_fs(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    let id = match op.entry_id {
        Some(id) => id,
        None => return NextStep::Drop,
    };

    let path: PathBuf = if ctx.fs.supports_fids() {
        match ctx.fs.id_path(&id) {
            Some(p) => p,
            None => match op.fullpath_any() {
                Some(p) => PathBuf::from(p),
                None => return skip_record(op),
            },
        }
    } else {
        match op.fullpath_any() {
            Some(p) => PathBuf::from(p),
            None => {
                error!(%id, "entry path is needed for retrieving file info");
                return skip_record(op);
            }
        }
    };

    // don't retrieve what is already fresh
    op.fs_attr_need = op.fs_attr_need - op.fs_attrs.mask();

    if op.fs_attr_need.intersects(&posix_attr_mask()) {
        match ctx.fs.lstat(&path) {
            Ok(st) => {
                if st.nlink == 0 {
                    debug!(%id, "entry has nlink=0: remove pending");
                    return rm_record(ctx, op);
                }
                if !id.matches_stat(st.dev, st.inode) {
                    // recycled inode: tag the row so the next scan fixes it
                    debug!(%id, "identity mismatch on stat, marking invalid");
                    op.fs_attrs.set_invalid(true);
                }
                stat_to_attrs(&mut op.fs_attrs, &st);
                op.fs_attrs.set_md_update(ctx.now());
            }
            Err(e) if e.is_vanished() => {
                debug!(%id, path = %path.display(), "entry no longer exists");
                return rm_record(ctx, op);
            }
            Err(e) => {
                debug!(%id, path = %path.display(), error = %e, "lstat failed");
                return skip_record(op);
            }
        }
    }

    // path information
    if op
        .fs_attr_need
        .intersects(&AttrMask::of_std(&[StdAttr::Fullpath, StdAttr::Name, StdAttr::ParentId]))
    {
        if let Ok(Some(full)) = ctx.fs.get_fullpath(&id) {
            op.fs_attrs.set_fullpath(full.to_string_lossy());
        }
        op.fs_attrs.set_path_update(ctx.now());
    }

    if ctx.cfg.detect_fake_mtime {
        if let (Some(ctime), Some(mtime)) = (op.creation_time_any(), op.fs_attrs.last_mod()) {
            if mtime < ctime {
                warn!(%id, mtime, creation = ctime, "mtime older than entry creation (fake mtime)");
            }
        }
    }

    // stripe queries only make sense for regular files
    if op.fs_attr_need.test_std(StdAttr::StripeInfo)
        && op.kind_any().map(|k| k != FsKind::File).unwrap_or(false)
    {
        op.fs_attr_need.clear_std(StdAttr::StripeInfo);
        op.fs_attr_need.clear_std(StdAttr::StripeItems);
    }
    if op.fs_attr_need.test_std(StdAttr::StripeInfo) {
        match ctx.fs.get_stripe_by_path(&path) {
            Ok(Some((info, items))) => {
                op.fs_attrs.set_stripe_info(info);
                op.fs_attrs.set_stripe_items(items);
            }
            Ok(None) => {}
            Err(e) => debug!(%id, error = %e, "stripe query failed"),
        }
    }

    // statuses from the managers whose scope matches
    if op.fs_attr_need.status != 0 {
        let mut merged = op.fs_attrs.clone();
        merged.merge_missing(&op.db_attrs);

        // re-match scopes with the information gathered so far
        op.fs_attr_need.status = 0;
        op.fs_attr_need.status |= matching_scopes_mask(ctx, &op.fs_attrs, ctx.now()).status;

        for inst in ctx.registry.instances() {
            if !op.fs_attr_need.test_status(inst.smi_index) {
                continue;
            }
            let get_status = match &inst.sm().get_status {
                Some(f) => f,
                None => continue,
            };
            debug!(%id, manager = inst.instance_name.as_str(), "retrieving status");
            let mut new_attrs = AttrSet::new();
            match get_status(inst, &id, &merged, &mut new_attrs) {
                Ok(()) => op.fs_attrs.apply(&new_attrs),
                Err(e) if e.is_vanished() => {
                    debug!(%id, "entry no longer exists while getting status");
                    return skip_record(op);
                }
                Err(e) => {
                    warn!(%id, manager = inst.instance_name.as_str(), error = %e, "failed to get status"
                    );
                }
            }
        }
    }

    // readlink only for symlinks
    if op.fs_attr_need.test_std(StdAttr::Link)
        && op.kind_any().map(|k| k != FsKind::Symlink).unwrap_or(false)
    {
        op.fs_attr_need.clear_std(StdAttr::Link);
    }
    if op.fs_attr_need.test_std(StdAttr::Link) {
        match ctx.fs.readlink(&path) {
            Ok(target) => op.fs_attrs.set_link(target),
            Err(e) => warn!(%id, error = %e, "readlink failed"),
        }
    }

    if is_special_entry(ctx, op) {
        return skip_record(op);
    }

    // fileclass matching
    if ctx.cfg.match_classes {
        let mut merged = op.fs_attrs.clone();
        merged.merge_missing(&op.db_attrs);
        if ctx.updt.need_fileclass_update(&merged, ctx.now()) {
            match ctx.fileclasses.match_entry(&merged, &ctx.registry, ctx.now()) {
                Ok(Some(class)) => {
                    op.fs_attrs.set_fileclass(class.name.clone());
                    op.fs_attrs.set_class_update(ctx.now());
                }
                Ok(None) => {
                    op.fs_attrs.set_fileclass("");
                    op.fs_attrs.set_class_update(ctx.now());
                }
                Err(e) => debug!(%id, error = %e, "fileclass matching incomplete"),
            }
        }
    }

    NextStep::Stage(STAGE_PRE_APPLY)
}

fn stat_to_attrs(attrs: &mut AttrSet, st: &fswarden_domain::services::fs_access::FsStat) {
    attrs.set_owner(st.owner.clone());
    attrs.set_group(st.group.clone());
    attrs.set_size(st.size);
    attrs.set_blocks(st.blocks);
    attrs.set_last_access(st.atime);
    attrs.set_last_mod(st.mtime);
    attrs.set_last_mdchange(st.ctime);
    attrs.set_kind(st.kind);
    attrs.set_mode(st.mode);
    attrs.set_nlink(st.nlink);
}

/// Stage 3 — normalize and diff-filter before the store write.
pub fn pre_apply(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    // once set, never change creation time
    if op.db_op_type != DbOpType::Insert {
        op.fs_attrs.drop_attrs(AttrMask::of_std(&[StdAttr::CreationTime]));
    }

    // nlink from record semantics; the filesystem value can be out of
    // sync by the time we process the record
    match op.record().map(|r| r.rec_type) {
        Some(RecordType::Create) => {
            op.fs_attrs.set_nlink(1);
        }
        Some(RecordType::Hardlink) => {
            if let Some(nlink) = op.db_attrs.nlink() {
                op.fs_attrs.set_nlink(nlink + 1);
            }
        }
        _ => {}
    }

    if op.db_op_type == DbOpType::Update {
        let diff = ctx.store.what_diff(&op.fs_attrs, &op.db_attrs);

        // identity keys always travel with the update
        let mut to_keep = AttrMask::of_std(&[StdAttr::ParentId, StdAttr::Name]);
        if diff.intersects(&AttrMask::of_std(&[StdAttr::ParentId, StdAttr::Name])) {
            to_keep.set_std(StdAttr::Fullpath);
        }
        if !op.is_changelog() {
            // scan mode: keep the structural timestamps so end-of-scan GC
            // does not collect this row
            to_keep |= AttrMask::of_std(&[StdAttr::MdUpdate, StdAttr::PathUpdate]);
        }

        let keep = diff | to_keep | (op.fs_attrs.mask() - op.db_attrs.mask());
        op.fs_attrs.retain(keep);

        if ctx.updt.fileclass == fswarden_domain::value_objects::UpdatePolicy::Always
            && !op.fs_attrs.mask().test_std(StdAttr::Fileclass)
        {
            op.fs_attrs.drop_attrs(AttrMask::of_std(&[StdAttr::ClassUpdate]));
        }

        if op.fs_attrs.mask().is_empty() {
            op.db_op_type = DbOpType::NoOp;
        }
    }

    // strip store-generated fields from write-backs; insert-time
    // initializations (a new directory's dircount) go through
    if op.db_op_type != DbOpType::Insert {
        let mut readonly = AttrMask::EMPTY;
        for attr in StdAttr::ALL {
            if attr.is_read_only() {
                readonly.set_std(attr);
            }
        }
        op.fs_attrs.drop_attrs(readonly);
    }

    NextStep::Stage(crate::pipeline::stages::STAGE_DB_APPLY)
}

/// Whether `next` can join a batch started by `first`. `full_mask`
/// accumulates the union mask of the batch.
pub fn dbop_is_batchable(
    ctx: &PipelineCtx,
    first: &PipelineOp,
    next: &PipelineOp,
    full_mask: &mut AttrMask,
) -> bool {
    if !first.db_op_type.is_batchable() {
        false
    } else if first.db_op_type != next.db_op_type {
        false
    } else if first.db_op_type == DbOpType::NoOp {
        true
    } else if ctx.store.batch_compat(full_mask, &next.fs_attrs.mask()) {
        *full_mask = *full_mask | next.fs_attrs.mask();
        true
    } else {
        false
    }
}

/// Stage 4 — apply one operation to the store.
pub fn db_apply(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    let id = match op.entry_id {
        Some(id) => id,
        None => return NextStep::Drop,
    };

    let rc = match op.db_op_type {
        DbOpType::NoOp => {
            debug!(%id, "NoOp");
            Ok(())
        }
        DbOpType::Insert => {
            debug!(%id, "Insert");
            ctx.store.insert(&id, &op.fs_attrs)
        }
        DbOpType::Update => {
            debug!(%id, "Update");
            ctx.store.update(&id, &op.fs_attrs)
        }
        DbOpType::RemoveOne => {
            debug!(%id, "RemoveOne");
            let mut attrs = op.fs_attrs.clone();
            attrs.merge_missing(&op.db_attrs);
            ctx.store.remove(&id, &attrs, false)
        }
        DbOpType::RemoveLast => {
            debug!(%id, "RemoveLast");
            let mut attrs = op.fs_attrs.clone();
            attrs.merge_missing(&op.db_attrs);
            ctx.store.remove(&id, &attrs, true)
        }
        DbOpType::SoftRemove => {
            op.fs_attrs.set_rm_time(ctx.now());
            let mut attrs = op.fs_attrs.clone();
            attrs.merge_missing(&op.db_attrs);
            // only the softrm table columns go into the tombstone
            attrs.retain(
                ctx.registry.softrm_table_mask_all()
                    | AttrMask::of_std(&[
                        StdAttr::Fullpath,
                        StdAttr::ParentId,
                        StdAttr::Name,
                        StdAttr::RmTime,
                    ]),
            );
            debug!(%id, "SoftRemove");
            ctx.store.soft_remove(&id, &attrs)
        }
    };

    if let Err(e) = rc {
        error!(%id, error = %e, "error performing store operation");
    }

    if op.callback.is_some() {
        NextStep::Stage(STAGE_CHGLOG_CLR)
    } else {
        NextStep::Drop
    }
}

/// Stage 4, batched variant: one homogeneous store write for the whole
/// batch; atomic per the store contract. The caller routes each member
/// afterwards (clear stage when it carries a callback, drop otherwise).
pub fn db_batch_apply(ctx: &PipelineCtx, ops: &mut [Box<PipelineOp>]) {
    let batch: Vec<(EntryId, AttrSet)> = ops
        .iter()
        .filter_map(|o| o.entry_id.map(|id| (id, o.fs_attrs.clone())))
        .collect();

    let rc = match ops[0].db_op_type {
        DbOpType::NoOp => Ok(()),
        DbOpType::Insert => {
            debug!(count = batch.len(), "BatchInsert");
            ctx.store.batch_apply(&batch, false)
        }
        DbOpType::Update => {
            debug!(count = batch.len(), "BatchUpdate");
            ctx.store.batch_apply(&batch, true)
        }
        other => {
            error!(?other, "unexpected operation for batched apply");
            Err(EngineError::internal_error("unexpected batched op type"))
        }
    };

    if let Err(e) = rc {
        error!(count = batch.len(), error = %e, "error performing batched store operation");
    }
}

/// Stage 5 — acknowledge the changelog record.
pub fn chglog_clr(op: &mut PipelineOp) -> NextStep {
    if let Some(rec) = op.record() {
        debug!(record = %rec, "clearing changelog record");
    }
    if let Some(cb) = op.callback.take() {
        cb(op);
    }
    NextStep::Drop
}

/// Stage 6 — end-of-scan garbage collection of rows not seen by the scan.
pub fn rm_old_entries(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    use fswarden_domain::services::entry_store::{FilterItem, FilterOp, FilterValue, StoreFilter};

    if op.gc_entries || op.gc_names {
        let scan_start = op.fs_attrs.md_update().unwrap_or(0);
        let mut filter = StoreFilter::new();

        if op.gc_entries {
            filter.push(FilterItem::std(
                StdAttr::MdUpdate,
                FilterOp::Lt,
                FilterValue::Num(scan_start),
            ));
        }
        if op.gc_names {
            filter.push(FilterItem::std(
                StdAttr::PathUpdate,
                FilterOp::Lt,
                FilterValue::Num(scan_start),
            ));
        }
        // partial scan: only collect below the scanned subtree
        if let Some(prefix) = op.fs_attrs.fullpath() {
            filter.push(FilterItem::std(
                StdAttr::Fullpath,
                FilterOp::Like,
                FilterValue::Str(format!("{}/*", prefix)),
            ));
        }

        if let Err(e) = ctx.store.force_commit(true) {
            warn!(error = %e, "force-commit request failed");
        }

        let mut log_each = |id: &EntryId| {
            debug!(%id, "garbage-collecting stale row");
        };
        let rc = if ctx.registry.has_deleted_manager() {
            ctx.store.mass_soft_remove(&filter, ctx.now(), &mut log_each)
        } else {
            ctx.store.mass_remove(&filter, &mut log_each)
        };
        match rc {
            Ok(removed) => info!(removed, "end-of-scan garbage collection done"),
            Err(e) => error!(error = %e, "mass removal failed"),
        }
    }

    if let Some(cb) = op.callback.take() {
        cb(op);
    }

    if let Err(e) = ctx.store.force_commit(false) {
        warn!(error = %e, "force-commit release failed");
    }

    NextStep::Drop
}

/// Dispatches one operation to its stage handler.
pub fn run_stage(ctx: &PipelineCtx, op: &mut PipelineOp) -> NextStep {
    use crate::pipeline::stages::*;

    match op.stage {
        STAGE_GET_ID => get_id(ctx, op),
        STAGE_GET_INFO_DB => get_info_db(ctx, op),
        STAGE_GET_INFO_FS => get_info_fs(ctx, op),
        STAGE_PRE_APPLY => pre_apply(ctx, op),
        STAGE_DB_APPLY => db_apply(ctx, op),
        STAGE_CHGLOG_CLR => chglog_clr(op),
        STAGE_RM_OLD_ENTRIES => rm_old_entries(ctx, op),
        other => {
            error!(stage = other, "operation in unknown stage, dropping");
            NextStep::Drop
        }
    }
}
