// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Operation
//!
//! One unit of work traversing the entry-processor pipeline: an entry
//! identity (possibly computed late), the event that produced it (scan
//! entry or changelog record), the attributes observed so far, the
//! attribute-need masks still to be discharged, and the store operation the
//! pipeline converged on.
//!
//! Operations are owned values moved between stages; each owns its
//! attribute sets, so stage handlers never lock around attribute access.

use fswarden_domain::entities::changelog::ChangelogRecord;
use fswarden_domain::entities::{AttrSet, EntryId, FsKind};
use fswarden_domain::value_objects::AttrMask;

/// The store operation an entry-processor operation resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DbOpType {
    /// Nothing to write (initial state, or update demoted because
    /// nothing changed).
    #[default]
    NoOp,
    Insert,
    Update,
    /// Remove one name; the inode row survives.
    RemoveOne,
    /// Remove the entry and all its names.
    RemoveLast,
    /// Move the row to the tombstone table.
    SoftRemove,
}

impl DbOpType {
    /// Only inserts, updates and no-ops may share a batch.
    pub fn is_batchable(self) -> bool {
        matches!(self, DbOpType::NoOp | DbOpType::Insert | DbOpType::Update)
    }
}

/// What produced the operation.
#[derive(Debug, Default)]
pub enum OpSource {
    /// Full-scan entry; attributes come from the scanner.
    #[default]
    Scan,
    /// Changelog record (with its metadata-server tag inside).
    Changelog(ChangelogRecord),
}

impl OpSource {
    pub fn record(&self) -> Option<&ChangelogRecord> {
        match self {
            OpSource::Changelog(rec) => Some(rec),
            OpSource::Scan => None,
        }
    }
}

/// Completion callback, fired at changelog-clear (or at end-of-scan for GC
/// operations) once the operation's effect is durable.
pub type OpCallback = Box<dyn FnOnce(&PipelineOp) + Send>;

/// A unit of work in the entry-processor pipeline.
#[derive(Default)]
pub struct PipelineOp {
    /// Pipeline-wide submission order (set by the processor).
    pub(crate) seq: u64,
    /// Entry identity; `None` until the get-ID stage resolves it.
    pub entry_id: Option<EntryId>,
    pub source: OpSource,
    pub db_op_type: DbOpType,
    /// Attributes observed from the event/filesystem.
    pub fs_attrs: AttrSet,
    /// Attributes read from the store.
    pub db_attrs: AttrSet,
    /// What the filesystem must still provide.
    pub fs_attr_need: AttrMask,
    /// What the store read should provide.
    pub db_attr_need: AttrMask,
    /// The store had a row for this entry.
    pub db_exists: bool,
    /// UNLINK record without a usable identity: resolve it from the
    /// store's name table.
    pub get_fid_from_db: bool,
    /// UNLINK without the last-link flag: use the cached `nlink` to decide.
    pub check_if_last_entry: bool,
    /// End-of-scan garbage collection of stale entries.
    pub gc_entries: bool,
    /// End-of-scan garbage collection of stale names.
    pub gc_names: bool,
    /// Current pipeline stage index.
    pub stage: usize,
    /// True while this op holds the identity constraint.
    pub(crate) constraint_held: bool,
    pub callback: Option<OpCallback>,
}

impl std::fmt::Debug for PipelineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOp")
            .field("seq", &self.seq)
            .field("entry_id", &self.entry_id)
            .field("stage", &self.stage)
            .field("db_op_type", &self.db_op_type)
            .field("db_exists", &self.db_exists)
            .finish_non_exhaustive()
    }
}

impl PipelineOp {
    /// An operation for one scanned entry. The scanner provides the
    /// fullpath and whatever attributes it already read.
    pub fn from_scan(fs_attrs: AttrSet) -> PipelineOp {
        PipelineOp {
            fs_attrs,
            ..PipelineOp::default()
        }
    }

    /// An operation for one changelog record. Name-bearing records seed
    /// the name/parent attributes; the callback fires once the record's
    /// effect is durably applied.
    pub fn from_changelog(record: ChangelogRecord, callback: Option<OpCallback>) -> PipelineOp {
        let mut fs_attrs = AttrSet::new();
        if let Some((parent, name)) = record.name_key() {
            fs_attrs.set_parent_id(parent);
            fs_attrs.set_name(name);
        }
        PipelineOp {
            entry_id: Some(record.target),
            fs_attrs,
            source: OpSource::Changelog(record),
            ..PipelineOp::default()
        }
    }

    /// The end-of-scan GC operation. `scan_start` bounds the stale-row
    /// filter; `path_prefix` restricts partial scans.
    pub fn gc(
        scan_start: i64,
        gc_entries: bool,
        gc_names: bool,
        path_prefix: Option<&str>,
        callback: Option<OpCallback>,
    ) -> PipelineOp {
        let mut fs_attrs = AttrSet::new();
        fs_attrs.set_md_update(scan_start);
        if let Some(p) = path_prefix {
            fs_attrs.set_fullpath(p);
        }
        PipelineOp {
            fs_attrs,
            gc_entries,
            gc_names,
            callback,
            ..PipelineOp::default()
        }
    }

    pub fn record(&self) -> Option<&ChangelogRecord> {
        self.source.record()
    }

    pub fn is_changelog(&self) -> bool {
        matches!(self.source, OpSource::Changelog(_))
    }

    /// An attribute looked up in `fs_attrs` first, then `db_attrs`.
    pub fn kind_any(&self) -> Option<FsKind> {
        self.fs_attrs.kind().or_else(|| self.db_attrs.kind())
    }

    pub fn fullpath_any(&self) -> Option<&str> {
        self.fs_attrs.fullpath().or_else(|| self.db_attrs.fullpath())
    }

    pub fn creation_time_any(&self) -> Option<i64> {
        self.fs_attrs
            .creation_time()
            .or_else(|| self.db_attrs.creation_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::changelog::{RecordFlags, RecordType};

    #[test]
    fn test_changelog_op_seeds_name_and_parent() {
        let rec = ChangelogRecord {
            index: 7,
            rec_type: RecordType::Create,
            time: 1000,
            flags: RecordFlags::default(),
            target: EntryId::fid(0x1, 5, 0),
            parent: Some(EntryId::fid(0x1, 2, 0)),
            name: Some("newfile".into()),
            origin: "mdt0".into(),
        };
        let op = PipelineOp::from_changelog(rec, None);
        assert_eq!(op.entry_id, Some(EntryId::fid(0x1, 5, 0)));
        assert_eq!(op.fs_attrs.name(), Some("newfile"));
        assert!(op.fs_attrs.parent_id().is_some());
    }

    #[test]
    fn test_fs_or_db_lookup_order() {
        let mut op = PipelineOp::from_scan(AttrSet::new());
        op.db_attrs.set_kind(FsKind::Dir);
        assert_eq!(op.kind_any(), Some(FsKind::Dir));
        op.fs_attrs.set_kind(FsKind::File);
        assert_eq!(op.kind_any(), Some(FsKind::File));
    }

    #[test]
    fn test_batchable_op_types() {
        assert!(DbOpType::Insert.is_batchable());
        assert!(DbOpType::NoOp.is_batchable());
        assert!(!DbOpType::SoftRemove.is_batchable());
        assert!(!DbOpType::RemoveLast.is_batchable());
    }
}
