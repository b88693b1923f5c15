// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Changelog Coalescing
//!
//! Peephole elimination of redundant changelog records over a bounded
//! window of queued records, before they enter the pipeline:
//!
//! - an `UNLINK` carrying the last-link flag erases every earlier record
//!   for the same target (the entry is about to disappear anyway);
//! - any other `UNLINK`/`RENAME`/`RMDIR` erases earlier records for the
//!   same `(target, parent, name)`; when the erased record is the matching
//!   `CREATE`/`HARDLINK`/`SOFTLINK`/`MKDIR`/rename-target, the pair
//!   cancels and the current record is dropped too.
//!
//! On a cancelling pair the backward scan deliberately short-circuits:
//! the current record is dropped with its match and scanning resumes from
//! the previous record, so the remainder of an older chain (e.g. the
//! `CREATE` under its original name in `CREATE → RENAME → UNLINK`) is left
//! for the next round. Callers iterate while this function reports that
//! something was deleted.

use fswarden_domain::entities::changelog::{ChangelogRecord, RecordType};
use fswarden_domain::entities::EntryId;
use std::collections::VecDeque;
use tracing::debug;

fn name_key(rec: &ChangelogRecord) -> Option<(EntryId, String)> {
    rec.name_key().map(|(p, n)| (p, n.to_string()))
}

/// One coalescing pass over the window, newest to oldest. Returns true
/// when at least one record was dropped.
pub fn collapse(queue: &mut VecDeque<ChangelogRecord>) -> bool {
    let mut deleted = false;

    if queue.len() < 2 {
        return false;
    }

    // current record under examination, scanning backwards
    let mut i = queue.len() - 1;

    while !queue.is_empty() && i > 0 {
        let (rec_type, target, unlink_last) = {
            let r = &queue[i];
            (r.rec_type, r.target, r.flags.unlink_last)
        };

        if !matches!(
            rec_type,
            RecordType::Unlink | RecordType::Rename | RecordType::Rmdir
        ) {
            i -= 1;
            continue;
        }

        if rec_type == RecordType::Unlink && unlink_last {
            // erase every earlier record for the same target
            let mut j = i;
            while j > 0 {
                if queue[j - 1].target == target {
                    debug!(record = %queue[j - 1], "dropping record (target removed)");
                    queue.remove(j - 1);
                    deleted = true;
                    i -= 1;
                    j -= 1;
                } else {
                    j -= 1;
                }
            }
        } else {
            let key = name_key(&queue[i]);
            let mut dropped_current = false;
            let mut j = i;
            while j > 0 {
                let matches_key = {
                    let r = &queue[j - 1];
                    r.target == target && name_key(r) == key
                };
                if !matches_key {
                    j -= 1;
                    continue;
                }

                // if the earlier record made this name appear, the pair
                // cancels entirely
                let cancels = queue[j - 1].rec_type.is_creation();
                debug!(record = %queue[j - 1], "dropping record (name removed)");
                queue.remove(j - 1);
                deleted = true;
                i -= 1;
                j -= 1;

                if cancels {
                    debug!(record = %queue[i], "dropping cancelling record");
                    queue.remove(i);
                    deleted = true;
                    dropped_current = true;
                    break;
                }
            }

            if dropped_current {
                // resume from the previous record
                if i == 0 {
                    break;
                }
                i -= 1;
                continue;
            }
        }

        if queue.is_empty() || i == 0 {
            break;
        }
        i -= 1;
    }

    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::changelog::RecordFlags;

    fn rec(index: u64, rec_type: RecordType, target: EntryId, name: Option<&str>) -> ChangelogRecord {
        ChangelogRecord {
            index,
            rec_type,
            time: 1000 + index as i64,
            flags: RecordFlags::default(),
            target,
            parent: name.map(|_| EntryId::fid(0x1, 1, 0)),
            name: name.map(|s| s.to_string()),
            origin: "mdt0".into(),
        }
    }

    fn unlink_last(index: u64, target: EntryId, name: &str) -> ChangelogRecord {
        let mut r = rec(index, RecordType::Unlink, target, Some(name));
        r.flags.unlink_last = true;
        r
    }

    #[test]
    fn test_create_unlink_pair_cancels() {
        let f = EntryId::fid(0x2, 10, 0);
        let mut q: VecDeque<_> = vec![
            rec(1, RecordType::Create, f, Some("tmp")),
            rec(2, RecordType::Unlink, f, Some("tmp")),
        ]
        .into();

        assert!(collapse(&mut q));
        assert!(q.is_empty());
    }

    #[test]
    fn test_unlink_last_sweeps_all_records_of_target() {
        let f = EntryId::fid(0x2, 10, 0);
        let other = EntryId::fid(0x2, 11, 0);
        let mut q: VecDeque<_> = vec![
            rec(1, RecordType::Create, f, Some("a")),
            rec(2, RecordType::Close, other, None),
            rec(3, RecordType::Mtime, f, None),
            unlink_last(4, f, "a"),
        ]
        .into();

        assert!(collapse(&mut q));
        // only the unrelated record and the unlink itself survive
        let types: Vec<_> = q.iter().map(|r| (r.index, r.rec_type)).collect();
        assert_eq!(
            types,
            vec![(2, RecordType::Close), (4, RecordType::Unlink)]
        );
    }

    #[test]
    fn test_unrelated_records_untouched() {
        let a = EntryId::fid(0x2, 1, 0);
        let b = EntryId::fid(0x2, 2, 0);
        let mut q: VecDeque<_> = vec![
            rec(1, RecordType::Create, a, Some("x")),
            rec(2, RecordType::Unlink, b, Some("y")),
        ]
        .into();

        assert!(!collapse(&mut q));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_create_rename_unlink_chain_short_circuits() {
        // CREATE(old) ; EXT(new name) ; UNLINK(new name)
        // the UNLINK cancels with the rename-target record; the CREATE
        // under the old name survives this pass (documented behavior)
        let f = EntryId::fid(0x2, 20, 0);
        let mut q: VecDeque<_> = vec![
            rec(1, RecordType::Create, f, Some("old")),
            rec(2, RecordType::Ext, f, Some("new")),
            rec(3, RecordType::Unlink, f, Some("new")),
        ]
        .into();

        assert!(collapse(&mut q));
        let survivors: Vec<_> = q.iter().map(|r| r.index).collect();
        assert_eq!(survivors, vec![1]);
    }

    #[test]
    fn test_rename_source_erases_older_name_events() {
        let f = EntryId::fid(0x2, 30, 0);
        // HARDLINK created a name, RENAME (source side) removes it
        let mut q: VecDeque<_> = vec![
            rec(1, RecordType::Hardlink, f, Some("n")),
            rec(2, RecordType::Rename, f, Some("n")),
        ]
        .into();

        assert!(collapse(&mut q));
        assert!(q.is_empty());
    }

    #[test]
    fn test_callers_iterate_until_fixpoint() {
        let f = EntryId::fid(0x2, 40, 0);
        let mut q: VecDeque<_> = vec![
            rec(1, RecordType::Create, f, Some("old")),
            rec(2, RecordType::Ext, f, Some("new")),
            rec(3, RecordType::Unlink, f, Some("new")),
            // the leftover CREATE cancels against this in a later pass
            rec(4, RecordType::Rename, f, Some("old")),
        ]
        .into();

        while collapse(&mut q) {}
        assert!(q.is_empty());
    }
}
