// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Changelog Records
//!
//! The incremental event stream a metadata server emits: one record per
//! namespace or data event, with a strictly increasing per-stream index.
//! The wire format is out of scope; records arrive as structs from an
//! external reader and leave through the clear-callback once their effect
//! is durably applied.

use crate::entities::entry_id::EntryId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Create,
    Hardlink,
    Mkdir,
    Rmdir,
    Softlink,
    Unlink,
    /// Rename target (new name side).
    Ext,
    /// Rename source (old name side).
    Rename,
    Setattr,
    Mtime,
    Ctime,
    Close,
    Trunc,
    Hsm,
    Layout,
}

impl RecordType {
    /// True for records carrying a `(parent, name)` pair.
    pub fn has_name(self) -> bool {
        matches!(
            self,
            RecordType::Create
                | RecordType::Hardlink
                | RecordType::Mkdir
                | RecordType::Rmdir
                | RecordType::Softlink
                | RecordType::Unlink
                | RecordType::Ext
                | RecordType::Rename
        )
    }

    /// True for record types that make an entry (or one of its names)
    /// appear in the namespace.
    pub fn is_creation(self) -> bool {
        matches!(
            self,
            RecordType::Create
                | RecordType::Hardlink
                | RecordType::Softlink
                | RecordType::Mkdir
                | RecordType::Ext
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Create => "CREAT",
            RecordType::Hardlink => "HLINK",
            RecordType::Mkdir => "MKDIR",
            RecordType::Rmdir => "RMDIR",
            RecordType::Softlink => "SLINK",
            RecordType::Unlink => "UNLNK",
            RecordType::Ext => "RNMTO",
            RecordType::Rename => "RNMFM",
            RecordType::Setattr => "SATTR",
            RecordType::Mtime => "MTIME",
            RecordType::Ctime => "CTIME",
            RecordType::Close => "CLOSE",
            RecordType::Trunc => "TRUNC",
            RecordType::Hsm => "HSM",
            RecordType::Layout => "LYOUT",
        }
    }
}

/// Record flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFlags {
    /// The UNLINK removed the entry's last name.
    pub unlink_last: bool,
    /// The unlinked entry still has an archived copy in a backend.
    pub unlink_hsm_exists: bool,
}

/// One changelog record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogRecord {
    /// Strictly increasing stream index; clearing acknowledges up to here.
    pub index: u64,
    pub rec_type: RecordType,
    /// Event time (epoch seconds).
    pub time: i64,
    pub flags: RecordFlags,
    /// The entry the event applies to.
    pub target: EntryId,
    /// Parent directory, for name-bearing records.
    pub parent: Option<EntryId>,
    /// Entry name under `parent`, for name-bearing records.
    pub name: Option<String>,
    /// Originating metadata server tag.
    pub origin: String,
}

impl ChangelogRecord {
    /// `(parent, name)` when the record carries a name.
    pub fn name_key(&self) -> Option<(EntryId, &str)> {
        match (self.parent, self.name.as_deref()) {
            (Some(p), Some(n)) if self.rec_type.has_name() => Some((p, n)),
            _ => None,
        }
    }
}

impl fmt::Display for ChangelogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: #{} {} t={}",
            self.origin,
            self.index,
            self.rec_type.as_str(),
            self.target
        )?;
        if let Some((p, n)) = self.name_key() {
            write!(f, " p={} n={}", p, n)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(rec_type: RecordType) -> ChangelogRecord {
        ChangelogRecord {
            index: 1,
            rec_type,
            time: 1000,
            flags: RecordFlags::default(),
            target: EntryId::fid(0x1, 1, 0),
            parent: Some(EntryId::fid(0x1, 2, 0)),
            name: Some("f".into()),
            origin: "mdt0".into(),
        }
    }

    #[test]
    fn test_name_key_only_for_name_bearing_types() {
        assert!(rec(RecordType::Create).name_key().is_some());
        assert!(rec(RecordType::Close).name_key().is_none());
    }

    #[test]
    fn test_display_contains_index_and_type() {
        let s = rec(RecordType::Unlink).to_string();
        assert!(s.contains("#1"));
        assert!(s.contains("UNLNK"));
    }
}
