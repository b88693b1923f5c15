// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared fixtures for the integration suites: a scriptable filesystem
//! with persistent identifiers, and a reference status manager whose
//! status reflects whether the entry was ever archived.

use fswarden::domain::entities::{AttrSet, EntryId, FsKind};
use fswarden::domain::error::EngineError;
use fswarden::domain::services::fs_access::{FsAccess, FsStat};
use fswarden::domain::entities::changelog::RecordType;
use fswarden::domain::status_manager::{ClCbOutcome, RecordAction, SmFlags, StatusManager};
use fswarden::domain::value_objects::attr_mask::{AttrMask, StdAttr};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One scripted entry of the mock filesystem.
#[derive(Debug, Clone)]
pub struct MockEntry {
    pub stat: FsStat,
    pub link_target: Option<String>,
}

/// A fid-capable in-memory filesystem the tests script directly.
pub struct MockFs {
    root: PathBuf,
    state: Mutex<MockFsState>,
}

#[derive(Default)]
struct MockFsState {
    by_path: HashMap<PathBuf, (EntryId, MockEntry)>,
    by_id: HashMap<EntryId, PathBuf>,
}

impl MockFs {
    pub fn new(root: impl Into<PathBuf>) -> Arc<MockFs> {
        Arc::new(MockFs {
            root: root.into(),
            state: Mutex::new(MockFsState::default()),
        })
    }

    fn fid_dir(&self) -> PathBuf {
        self.root.join(".fids")
    }

    /// Adds (or replaces) one regular file.
    pub fn add_file(&self, path: impl AsRef<Path>, id: EntryId, size: u64, mtime: i64) {
        let stat = FsStat {
            dev: 1,
            inode: match id {
                EntryId::Posix { inode, .. } => inode,
                _ => 0,
            },
            kind: FsKind::File,
            mode: 0o644,
            nlink: 1,
            owner: "1000".into(),
            group: "1000".into(),
            size,
            blocks: size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
        };
        self.add_entry(path, id, MockEntry { stat, link_target: None });
    }

    pub fn add_entry(&self, path: impl AsRef<Path>, id: EntryId, entry: MockEntry) {
        let mut st = self.state.lock();
        let path = path.as_ref().to_path_buf();
        st.by_path.insert(path.clone(), (id, entry));
        st.by_id.insert(id, path);
    }

    /// Makes an entry vanish (lstat will report it gone).
    pub fn remove_entry(&self, id: &EntryId) {
        let mut st = self.state.lock();
        if let Some(path) = st.by_id.remove(id) {
            st.by_path.remove(&path);
        }
    }

    fn resolve(&self, path: &Path) -> Option<(EntryId, MockEntry)> {
        let st = self.state.lock();
        if let Ok(rest) = path.strip_prefix(self.fid_dir()) {
            let fid: EntryId = EntryId::Fid(rest.to_string_lossy().parse().ok()?);
            let p = st.by_id.get(&fid)?;
            return st.by_path.get(p).cloned();
        }
        st.by_path.get(path).cloned()
    }
}

impl FsAccess for MockFs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn fsname(&self) -> &str {
        "mockfs"
    }

    fn supports_fids(&self) -> bool {
        true
    }

    fn id_path(&self, id: &EntryId) -> Option<PathBuf> {
        match id {
            EntryId::Fid(fid) => Some(self.fid_dir().join(fid.to_string())),
            EntryId::Posix { .. } => None,
        }
    }

    fn special_dirs(&self) -> Vec<PathBuf> {
        vec![self.fid_dir()]
    }

    fn lstat(&self, path: &Path) -> Result<FsStat, EngineError> {
        self.resolve(path)
            .map(|(_, e)| e.stat)
            .ok_or_else(|| EngineError::vanished(path.display().to_string()))
    }

    fn readlink(&self, path: &Path) -> Result<String, EngineError> {
        self.resolve(path)
            .and_then(|(_, e)| e.link_target)
            .ok_or_else(|| EngineError::vanished(path.display().to_string()))
    }

    fn get_fid_by_path(&self, path: &Path) -> Result<Option<EntryId>, EngineError> {
        Ok(self.resolve(path).map(|(id, _)| id))
    }

    fn get_fullpath(&self, id: &EntryId) -> Result<Option<PathBuf>, EngineError> {
        Ok(self.state.lock().by_id.get(id).cloned())
    }

    fn unlink(&self, path: &Path) -> Result<(), EngineError> {
        let mut st = self.state.lock();
        if let Some((id, _)) = st.by_path.remove(path) {
            st.by_id.remove(&id);
            Ok(())
        } else {
            Err(EngineError::vanished(path.display().to_string()))
        }
    }
}

/// A reference archival-like status manager: entries never seen before
/// are `new`; its softrm decision preserves archived copies.
pub fn archiver_manager() -> StatusManager {
    let mut sm = StatusManager::new("archiver", &["new", "modified", "archived"]);
    sm.flags = SmFlags {
        shared: false,
        deleted: true,
    };
    sm.status_needs_fresh = AttrMask::of_std(&[StdAttr::Size, StdAttr::LastMod]) | AttrMask::GENERIC_STATUS;
    sm.softrm_table_mask = AttrMask::of_std(&[StdAttr::Fullpath, StdAttr::Size]);
    sm.softrm_filter_mask = AttrMask::GENERIC_STATUS;
    sm.get_status = Some(Arc::new(|smi, _id, attrs_in, attrs_out| {
        // without a backend copy recorded, a fresh entry is 'new'
        let current = smi.status_of(attrs_in);
        match current {
            None => smi.set_status_attr(attrs_out, "new"),
            Some(s) => smi.set_status_attr(attrs_out, s),
        }
    }));
    sm.changelog_cb = Some(Arc::new(|_smi, record, _id, _attrs, _refreshed| {
        let mut outcome = ClCbOutcome::default();
        match record.rec_type {
            RecordType::Unlink if record.flags.unlink_last => {
                outcome.action = if record.flags.unlink_hsm_exists {
                    RecordAction::SoftRmAlways
                } else {
                    RecordAction::SoftRmIfExists
                };
            }
            RecordType::Mtime | RecordType::Trunc | RecordType::Close => {
                outcome.need_status_refresh = true;
            }
            _ => {}
        }
        Ok(outcome)
    }));
    sm
}

/// Scan-op attributes as the scanner would deliver them: path info plus
/// the stat fields.
pub fn scan_attrs(fullpath: &str, name: &str, parent: EntryId, stat: &FsStat) -> AttrSet {
    let mut a = AttrSet::new();
    a.set_fullpath(fullpath);
    a.set_name(name);
    a.set_parent_id(parent);
    a.set_kind(stat.kind);
    a.set_size(stat.size);
    a.set_blocks(stat.blocks);
    a.set_owner(stat.owner.clone());
    a.set_group(stat.group.clone());
    a.set_last_access(stat.atime);
    a.set_last_mod(stat.mtime);
    a.set_last_mdchange(stat.ctime);
    a.set_mode(stat.mode);
    a.set_nlink(stat.nlink);
    a
}
