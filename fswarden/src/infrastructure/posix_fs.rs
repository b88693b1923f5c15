// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # POSIX Filesystem Adapter
//!
//! [`FsAccess`] over a plain POSIX tree: `lstat`/`readlink`/`unlink` via
//! the standard library, no persistent identifiers, no stripes. Owner and
//! group are rendered as numeric ids; name resolution is the caller's
//! concern.

use fswarden_domain::entities::FsKind;
use fswarden_domain::error::EngineError;
use fswarden_domain::services::fs_access::{FsAccess, FsStat};
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// Filesystem access for plain POSIX trees.
pub struct PosixFs {
    root: PathBuf,
    fsname: String,
}

impl PosixFs {
    pub fn new(root: impl Into<PathBuf>, fsname: impl Into<String>) -> PosixFs {
        PosixFs {
            root: root.into(),
            fsname: fsname.into(),
        }
    }
}

fn kind_of(md: &Metadata) -> FsKind {
    let ft = md.file_type();
    if ft.is_dir() {
        FsKind::Dir
    } else if ft.is_symlink() {
        FsKind::Symlink
    } else if ft.is_char_device() {
        FsKind::Chr
    } else if ft.is_block_device() {
        FsKind::Blk
    } else if ft.is_fifo() {
        FsKind::Fifo
    } else if ft.is_socket() {
        FsKind::Sock
    } else {
        FsKind::File
    }
}

impl FsAccess for PosixFs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn fsname(&self) -> &str {
        &self.fsname
    }

    fn lstat(&self, path: &Path) -> Result<FsStat, EngineError> {
        let md = std::fs::symlink_metadata(path)?;
        Ok(FsStat {
            dev: md.dev(),
            inode: md.ino(),
            kind: kind_of(&md),
            mode: md.mode() & 0o7777,
            nlink: md.nlink() as u32,
            owner: md.uid().to_string(),
            group: md.gid().to_string(),
            size: md.size(),
            blocks: md.blocks(),
            atime: md.atime(),
            mtime: md.mtime(),
            ctime: md.ctime(),
        })
    }

    fn readlink(&self, path: &Path) -> Result<String, EngineError> {
        let target = std::fs::read_link(path)?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn unlink(&self, path: &Path) -> Result<(), EngineError> {
        std::fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lstat_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, b"hello").unwrap();

        let fs = PosixFs::new(dir.path(), "testfs");
        let st = fs.lstat(&file).unwrap();
        assert_eq!(st.kind, FsKind::File);
        assert_eq!(st.size, 5);
        assert!(st.nlink >= 1);
    }

    #[test]
    fn test_lstat_vanished_maps_to_entry_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let fs = PosixFs::new(dir.path(), "testfs");
        let err = fs.lstat(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_vanished());
    }

    #[test]
    fn test_readlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("t");
        let link = dir.path().join("l");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let fs = PosixFs::new(dir.path(), "testfs");
        let read = fs.readlink(&link).unwrap();
        assert_eq!(read, target.to_string_lossy());
    }
}
