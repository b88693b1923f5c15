// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Filesystem Access Port
//!
//! The filesystem collaborator: everything the engine reads from (or does
//! to) the managed filesystem goes through this trait, so that filesystems
//! with persistent identifiers and stripe layouts can plug in their native
//! calls while plain POSIX trees use stat/readlink.
//!
//! `ENOENT`/`ESTALE` conditions must surface as
//! [`EngineError::EntryVanished`]; the pipeline and the policy run turn
//! them into remove-or-soft-remove decisions, never into run errors.

use crate::entities::attr_set::{FsKind, StripeInfo, StripeItem};
use crate::entities::entry_id::EntryId;
use crate::error::EngineError;
use std::path::{Path, PathBuf};

/// A stat result, already translated to engine types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStat {
    pub dev: u64,
    pub inode: u64,
    pub kind: FsKind,
    pub mode: u32,
    pub nlink: u32,
    pub owner: String,
    pub group: String,
    pub size: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// The filesystem collaborator.
pub trait FsAccess: Send + Sync {
    /// Mount point of the managed filesystem; valid fullpaths start here.
    fn root(&self) -> &Path;

    /// Filesystem name, for report lines and `{fsname}` substitution.
    fn fsname(&self) -> &str;

    /// True when the filesystem exposes persistent identifiers that can be
    /// opened directly (no fullpath needed).
    fn supports_fids(&self) -> bool {
        false
    }

    /// A path that reopens the entry by identity, for filesystems that
    /// support it (e.g. a `.fid` special directory).
    fn id_path(&self, _id: &EntryId) -> Option<PathBuf> {
        None
    }

    /// Filesystem-internal directories the engine must never mirror
    /// (e.g. the fid-access tree).
    fn special_dirs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn lstat(&self, path: &Path) -> Result<FsStat, EngineError>;

    fn readlink(&self, path: &Path) -> Result<String, EngineError>;

    /// Stripe summary and per-target items, for striped layouts.
    fn get_stripe_by_path(
        &self,
        _path: &Path,
    ) -> Result<Option<(StripeInfo, Vec<StripeItem>)>, EngineError> {
        Ok(None)
    }

    /// Resolves a path to a persistent identifier.
    fn get_fid_by_path(&self, _path: &Path) -> Result<Option<EntryId>, EngineError> {
        Ok(None)
    }

    /// Resolves an identity back to a fullpath (filesystems keeping a
    /// reverse name index).
    fn get_fullpath(&self, _id: &EntryId) -> Result<Option<PathBuf>, EngineError> {
        Ok(None)
    }

    /// Removes a name from the filesystem (used when a purge policy has no
    /// external action configured).
    fn unlink(&self, path: &Path) -> Result<(), EngineError>;
}
