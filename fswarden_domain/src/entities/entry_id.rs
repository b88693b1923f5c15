// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry Identity
//!
//! The identity of a filesystem entry, stable across renames.
//!
//! Two representations exist, depending on the filesystem class:
//!
//! - [`Fid`] — a persistent file identifier the filesystem can reopen
//!   directly (sequence, object id, version), for filesystems that expose
//!   one.
//! - `Posix` — a `(device, inode, validator)` compound for plain POSIX
//!   filesystems; the validator detects inode reuse between scans.
//!
//! Two entries are equal iff their identifiers are equal under the
//! filesystem class's equality; the derived `Eq`/`Hash` give exactly that.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A persistent file identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fid {
    pub seq: u64,
    pub oid: u32,
    pub ver: u32,
}

impl Fid {
    pub const fn new(seq: u64, oid: u32, ver: u32) -> Fid {
        Fid { seq, oid, ver }
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}:{:#x}:{:#x}]", self.seq, self.oid, self.ver)
    }
}

impl std::str::FromStr for Fid {
    type Err = crate::error::EngineError;

    /// Parses the bracketed form `[0x<seq>:0x<oid>:0x<ver>]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| crate::error::EngineError::InvalidValue(format!("not a fid: '{}'", s)))?;
        let mut parts = inner.split(':');
        let mut next_hex = || -> Result<u64, Self::Err> {
            let p = parts
                .next()
                .ok_or_else(|| crate::error::EngineError::InvalidValue(format!("not a fid: '{}'", s)))?;
            let p = p.strip_prefix("0x").unwrap_or(p);
            u64::from_str_radix(p, 16)
                .map_err(|_| crate::error::EngineError::InvalidValue(format!("not a fid: '{}'", s)))
        };
        let seq = next_hex()?;
        let oid = next_hex()? as u32;
        let ver = next_hex()? as u32;
        if parts.next().is_some() {
            return Err(crate::error::EngineError::InvalidValue(format!("not a fid: '{}'", s)));
        }
        Ok(Fid { seq, oid, ver })
    }
}

/// The identity of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryId {
    /// Persistent identifier (filesystems with FID support).
    Fid(Fid),
    /// `(device, inode, validator)` for plain POSIX filesystems.
    Posix {
        dev: u64,
        inode: u64,
        /// Detects inode reuse; typically derived from the creation time.
        validator: i64,
    },
}

impl EntryId {
    pub const fn fid(seq: u64, oid: u32, ver: u32) -> EntryId {
        EntryId::Fid(Fid::new(seq, oid, ver))
    }

    pub const fn posix(dev: u64, inode: u64, validator: i64) -> EntryId {
        EntryId::Posix { dev, inode, validator }
    }

    /// True for identities the filesystem can reopen directly.
    pub fn is_fid(&self) -> bool {
        matches!(self, EntryId::Fid(_))
    }

    /// Checks a freshly stat'ed `(device, inode)` pair against this
    /// identity. Always true for FID identities (the open was by FID).
    pub fn matches_stat(&self, dev: u64, inode: u64) -> bool {
        match self {
            EntryId::Fid(_) => true,
            EntryId::Posix { dev: d, inode: i, .. } => *d == dev && *i == inode,
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Fid(fid) => fid.fmt(f),
            EntryId::Posix { dev, inode, validator } => {
                write!(f, "{}:{}:{}", dev, inode, validator)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fid_display_parse_roundtrip() {
        let fid = Fid::new(0x200000007, 0x42, 0);
        let s = fid.to_string();
        assert_eq!(s, "[0x200000007:0x42:0x0]");
        assert_eq!(s.parse::<Fid>().unwrap(), fid);
    }

    #[test]
    fn test_fid_parse_rejects_garbage() {
        assert!("0x1:0x2:0x3".parse::<Fid>().is_err());
        assert!("[0x1:0x2]".parse::<Fid>().is_err());
        assert!("[0x1:0x2:0x3:0x4]".parse::<Fid>().is_err());
    }

    #[test]
    fn test_posix_identity_equality() {
        let a = EntryId::posix(10, 42, 1000);
        let b = EntryId::posix(10, 42, 1000);
        let c = EntryId::posix(10, 42, 2000); // reused inode
        assert_eq!(a, b);
        assert_ne!(a, c);

        assert!(a.matches_stat(10, 42));
        assert!(!a.matches_stat(10, 43));
    }
}
