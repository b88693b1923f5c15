// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Adapters
//!
//! Concrete implementations of the collaborator ports:
//!
//! - [`memory_store::MemoryStore`] — in-memory [`EntryStore`] used by the
//!   test suites and demos
//! - [`posix_fs::PosixFs`] — [`FsAccess`] over a plain POSIX tree
//!
//! [`EntryStore`]: fswarden_domain::services::entry_store::EntryStore
//! [`FsAccess`]: fswarden_domain::services::fs_access::FsAccess

pub mod memory_store;
pub mod posix_fs;

pub use memory_store::MemoryStore;
pub use posix_fs::PosixFs;
