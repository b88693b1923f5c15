// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Entities
//!
//! Objects with identity that flow through the engine:
//!
//! - [`entry_id::EntryId`] — the identity of a filesystem entry, stable
//!   across renames
//! - [`attr_set::AttrSet`] — an entry's attributes plus their presence mask
//! - [`changelog::ChangelogRecord`] — one event of the incremental stream

pub mod attr_set;
pub mod changelog;
pub mod entry_id;

pub use attr_set::{AttrSet, FsKind, StripeInfo, StripeItem};
pub use changelog::{ChangelogRecord, RecordFlags, RecordType};
pub use entry_id::{EntryId, Fid};
