// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # FSWarden Domain
//!
//! The domain layer of the fswarden policy engine: the business concepts
//! of policy-driven data management for large POSIX filesystems, free of
//! threads, I/O and storage technology.
//!
//! ## Module Structure
//!
//! - [`entities`] — entry identities, attribute sets, changelog records
//! - [`value_objects`] — attribute masks, typed info values, counters,
//!   update policies
//! - [`rules`] — boolean expressions over attributes, fileclasses, and
//!   per-policy rule sets
//! - [`status_manager`] — the pluggable status-manager framework and its
//!   registry (slot assignment, mask relocation)
//! - [`services`] — ports for the external collaborators (entry store,
//!   filesystem, actions, action schedulers)
//! - [`error`] — the [`EngineError`] hierarchy
//!
//! ## Design Constraints
//!
//! The registry, the attribute-mask layout and the update-policy value are
//! built at startup and treated as immutable after publication; per-run
//! state lives in values the engine passes explicitly. Every fallible
//! function returns `Result<_, EngineError>`; the capacity check at
//! status-manager registration is an error, not a panic.

pub mod entities;
pub mod error;
pub mod rules;
pub mod services;
pub mod status_manager;
pub mod value_objects;

pub use entities::{AttrSet, ChangelogRecord, EntryId, Fid, FsKind, RecordFlags, RecordType};
pub use error::EngineError;
pub use rules::{BoolExpr, CompareOp, CritTarget, CritValue, Criterion, FileClass, FileClassSet, PolicyRule, RuleMatch, RuleSet};
pub use services::{
    ActionParams, ActionScheduler, EntryCursor, EntryStore, FsAccess, FsStat, PolicyAction,
    PostAction, SchedItem, SchedStatus, SortAttr, SortOrder, StoreFilter,
};
pub use status_manager::{RecordAction, SmInstance, SmRegistry, StatusManager};
pub use value_objects::{AttrMask, Counters, InfoDef, InfoValue, RunSummary, StdAttr, UpdateParams};
