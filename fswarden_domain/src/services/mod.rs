// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Collaborator Ports
//!
//! Traits for the external collaborators the engine consumes but does not
//! implement:
//!
//! - [`entry_store::EntryStore`] — the relational store mirroring the
//!   namespace
//! - [`fs_access::FsAccess`] — the managed filesystem
//! - [`action`] — the action dispatch contract
//! - [`scheduler::ActionScheduler`] — admission controllers between
//!   candidate selection and action execution

pub mod action;
pub mod entry_store;
pub mod fs_access;
pub mod scheduler;

pub use action::{ActionFunc, ActionParams, PolicyAction, PostAction};
pub use entry_store::{
    EntryCursor, EntryStore, FilterAttr, FilterItem, FilterOp, FilterValue, IterOpts, SortAttr,
    SortOrder, StoreFilter, VAR_LAST_SCAN_END_TIME,
};
pub use fs_access::{FsAccess, FsStat};
pub use scheduler::{ActionScheduler, SchedCallback, SchedDecision, SchedItem, SchedStatus};
