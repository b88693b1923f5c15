// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Status-Manager Framework
//!
//! The polymorphism layer that lets multiple independent "status managers"
//! (archival backend, checker, alerter, access-mode guard, ...) each
//! contribute one status slot, typed info attributes, scope predicates and
//! changelog callbacks, all addressed through compact bitmasks.
//!
//! ## Overview
//!
//! A [`StatusManager`] is a *descriptor*: static metadata (name, status
//! enumeration, info declarations, generic attribute-need masks) plus a
//! record of optional function hooks. There is no inheritance; dispatch is
//! a table lookup by instance index.
//!
//! Managers author their masks *generically* — "my status" is status bit
//! 0, "my info attributes" start at info bit 0 — because they cannot know
//! their slot before registration. The registry (see [`registry`]) assigns
//! each instance a status slot (`smi_index`) and an info-slot range
//! (`sm_info_offset`), and relocates generic masks to actual ones.
//!
//! ## Action hooks
//!
//! Exactly one of two forms wires a manager into action execution:
//!
//! - an **executor** wraps the policy's action call and updates attributes
//!   atomically with the action result (it receives a callable that runs
//!   the actual action);
//! - an **action callback** is a thinner hook invoked after a plain action
//!   with the action's return code, expected only to update the status.

pub mod registry;

use crate::entities::attr_set::AttrSet;
use crate::entities::changelog::ChangelogRecord;
use crate::entities::entry_id::EntryId;
use crate::error::EngineError;
use crate::services::action::{ActionParams, PostAction};
use crate::value_objects::attr_mask::AttrMask;
use crate::value_objects::info_value::InfoDef;
use std::fmt;
use std::sync::Arc;

pub use registry::{SmInstance, SmRegistry};

/// Declaration flags of a status manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmFlags {
    /// A single instance is shared by every policy using the manager.
    pub shared: bool,
    /// The manager handles removed entries (drives soft-remove decisions
    /// and owns columns in the tombstone table).
    pub deleted: bool,
}

/// Action a changelog callback recommends for the record's entry, in
/// increasing priority; the highest across all managers wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RecordAction {
    #[default]
    None,
    /// Soft-remove if the entry is known to the store.
    SoftRmIfExists,
    /// Soft-remove unconditionally.
    SoftRmAlways,
    /// Remove the entry and all its names.
    RmAll,
}

/// Outcome of one manager's changelog callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClCbOutcome {
    /// The manager wants its status refreshed for this entry.
    pub need_status_refresh: bool,
    /// Recommended record action.
    pub action: RecordAction,
}

/// Computes the entry's status; merged output goes into `refreshed`.
pub type GetStatusFn = Arc<
    dyn Fn(&SmInstance, &EntryId, &AttrSet, &mut AttrSet) -> Result<(), EngineError> + Send + Sync,
>;

/// Changelog hook: may refresh attributes and recommend a record action.
pub type ChangelogCbFn = Arc<
    dyn Fn(&SmInstance, &ChangelogRecord, &EntryId, &AttrSet, &mut AttrSet) -> Result<ClCbOutcome, EngineError>
        + Send
        + Sync,
>;

/// Decides what to do with an entry that vanished from the filesystem
/// (tombstone, plain removal, nothing).
pub type SoftrmFilterFn =
    Arc<dyn Fn(&SmInstance, &EntryId, &AttrSet) -> RecordAction + Send + Sync>;

/// Optional startup hook, called once per instance in registration order.
pub type InitFn = Arc<dyn Fn(&SmInstance) -> Result<(), EngineError> + Send + Sync>;

/// The callable an executor uses to run the wrapped action. The `&mut
/// String` collects the action's output.
pub type ActionCall<'a> = &'a mut dyn FnMut(
    &EntryId,
    &mut AttrSet,
    &ActionParams,
    &mut String,
) -> Result<PostAction, EngineError>;

/// Executor form: wraps the action call and updates attributes atomically
/// with its result.
pub type ExecutorFn = Arc<
    dyn for<'a> Fn(
            &SmInstance,
            ActionCall<'a>,
            &EntryId,
            &mut AttrSet,
            &ActionParams,
        ) -> Result<PostAction, EngineError>
        + Send
        + Sync,
>;

/// Thin post-action hook: receives the action's return code (0 on
/// success) and updates the status.
pub type ActionCbFn =
    Arc<dyn Fn(&SmInstance, i32, &EntryId, &mut AttrSet) -> Result<(), EngineError> + Send + Sync>;

/// How a manager participates in action execution.
#[derive(Clone, Default)]
pub enum ActionHook {
    #[default]
    None,
    Executor(ExecutorFn),
    Cb(ActionCbFn),
}

impl fmt::Debug for ActionHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionHook::None => f.write_str("None"),
            ActionHook::Executor(_) => f.write_str("Executor"),
            ActionHook::Cb(_) => f.write_str("Cb"),
        }
    }
}

/// Per-manager configuration sub-handler. The registry wraps all handlers
/// into one composite iterating instances in registration order.
pub trait SmConfigHandler: Send + Sync {
    /// Configuration block name.
    fn block_name(&self) -> &str;

    /// The default configuration value.
    fn default_config(&self) -> serde_json::Value;

    /// Parses and validates a configuration value without applying it.
    fn read(&self, cfg: &serde_json::Value) -> Result<(), EngineError>;

    /// Applies a configuration value. With `reload`, dynamic fields are
    /// swapped and non-dynamic changes are refused individually.
    fn set_config(&self, cfg: &serde_json::Value, reload: bool) -> Result<(), EngineError>;

    /// Appends a commented configuration template.
    fn write_template(&self, out: &mut String);
}

/// A status-manager descriptor.
#[derive(Clone)]
pub struct StatusManager {
    pub name: &'static str,
    pub flags: SmFlags,
    /// Ordered status values; the empty status ("not set") is implicit.
    pub status_enum: &'static [&'static str],
    /// Declared info attributes, in local slot order.
    pub info_types: Vec<InfoDef>,
    /// Generic mask: attributes the status computation can take from the
    /// store.
    pub status_needs_cached: AttrMask,
    /// Generic mask: attributes the status computation needs fresh from
    /// the filesystem.
    pub status_needs_fresh: AttrMask,
    /// Generic mask: columns to preserve in the tombstone table
    /// (deleted-managers only).
    pub softrm_table_mask: AttrMask,
    /// Generic mask: attributes the softrm filter examines
    /// (deleted-managers only).
    pub softrm_filter_mask: AttrMask,
    pub get_status: Option<GetStatusFn>,
    pub changelog_cb: Option<ChangelogCbFn>,
    pub softrm_filter: Option<SoftrmFilterFn>,
    pub init: Option<InitFn>,
    pub action_hook: ActionHook,
    /// Validates action names this manager implements (`check_action_name`).
    pub check_action_name: Option<fn(&str) -> bool>,
    pub cfg_handler: Option<Arc<dyn SmConfigHandler>>,
}

impl StatusManager {
    /// A descriptor with the given name and status enumeration, no info
    /// attributes and no hooks. Modules fill in what they implement.
    pub fn new(name: &'static str, status_enum: &'static [&'static str]) -> StatusManager {
        StatusManager {
            name,
            flags: SmFlags::default(),
            status_enum,
            info_types: Vec::new(),
            status_needs_cached: AttrMask::EMPTY,
            status_needs_fresh: AttrMask::EMPTY,
            softrm_table_mask: AttrMask::EMPTY,
            softrm_filter_mask: AttrMask::EMPTY,
            get_status: None,
            changelog_cb: None,
            softrm_filter: None,
            init: None,
            action_hook: ActionHook::None,
            check_action_name: None,
            cfg_handler: None,
        }
    }

    /// Number of declared info attributes.
    pub fn nb_info(&self) -> usize {
        self.info_types.len()
    }

    /// The interned index of a status string, validated against the
    /// enumeration.
    pub fn status_index(&self, value: &str) -> Option<u8> {
        self.status_enum
            .iter()
            .position(|s| *s == value)
            .map(|i| i as u8)
    }

    /// Renders an interned status index.
    pub fn status_name(&self, index: u8) -> Option<&'static str> {
        self.status_enum.get(index as usize).copied()
    }

    /// Comma-separated list of allowed status values, for diagnostics.
    pub fn allowed_status_str(&self) -> String {
        let mut out = String::from("\"\"(empty)");
        for s in self.status_enum {
            out.push(',');
            out.push_str(s);
        }
        out
    }
}

impl fmt::Debug for StatusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusManager")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("status_enum", &self.status_enum)
            .field("nb_info", &self.nb_info())
            .field("action_hook", &self.action_hook)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_interning() {
        let sm = StatusManager::new("checker", &["ok", "failed"]);
        assert_eq!(sm.status_index("ok"), Some(0));
        assert_eq!(sm.status_index("failed"), Some(1));
        assert_eq!(sm.status_index("bogus"), None);
        assert_eq!(sm.status_name(1), Some("failed"));
        assert_eq!(sm.status_name(2), None);
    }

    #[test]
    fn test_record_action_priority() {
        assert!(RecordAction::RmAll > RecordAction::SoftRmAlways);
        assert!(RecordAction::SoftRmAlways > RecordAction::SoftRmIfExists);
        assert!(RecordAction::SoftRmIfExists > RecordAction::None);
    }

    #[test]
    fn test_allowed_status_str() {
        let sm = StatusManager::new("basic", &["ok", "failed"]);
        assert_eq!(sm.allowed_status_str(), "\"\"(empty),ok,failed");
    }
}
