// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Update Policy
//!
//! Decides whether a cached attribute family (metadata, path, fileclass)
//! is fresh enough to use, or must be re-read from the filesystem /
//! re-matched against fileclass definitions.
//!
//! ## Overview
//!
//! Each family carries an [`UpdatePolicy`]:
//!
//! - `never` — read the information once, never refresh it
//! - `always` — refresh every time the entry is processed
//! - `on_event` — refresh only when a related changelog event arrives
//! - `periodic(max)` — refresh when the cached value is older than `max`
//! - `on_event_periodic(min, max)` — refresh on event (rate-limited by
//!   `min`) and in any case when older than `max`
//!
//! The fileclass family only supports `never`/`always`/`periodic`;
//! event-driven modes are rejected when the parameters are set.
//!
//! The evaluator also detects *partial paths*: a cached fullpath that does
//! not start with the filesystem root marker is stale by construction and
//! forces a path refresh regardless of the policy.

use crate::entities::attr_set::AttrSet;
use crate::error::EngineError;
use crate::value_objects::attr_mask::StdAttr;
use serde::{Deserialize, Serialize};

/// Refresh strategy for one attribute family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "when")]
pub enum UpdatePolicy {
    Never,
    Always,
    OnEvent,
    Periodic {
        max_secs: u64,
    },
    OnEventPeriodic {
        min_secs: u64,
        max_secs: u64,
    },
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        UpdatePolicy::Always
    }
}

/// The attribute family an update decision is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFamily {
    Metadata,
    Path,
}

/// Outcome of an update decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateDecision {
    /// The cached information must be refreshed now.
    pub update: bool,
    /// No refresh now, but a related event should trigger one.
    pub may_update_on_event: bool,
}

impl UpdateDecision {
    const UPDATE: UpdateDecision = UpdateDecision {
        update: true,
        may_update_on_event: false,
    };
    const KEEP: UpdateDecision = UpdateDecision {
        update: false,
        may_update_on_event: false,
    };
    const ON_EVENT: UpdateDecision = UpdateDecision {
        update: false,
        may_update_on_event: true,
    };
}

/// Update policies for the three cached families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UpdateParams {
    pub md: UpdatePolicy,
    pub path: UpdatePolicy,
    pub fileclass: UpdatePolicy,
}

impl UpdateParams {
    /// The defaults used when no update block is configured: metadata is
    /// always refreshed, paths refresh on event with a 1h periodic
    /// fallback, fileclasses always re-match.
    pub fn standard() -> UpdateParams {
        UpdateParams {
            md: UpdatePolicy::Always,
            path: UpdatePolicy::OnEventPeriodic {
                min_secs: 0,
                max_secs: 3600,
            },
            fileclass: UpdatePolicy::Always,
        }
    }

    /// Validates the parameter set. Event-driven fileclass matching is not
    /// supported: an entry's class must be computable from cached rows.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.fileclass {
            UpdatePolicy::OnEvent | UpdatePolicy::OnEventPeriodic { .. } => {
                Err(EngineError::invalid_config(
                    "fileclass_update: 'never', 'always' or 'periodic' expected",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Decides whether metadata or path information must be refreshed.
    ///
    /// `root_marker` is the filesystem root prefix a valid fullpath must
    /// start with; a cached path outside it is partial and forces an
    /// update.
    pub fn need_info_update(
        &self,
        attrs: &AttrSet,
        family: UpdateFamily,
        root_marker: &str,
        now: i64,
    ) -> UpdateDecision {
        let (policy, last) = match family {
            UpdateFamily::Metadata => (self.md, attrs.md_update()),
            UpdateFamily::Path => (self.path, attrs.path_update()),
        };

        // no last-update timestamp: information was never stored
        let last = match last {
            Some(t) => t,
            None => return UpdateDecision::UPDATE,
        };

        // partial path detection
        if family == UpdateFamily::Path {
            if let Some(path) = attrs.fullpath() {
                if !path.starts_with(root_marker) {
                    return UpdateDecision::UPDATE;
                }
            }
        }

        match policy {
            UpdatePolicy::Always => UpdateDecision::UPDATE,
            UpdatePolicy::Never => UpdateDecision::KEEP,
            UpdatePolicy::OnEvent => UpdateDecision::ON_EVENT,
            UpdatePolicy::Periodic { max_secs } => {
                if now.saturating_sub(last) >= max_secs as i64 {
                    UpdateDecision::UPDATE
                } else {
                    UpdateDecision::KEEP
                }
            }
            UpdatePolicy::OnEventPeriodic { min_secs, max_secs } => {
                let age = now.saturating_sub(last);
                if age < min_secs as i64 {
                    UpdateDecision::KEEP
                } else if age >= max_secs as i64 {
                    UpdateDecision::UPDATE
                } else {
                    UpdateDecision::ON_EVENT
                }
            }
        }
    }

    /// Decides whether the entry's fileclass must be re-matched.
    pub fn need_fileclass_update(&self, attrs: &AttrSet, now: i64) -> bool {
        let is_set = attrs.mask().test_std(StdAttr::ClassUpdate) && attrs.mask().test_std(StdAttr::Fileclass);
        if !is_set {
            return true;
        }
        let last = attrs.class_update().unwrap_or(0);

        match self.fileclass {
            UpdatePolicy::Always => true,
            UpdatePolicy::Never => false,
            UpdatePolicy::Periodic { max_secs } => now.saturating_sub(last) >= max_secs as i64,
            // rejected by validate(); treated as 'always' if it slips through
            UpdatePolicy::OnEvent | UpdatePolicy::OnEventPeriodic { .. } => true,
        }
    }
}
