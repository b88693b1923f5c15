// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Policy Actions
//!
//! The dispatch contract between a policy run and the per-module action
//! backends. The backends themselves (HSM bind, copy-to-backend, chmod,
//! external commands) are external collaborators; this module defines what
//! a policy *declares* and what the engine hands to whatever executes it.
//!
//! ## Action forms
//!
//! - [`PolicyAction::None`] — the policy records a decision but performs no
//!   side effect (e.g. alert policies)
//! - [`PolicyAction::Function`] — a named native function
//! - [`PolicyAction::Command`] — an argv template, substituted per §
//!   placeholder rules and executed by the engine
//!
//! After a successful action, the [`PostAction`] advisory tells the run
//! engine what to do with the row: keep and update it, remove the acted-on
//! name, or remove the whole entry.

use crate::entities::attr_set::AttrSet;
use crate::entities::entry_id::EntryId;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What to do with the entry's row after a successful action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostAction {
    /// Leave the row alone.
    None,
    /// Update the row with the refreshed attributes (default).
    #[default]
    Update,
    /// Remove the acted-on name; the inode row stays while links remain.
    RmOne,
    /// Remove the entry entirely.
    RmAll,
}

/// Key/value parameters passed to an action, after placeholder
/// substitution. Later merges override earlier values key-by-key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionParams(BTreeMap<String, String>);

impl ActionParams {
    pub fn new() -> ActionParams {
        ActionParams::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Overlays `other` on top of `self` (other wins per key).
    pub fn merge_from(&mut self, other: &ActionParams) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Mutates every value in place (placeholder substitution pass).
    pub fn map_values<F>(&mut self, mut f: F) -> Result<(), EngineError>
    where
        F: FnMut(&str, &str) -> Result<String, EngineError>,
    {
        let mut out = BTreeMap::new();
        for (k, v) in &self.0 {
            out.insert(k.clone(), f(k, v)?);
        }
        self.0 = out;
        Ok(())
    }
}

impl FromIterator<(String, String)> for ActionParams {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        ActionParams(iter.into_iter().collect())
    }
}

/// A native action implementation.
///
/// The `&mut String` argument collects the action's output (for status
/// managers that persist it, e.g. a checker's `output` attribute).
pub type ActionFunc = Arc<
    dyn Fn(&EntryId, &mut AttrSet, &ActionParams, &mut String) -> Result<PostAction, EngineError>
        + Send
        + Sync,
>;

/// The action a policy declares.
#[derive(Clone, Default)]
pub enum PolicyAction {
    /// Not configured; running it is a configuration error.
    #[default]
    Unset,
    /// Explicitly no side effect.
    None,
    /// A named native function.
    Function { name: String, func: ActionFunc },
    /// An argv template; `{placeholders}` are substituted, shell-quoted,
    /// and the command is executed by the engine.
    Command(Vec<String>),
}

impl PolicyAction {
    pub fn function(name: impl Into<String>, func: ActionFunc) -> PolicyAction {
        PolicyAction::Function {
            name: name.into(),
            func,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, PolicyAction::Unset)
    }
}

impl fmt::Debug for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyAction::Unset => f.write_str("Unset"),
            PolicyAction::None => f.write_str("None"),
            PolicyAction::Function { name, .. } => write!(f, "Function({})", name),
            PolicyAction::Command(argv) => write!(f, "Command({:?})", argv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_merge_order() {
        let mut base = ActionParams::new();
        base.set("class", "default");
        base.set("target", "pool0");

        let mut over = ActionParams::new();
        over.set("target", "pool1");

        base.merge_from(&over);
        assert_eq!(base.get("target"), Some("pool1"));
        assert_eq!(base.get("class"), Some("default"));
    }

    #[test]
    fn test_map_values() {
        let mut p = ActionParams::new();
        p.set("path", "{fspath}/x");
        p.map_values(|_, v| Ok(v.replace("{fspath}", "/fs"))).unwrap();
        assert_eq!(p.get("path"), Some("/fs/x"));
    }

    #[test]
    fn test_action_debug_hides_closures() {
        let a = PolicyAction::function("noop", Arc::new(|_, _, _, _| Ok(PostAction::Update)));
        assert_eq!(format!("{:?}", a), "Function(noop)");
    }
}
