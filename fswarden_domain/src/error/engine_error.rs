// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the fswarden
//! domain. It categorizes failures, provides actionable error messages, and
//! supports both automated handling (vanished entries, transient store
//! failures) and human-readable diagnostics.
//!
//! ## Overview
//!
//! The error system is designed around a few principles:
//!
//! - **Domain-Specific**: Errors are tailored to namespace-management
//!   concepts (entries, attributes, status slots, policy runs)
//! - **Categorized**: Errors are grouped so callers can handle whole
//!   families systematically (e.g. everything transient on the filesystem
//!   side collapses into [`EngineError::EntryVanished`])
//! - **Type-Safe**: every fallible function returns `Result<_, EngineError>`
//! - **Cloneable**: errors can be duplicated into logs and run summaries
//!   without borrowing complications
//!
//! ## Error Categories
//!
//! - **Configuration**: [`EngineError::InvalidConfiguration`],
//!   [`EngineError::CapacityExceeded`] — fatal at startup, individually
//!   rejected at reload
//! - **Entry lookup**: [`EngineError::EntryVanished`] (ENOENT/ESTALE
//!   equivalents, never surfaced as run errors),
//!   [`EngineError::MissingAttribute`]
//! - **Collaborators**: [`EngineError::StoreError`],
//!   [`EngineError::FilesystemError`]
//! - **Actions**: [`EngineError::ActionFailed`] — counted toward the
//!   suspension heuristic, never retried within a pass
//! - **Lifecycle**: [`EngineError::Cancelled`], [`EngineError::NotReady`]
//! - **Bugs**: [`EngineError::InternalError`] — the only "should not
//!   happen" signal; the mask-overflow check at registration reports
//!   [`EngineError::CapacityExceeded`] instead of panicking

use thiserror::Error;

/// Domain-specific errors for the fswarden policy engine.
///
/// Each variant includes a descriptive message and is designed to provide
/// clear information about what went wrong and potentially how to fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A status or info slot would overflow the fixed-width mask words.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// An attribute required by the caller is absent from the attribute set.
    #[error("Missing attribute: {0}")]
    MissingAttribute(String),

    /// The entry disappeared between candidate selection and use
    /// (ENOENT/ESTALE on the filesystem side).
    #[error("Entry vanished: {0}")]
    EntryVanished(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    /// A policy action returned a non-zero result.
    #[error("Action failed (rc={rc}): {message}")]
    ActionFailed { rc: i32, message: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A precondition for the requested run is not met (e.g. no completed
    /// scan when a policy run needs a candidate list).
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    /// Creates a new missing-attribute error
    pub fn missing_attr(msg: impl Into<String>) -> Self {
        Self::MissingAttribute(msg.into())
    }

    /// Creates a new vanished-entry error
    pub fn vanished(msg: impl Into<String>) -> Self {
        Self::EntryVanished(msg.into())
    }

    /// Creates a new store error
    pub fn store_error(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    /// Creates a new filesystem error
    pub fn fs_error(msg: impl Into<String>) -> Self {
        Self::FilesystemError(msg.into())
    }

    /// Creates a new action failure
    pub fn action_failed(rc: i32, msg: impl Into<String>) -> Self {
        Self::ActionFailed {
            rc,
            message: msg.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Checks whether the error means the target entry no longer exists.
    ///
    /// Vanished entries trigger the remove-or-soft-remove decision instead
    /// of being reported as policy-run errors.
    pub fn is_vanished(&self) -> bool {
        matches!(self, EngineError::EntryVanished(_))
    }

    /// Checks if the error is recoverable by retrying later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::StoreError(_) | EngineError::FilesystemError(_))
    }

    /// Returns the error category for logging and summaries
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::InvalidConfiguration(_) | EngineError::CapacityExceeded(_) => "configuration",
            EngineError::MissingAttribute(_) => "missing_md",
            EngineError::EntryVanished(_) => "vanished",
            EngineError::StoreError(_) => "store",
            EngineError::FilesystemError(_) => "filesystem",
            EngineError::ActionFailed { .. } => "action",
            EngineError::InvalidValue(_) => "value",
            EngineError::NotReady(_) => "not_ready",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::InternalError(_) => "internal",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound | ErrorKind::StaleNetworkFileHandle => {
                EngineError::EntryVanished(err.to_string())
            }
            _ => EngineError::FilesystemError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::invalid_config("missing scope");
        assert_eq!(err.to_string(), "Invalid configuration: missing scope");

        let err = EngineError::action_failed(2, "archive command");
        assert_eq!(err.to_string(), "Action failed (rc=2): archive command");
    }

    #[test]
    fn test_vanished_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: EngineError = io.into();
        assert!(err.is_vanished());
        assert_eq!(err.category(), "vanished");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(EngineError::store_error("deadlock").is_recoverable());
        assert!(!EngineError::invalid_config("bad").is_recoverable());
        assert!(!EngineError::cancelled("run aborted").is_recoverable());
    }
}
