// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bundled Status-Manager Modules
//!
//! Status managers shipped with the engine, each a data-driven
//! [`StatusManager`] descriptor plus free functions:
//!
//! - [`basic`] — statuses `ok`/`failed` driven by the action return code
//! - [`checker`] — periodic command execution with `last_check`,
//!   `last_success` and captured `output`
//! - [`alerter`] — raise/clear alerts with `last_check`/`last_alert`
//! - [`modeguard`] — enforce access-mode bits (shared manager)
//!
//! [`StatusManager`]: fswarden_domain::status_manager::StatusManager

pub mod alerter;
pub mod basic;
pub mod checker;
pub mod modeguard;

use fswarden_domain::error::EngineError;
use fswarden_domain::status_manager::SmRegistry;

/// Registers every bundled module with the registry. The built-in
/// `basic` manager of the registry is replaced by the richer one here
/// only if loading order permits; duplicate registration is not an error
/// for the caller.
pub fn register_all(reg: &mut SmRegistry) -> Result<(), EngineError> {
    // 'basic' already exists as a built-in; upgrade attempts are ignored
    let _ = reg.register_manager(basic::descriptor());
    reg.register_manager(checker::descriptor())?;
    reg.register_manager(alerter::descriptor())?;
    reg.register_manager(modeguard::descriptor(modeguard::DEFAULT_MODE_MASK))?;
    Ok(())
}
