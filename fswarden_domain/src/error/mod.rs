// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Error Module
//!
//! This module exposes the domain error system for the fswarden policy
//! engine. See [`engine_error`] for the error type itself.

pub mod engine_error;

pub use engine_error::EngineError;
