// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # FSWarden
//!
//! A policy-driven data-management engine for large POSIX filesystems
//! (with optional native support for filesystems exposing persistent
//! identifiers and changelog streams). It mirrors the filesystem
//! namespace into a relational store, classifies entries against
//! user-defined rules, and applies lifecycle actions according to
//! time-based policies and quantitative triggers.
//!
//! ## Architecture
//!
//! Three tightly-interlocked subsystems form the core:
//!
//! - [`pipeline`] — the entry-processor: a staged, partially parallel
//!   dataflow ingesting scan entries and changelog records, coalescing
//!   them, enriching them with filesystem and store attributes, and
//!   emitting batched write operations
//! - [`policy`] — the run engine: ordered candidate scans, per-entry
//!   revalidation, rule matching and bounded-concurrency action
//!   execution behind a pluggable scheduler stack, plus triggers and
//!   outstanding-action recovery
//! - the status-manager framework (in [`fswarden_domain`]) — pluggable
//!   providers of per-entry statuses and typed attributes, addressed via
//!   compact bitmasks; bundled implementations live in [`modules`]
//!
//! The domain crate [`fswarden_domain`] holds the business types and the
//! collaborator ports; [`infrastructure`] provides the in-process
//! adapters (POSIX filesystem access, in-memory store for tests and
//! demos). Production deployments plug a relational driver behind the
//! [`EntryStore`](fswarden_domain::services::entry_store::EntryStore)
//! trait.
//!
//! ## Concurrency model
//!
//! Parallel OS threads with synchronous I/O and bounded queues for
//! backpressure; no cooperative scheduler. Registries and mask layouts
//! are built at startup and immutable after publication.

pub mod infrastructure;
pub mod modules;
pub mod pipeline;
pub mod policy;

pub use fswarden_domain as domain;
pub use pipeline::{EntryProcessor, PipelineConfig, PipelineCtx, PipelineOp};
pub use policy::{PolicyDescriptor, PolicyRun, PolicyRunConfig, RunParams, RunTarget, TriggerConfig};
