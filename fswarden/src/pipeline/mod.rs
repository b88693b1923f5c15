// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Entry-Processor Pipeline
//!
//! The staged, partially parallel dataflow that ingests events (full-scan
//! entries or changelog records), coalesces them, enriches them with
//! filesystem and store attributes, and emits batched write operations.
//!
//! ## Stages
//!
//! See [`stages`] for the fixed stage table. Operations enter at get-ID
//! (scan entries and identity-less unlinks) or directly at get-info-DB
//! (changelog records), and leave by being dropped — after the
//! changelog-clear callback for record-driven operations, after the store
//! write otherwise.
//!
//! ## Modules
//!
//! - [`op`] — the operation value moved between stages
//! - [`stages`] — stage table and scheduling flags
//! - [`collapse`] — peephole coalescing of queued changelog records
//! - [`logrec`] — per-record interpretation (taxonomy table + status
//!   managers' amendments)
//! - [`handlers`] — the stage handlers themselves
//! - [`processor`] — the worker pool, bounded capacity, identity
//!   constraint and record-order clear gate

pub mod collapse;
pub mod handlers;
pub mod logrec;
pub mod op;
pub mod processor;
pub mod stages;

pub use op::{DbOpType, OpCallback, OpSource, PipelineOp};
pub use processor::EntryProcessor;

use fswarden_domain::rules::FileClassSet;
use fswarden_domain::services::entry_store::EntryStore;
use fswarden_domain::services::fs_access::FsAccess;
use fswarden_domain::status_manager::SmRegistry;
use fswarden_domain::value_objects::attr_mask::AttrMask;
use fswarden_domain::value_objects::update_policy::UpdateParams;
use fswarden_domain::EntryId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tunables of the entry processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads.
    pub nb_threads: usize,
    /// Maximum operations in flight; producers block past this.
    pub queue_limit: usize,
    /// Maximum operations per batched store write.
    pub max_batch_size: usize,
    /// Evaluate fileclass definitions while processing entries.
    pub match_classes: bool,
    /// Distrust record/stat mtimes older than the recorded creation time.
    pub detect_fake_mtime: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            nb_threads: 8,
            queue_limit: 1000,
            max_batch_size: 100,
            match_classes: true,
            detect_fake_mtime: false,
        }
    }
}

/// Shared, read-only context of the pipeline: collaborators, registries
/// and configuration, built once at startup.
pub struct PipelineCtx {
    pub store: Arc<dyn EntryStore>,
    pub fs: Arc<dyn FsAccess>,
    pub registry: Arc<SmRegistry>,
    pub updt: UpdateParams,
    pub cfg: PipelineConfig,
    pub fileclasses: FileClassSet,
    /// Identity of the filesystem root, ignored by the pipeline.
    pub root_id: Option<EntryId>,
}

impl PipelineCtx {
    pub fn new(
        store: Arc<dyn EntryStore>,
        fs: Arc<dyn FsAccess>,
        registry: Arc<SmRegistry>,
        updt: UpdateParams,
        cfg: PipelineConfig,
        fileclasses: FileClassSet,
    ) -> PipelineCtx {
        let root_id = fs.get_fid_by_path(fs.root()).ok().flatten();
        PipelineCtx {
            store,
            fs,
            registry,
            updt,
            cfg,
            fileclasses,
            root_id,
        }
    }

    /// Current time, epoch seconds.
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// The prefix every consistent fullpath starts with.
    pub fn root_marker(&self) -> &str {
        self.fs.root().to_str().unwrap_or("/")
    }

    /// Union of the attributes referenced by fileclass definitions.
    pub fn fileclass_mask(&self) -> AttrMask {
        self.fileclasses
            .classes
            .iter()
            .fold(AttrMask::EMPTY, |acc, c| acc | c.definition.attr_need(&self.registry))
    }
}
