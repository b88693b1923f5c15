// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Stage Table
//!
//! The fixed stage sequence of the entry processor, with per-stage
//! scheduling constraints. Stage indices are frozen: operations carry them
//! and the constraint machinery keys off them.

/// Stage indices (0-based, fixed).
pub const STAGE_GET_ID: usize = 0;
pub const STAGE_GET_INFO_DB: usize = 1;
pub const STAGE_GET_INFO_FS: usize = 2;
pub const STAGE_PRE_APPLY: usize = 3;
pub const STAGE_DB_APPLY: usize = 4;
pub const STAGE_CHGLOG_CLR: usize = 5;
pub const STAGE_RM_OLD_ENTRIES: usize = 6;

/// Number of stages.
pub const STAGE_COUNT: usize = 7;

/// How a stage admits concurrent operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageConcurrency {
    /// Any number of workers.
    Parallel,
    /// At most `n` workers.
    MaxThreads(usize),
    /// One at a time, in submission order (record order for the
    /// changelog-clear stage).
    Sequential,
}

/// One stage of the pipeline.
#[derive(Debug, Clone)]
pub struct StageDef {
    pub index: usize,
    pub name: &'static str,
    pub concurrency: StageConcurrency,
    /// No two operations with the same identity may be concurrently past
    /// this stage.
    pub id_constraint: bool,
}

/// The standard stage table. `db_single_writer` caps the DB-apply stage at
/// one thread for stores that lock the whole database on writes.
pub fn std_stages(db_single_writer: bool) -> Vec<StageDef> {
    vec![
        StageDef {
            index: STAGE_GET_ID,
            name: "STAGE_GET_ID",
            concurrency: StageConcurrency::Parallel,
            id_constraint: false,
        },
        StageDef {
            index: STAGE_GET_INFO_DB,
            name: "STAGE_GET_INFO_DB",
            concurrency: StageConcurrency::Parallel,
            id_constraint: true,
        },
        StageDef {
            index: STAGE_GET_INFO_FS,
            name: "STAGE_GET_INFO_FS",
            concurrency: StageConcurrency::Parallel,
            id_constraint: false,
        },
        StageDef {
            index: STAGE_PRE_APPLY,
            name: "STAGE_PRE_APPLY",
            concurrency: StageConcurrency::Parallel,
            id_constraint: false,
        },
        StageDef {
            index: STAGE_DB_APPLY,
            name: "STAGE_DB_APPLY",
            concurrency: if db_single_writer {
                StageConcurrency::MaxThreads(1)
            } else {
                StageConcurrency::Parallel
            },
            id_constraint: false,
        },
        // committing changelog records must follow the record order
        StageDef {
            index: STAGE_CHGLOG_CLR,
            name: "STAGE_CHGLOG_CLR",
            concurrency: StageConcurrency::Sequential,
            id_constraint: false,
        },
        StageDef {
            index: STAGE_RM_OLD_ENTRIES,
            name: "STAGE_RM_OLD_ENTRIES",
            concurrency: StageConcurrency::Sequential,
            id_constraint: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_table_shape() {
        let stages = std_stages(false);
        assert_eq!(stages.len(), STAGE_COUNT);
        for (i, s) in stages.iter().enumerate() {
            assert_eq!(s.index, i);
        }
        assert!(stages[STAGE_GET_INFO_DB].id_constraint);
        assert_eq!(stages[STAGE_CHGLOG_CLR].concurrency, StageConcurrency::Sequential);
    }

    #[test]
    fn test_single_writer_caps_db_apply() {
        let stages = std_stages(true);
        assert_eq!(
            stages[STAGE_DB_APPLY].concurrency,
            StageConcurrency::MaxThreads(1)
        );
    }
}
