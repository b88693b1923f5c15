// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Checker status manager: runs actions on entries (checksum, virus
//! scan, ...) and stores the result so the next execution can compare.
//!
//! Maintains a `last_check` criterion so rules can express a check
//! interval (e.g. `checker.last_check > 7d`), a `last_success`
//! timestamp, the last command `output`, and an `ok`/`failed` status.

use chrono::Utc;
use fswarden_domain::status_manager::{ActionHook, ExecutorFn, StatusManager};
use fswarden_domain::value_objects::info_value::{CritType, InfoDef, InfoType, InfoValue};
use std::sync::Arc;
use tracing::{debug, info};

const STATUS_LIST: &[&str] = &["ok", "failed"];

/// Local info slots.
pub const ATTR_LAST_CHECK: usize = 0;
pub const ATTR_LAST_SUCCESS: usize = 1;
pub const ATTR_OUTPUT: usize = 2;

fn info_defs() -> Vec<InfoDef> {
    vec![
        InfoDef {
            user_name: "last_check",
            db_name: "lstchk",
            db_type: InfoType::Duration,
            size: 0,
            default: None,
            crit_type: CritType::Duration,
        },
        InfoDef {
            user_name: "last_success",
            db_name: "lstsuc",
            db_type: InfoType::Duration,
            size: 0,
            default: None,
            crit_type: CritType::Duration,
        },
        // bounded output to limit the store footprint; larger payloads
        // belong in an xattr or an annex table
        InfoDef {
            user_name: "output",
            db_name: "out",
            db_type: InfoType::Text,
            size: 255,
            default: None,
            crit_type: CritType::String,
        },
    ]
}

/// Runs the wrapped action and records `last_check`, `last_success`,
/// `output` and the status atomically with its result.
fn executor() -> ExecutorFn {
    Arc::new(|smi, call, id, attrs, params| {
        let mut out = String::new();
        let result = call(id, attrs, params, &mut out);

        let now = Utc::now().timestamp() as u64;
        smi.set_uint_info(attrs, ATTR_LAST_CHECK, now)?;

        match result {
            Ok(post) => {
                smi.set_status_attr(attrs, "ok")?;
                smi.set_uint_info(attrs, ATTR_LAST_SUCCESS, now)?;
                if !out.is_empty() {
                    debug!(%id, output = out.as_str(), "check command output");
                    smi.set_sm_info(attrs, ATTR_OUTPUT, InfoValue::Text(out))?;
                }
                Ok(post)
            }
            Err(e) => {
                smi.set_status_attr(attrs, "failed")?;
                info!(%id, error = %e, "check command failed");
                Err(e)
            }
        }
    })
}

/// The `checker` status-manager descriptor.
pub fn descriptor() -> StatusManager {
    let mut sm = StatusManager::new("checker", STATUS_LIST);
    sm.info_types = info_defs();
    sm.action_hook = ActionHook::Executor(executor());
    sm
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::{AttrSet, EntryId};
    use fswarden_domain::error::EngineError;
    use fswarden_domain::services::action::{ActionParams, PostAction};
    use fswarden_domain::status_manager::SmRegistry;

    fn setup() -> (SmRegistry, usize) {
        let mut reg = SmRegistry::default();
        reg.register_manager(descriptor()).unwrap();
        let idx = reg.create_instance("check_pol", "checker", None).unwrap();
        reg.update_masks();
        (reg, idx)
    }

    #[test]
    fn test_executor_records_success() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let exec = match &inst.sm().action_hook {
            ActionHook::Executor(e) => e.clone(),
            other => panic!("unexpected hook {:?}", other),
        };

        let id = EntryId::fid(0x1, 1, 0);
        let mut attrs = AttrSet::new();
        let params = ActionParams::new();
        let mut call = |_: &EntryId,
                        _: &mut AttrSet,
                        _: &ActionParams,
                        out: &mut String|
         -> Result<PostAction, EngineError> {
            out.push_str("all good");
            Ok(PostAction::Update)
        };

        let post = exec(inst, &mut call, &id, &mut attrs, &params).unwrap();
        assert_eq!(post, PostAction::Update);
        assert_eq!(inst.status_of(&attrs), Some("ok"));
        assert!(inst.get_sm_info(&attrs, ATTR_LAST_CHECK).is_some());
        assert!(inst.get_sm_info(&attrs, ATTR_LAST_SUCCESS).is_some());
        assert_eq!(
            inst.get_sm_info(&attrs, ATTR_OUTPUT),
            Some(&InfoValue::Text("all good".into()))
        );
    }

    #[test]
    fn test_executor_records_failure() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let exec = match &inst.sm().action_hook {
            ActionHook::Executor(e) => e.clone(),
            other => panic!("unexpected hook {:?}", other),
        };

        let id = EntryId::fid(0x1, 2, 0);
        let mut attrs = AttrSet::new();
        let params = ActionParams::new();
        let mut call = |_: &EntryId,
                        _: &mut AttrSet,
                        _: &ActionParams,
                        _: &mut String|
         -> Result<PostAction, EngineError> {
            Err(EngineError::action_failed(3, "scan found problems"))
        };

        let rc = exec(inst, &mut call, &id, &mut attrs, &params);
        assert!(rc.is_err());
        assert_eq!(inst.status_of(&attrs), Some("failed"));
        // last_check is stamped even on failure, last_success is not
        assert!(inst.get_sm_info(&attrs, ATTR_LAST_CHECK).is_some());
        assert!(inst.get_sm_info(&attrs, ATTR_LAST_SUCCESS).is_none());
    }
}
