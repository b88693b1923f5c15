// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Alerter status manager: raises and clears alerts on filesystem
//! entries. The action parameter `alert = raise|clear` selects the
//! transition; `last_check` and `last_alert` keep the audit trail.

use chrono::Utc;
use fswarden_domain::error::EngineError;
use fswarden_domain::status_manager::{ActionHook, ExecutorFn, StatusManager};
use fswarden_domain::value_objects::info_value::{CritType, InfoDef, InfoType};
use std::sync::Arc;
use tracing::warn;

const STATUS_LIST: &[&str] = &["clear", "alert"];

/// Local info slots.
pub const ATTR_LAST_CHECK: usize = 0;
pub const ATTR_LAST_ALERT: usize = 1;

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
            user_name: "last_alert",
            db_name: "lstalrt",
            db_type: InfoType::Duration,
            size: 0,
            default: None,
            crit_type: CritType::Duration,
        },
    ]
}

fn executor() -> ExecutorFn {
    Arc::new(|smi, call, id, attrs, params| {
        let new_status = match params.get("alert") {
            Some(v) if v.eq_ignore_ascii_case("clear") => "clear",
            Some(v) if v.eq_ignore_ascii_case("raise") => "alert",
            Some(v) => {
                warn!(%id, value = v, "invalid value for 'alert' action parameter: 'raise' or 'clear' expected");
                return Err(EngineError::invalid_config(
                    "invalid 'alert' parameter: 'raise' or 'clear' expected",
                ));
            }
            None => {
                warn!(%id, "missing action parameter 'alert = raise/clear' for 'alerter' status manager");
                return Err(EngineError::invalid_config(
                    "missing 'alert' action parameter",
                ));
            }
        };

        let mut out = String::new();
        let post = call(id, attrs, params, &mut out)?;

        let now = Utc::now().timestamp() as u64;
        smi.set_uint_info(attrs, ATTR_LAST_CHECK, now)?;
        smi.set_status_attr(attrs, new_status)?;
        if new_status == "alert" {
            smi.set_uint_info(attrs, ATTR_LAST_ALERT, now)?;
        }
        Ok(post)
    })
}

/// The `alerter` status-manager descriptor.
pub fn descriptor() -> StatusManager {
    let mut sm = StatusManager::new("alerter", STATUS_LIST);
    sm.info_types = info_defs();
    sm.action_hook = ActionHook::Executor(executor());
    sm
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::{AttrSet, EntryId};
    use fswarden_domain::services::action::{ActionParams, PostAction};
    use fswarden_domain::status_manager::SmRegistry;

    fn setup() -> (SmRegistry, usize) {
        let mut reg = SmRegistry::default();
        reg.register_manager(descriptor()).unwrap();
        let idx = reg.create_instance("alert_pol", "alerter", None).unwrap();
        reg.update_masks();
        (reg, idx)
    }

    fn noop_call() -> impl FnMut(
        &EntryId,
        &mut AttrSet,
        &ActionParams,
        &mut String,
    ) -> Result<PostAction, EngineError> {
        |_, _, _, _| Ok(PostAction::Update)
    }

    #[test]
    fn test_raise_and_clear() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let exec = match &inst.sm().action_hook {
            ActionHook::Executor(e) => e.clone(),
            other => panic!("unexpected hook {:?}", other),
        };
        let id = EntryId::fid(0x1, 1, 0);
        let mut attrs = AttrSet::new();

        let mut params = ActionParams::new();
        params.set("alert", "raise");
        let mut call = noop_call();
        exec(inst, &mut call, &id, &mut attrs, &params).unwrap();
        assert_eq!(inst.status_of(&attrs), Some("alert"));
        assert!(inst.get_sm_info(&attrs, ATTR_LAST_ALERT).is_some());

        params.set("alert", "clear");
        let mut call = noop_call();
        exec(inst, &mut call, &id, &mut attrs, &params).unwrap();
        assert_eq!(inst.status_of(&attrs), Some("clear"));
    }

    #[test]
    fn test_missing_parameter_is_an_error() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let exec = match &inst.sm().action_hook {
            ActionHook::Executor(e) => e.clone(),
            other => panic!("unexpected hook {:?}", other),
        };
        let id = EntryId::fid(0x1, 2, 0);
        let mut attrs = AttrSet::new();
        let mut call = noop_call();
        let rc = exec(inst, &mut call, &id, &mut attrs, &ActionParams::new());
        assert!(rc.is_err());
        // the status is untouched when the parameters are invalid
        assert_eq!(inst.status_of(&attrs), None);
    }
}
