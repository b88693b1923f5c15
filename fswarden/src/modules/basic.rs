// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Basic status manager: no info attributes, the status simply mirrors
//! the last action's return code.

use fswarden_domain::status_manager::{ActionHook, ActionCbFn, StatusManager};
use std::sync::Arc;

const STATUS_LIST: &[&str] = &["ok", "failed"]; // + not set

/// Sets the status from the action return code.
fn action_cb() -> ActionCbFn {
    Arc::new(|smi, action_rc, _id, attrs| {
        if action_rc == 0 {
            smi.set_status_attr(attrs, STATUS_LIST[0])
        } else {
            smi.set_status_attr(attrs, STATUS_LIST[1])
        }
    })
}

/// The `basic` status-manager descriptor.
pub fn descriptor() -> StatusManager {
    let mut sm = StatusManager::new("basic", STATUS_LIST);
    sm.action_hook = ActionHook::Cb(action_cb());
    sm
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::{AttrSet, EntryId};
    use fswarden_domain::status_manager::SmRegistry;

    #[test]
    fn test_status_follows_action_rc() {
        let mut reg = SmRegistry::default();
        reg.register_manager(descriptor()).unwrap();
        let idx = reg.create_instance("pol", "basic", None).unwrap();
        reg.update_masks();
        let inst = reg.by_index(idx).unwrap();

        let cb = match &inst.sm().action_hook {
            ActionHook::Cb(cb) => cb.clone(),
            other => panic!("unexpected hook {:?}", other),
        };

        let id = EntryId::fid(0x1, 1, 0);
        let mut attrs = AttrSet::new();
        cb(inst, 0, &id, &mut attrs).unwrap();
        assert_eq!(inst.status_of(&attrs), Some("ok"));

        cb(inst, 2, &id, &mut attrs).unwrap();
        assert_eq!(inst.status_of(&attrs), Some("failed"));
    }
}
