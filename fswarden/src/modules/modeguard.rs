// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Modeguard status manager: enforces useful permission bits, like the
//! directory setgid bit on shared project folders. The setgid bit is
//! inherited but users or copy tools may strip it; the sticky bit is not
//! inherited at all.
//!
//! Shared manager: one instance serves every policy that uses it. The
//! status is computed from the fresh `mode` attribute; the guarded bit
//! mask is configurable through the instance's configuration sub-handler
//! (`set_mode_mask`, octal) and reloadable.

use fswarden_domain::entities::AttrSet;
use fswarden_domain::error::EngineError;
use fswarden_domain::services::action::{ActionFunc, PostAction};
use fswarden_domain::status_manager::{GetStatusFn, SmConfigHandler, SmFlags, StatusManager};
use fswarden_domain::value_objects::attr_mask::{AttrMask, StdAttr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

const STATUS_LIST: &[&str] = &["ok", "invalid"];

/// Default guarded bits: directory setgid + sticky.
pub const DEFAULT_MODE_MASK: u32 = 0o3000;

fn get_status(mask: Arc<AtomicU32>) -> GetStatusFn {
    Arc::new(move |smi, id, attrs_in, attrs_changed| {
        let mode = attrs_in
            .mode()
            .ok_or_else(|| EngineError::missing_attr("mode attribute is mandatory for checking entry status"))?;
        let mode_mask = mask.load(Ordering::Acquire);

        debug!(%id, mode = format!("{:o}", mode).as_str(), "modeguard status");

        let status = if mode & mode_mask == mode_mask {
            "ok"
        } else {
            "invalid"
        };
        smi.set_status_attr(attrs_changed, status)
    })
}

/// Configuration sub-handler: one octal `set_mode_mask` parameter,
/// adjustable at reload.
struct ModeGuardConfig {
    mask: Arc<AtomicU32>,
}

impl ModeGuardConfig {
    fn parse_mask(cfg: &serde_json::Value) -> Result<u32, EngineError> {
        let raw = cfg
            .get("set_mode_mask")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::invalid_config("modeguard: 'set_mode_mask' (octal string) expected"))?;
        u32::from_str_radix(raw, 8)
            .map_err(|_| EngineError::invalid_config(format!("modeguard: invalid octal mode '{}'", raw)))
    }
}

impl SmConfigHandler for ModeGuardConfig {
    fn block_name(&self) -> &str {
        "modeguard_config"
    }

    fn default_config(&self) -> serde_json::Value {
        serde_json::json!({ "set_mode_mask": format!("{:o}", DEFAULT_MODE_MASK) })
    }

    fn read(&self, cfg: &serde_json::Value) -> Result<(), EngineError> {
        Self::parse_mask(cfg).map(|_| ())
    }

    fn set_config(&self, cfg: &serde_json::Value, reload: bool) -> Result<(), EngineError> {
        let mask = Self::parse_mask(cfg)?;
        let old = self.mask.swap(mask, Ordering::Release);
        if reload && old != mask {
            info!(
                old = format!("{:o}", old).as_str(),
                new = format!("{:o}", mask).as_str(),
                "modeguard: set_mode_mask updated"
            );
        }
        Ok(())
    }

    fn write_template(&self, out: &mut String) {
        out.push_str("modeguard_config {\n");
        out.push_str("    # permission bits to enforce (octal)\n");
        out.push_str("    set_mode_mask = 3000;\n");
        out.push_str("}\n");
    }
}

/// The restore action: reports the mode the entry should carry; the
/// actual chmod backend is external, so this only computes and stores
/// the target mode in the refreshed attributes.
pub fn enforce_mode_action(mode_mask: u32) -> ActionFunc {
    Arc::new(move |_id, attrs: &mut AttrSet, _params, out| {
        let mode = attrs.mode().unwrap_or(0);
        let target = mode | mode_mask;
        out.push_str(&format!("{:o}", target));
        attrs.set_mode(target);
        Ok(PostAction::Update)
    })
}

/// The `modeguard` status-manager descriptor with the given initial
/// guarded bits (reconfigurable through the config sub-handler).
pub fn descriptor(mode_mask: u32) -> StatusManager {
    let mask = Arc::new(AtomicU32::new(mode_mask));

    let mut sm = StatusManager::new("modeguard", STATUS_LIST);
    sm.flags = SmFlags {
        shared: true,
        deleted: false,
    };
    // the status derives from the mode
    sm.status_needs_fresh = AttrMask::of_std(&[StdAttr::Mode]) | AttrMask::GENERIC_STATUS;
    sm.status_needs_cached = AttrMask::of_std(&[StdAttr::Mode]);
    sm.get_status = Some(get_status(mask.clone()));
    sm.cfg_handler = Some(Arc::new(ModeGuardConfig { mask }));
    sm
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::entities::EntryId;
    use fswarden_domain::status_manager::SmRegistry;

    fn setup() -> (SmRegistry, usize) {
        let mut reg = SmRegistry::default();
        reg.register_manager(descriptor(DEFAULT_MODE_MASK)).unwrap();
        let idx = reg.create_instance("pol_a", "modeguard", None).unwrap();
        reg.update_masks();
        (reg, idx)
    }

    #[test]
    fn test_shared_across_policies() {
        let (mut reg, idx) = setup();
        let idx2 = reg.create_instance("pol_b", "modeguard", None).unwrap();
        assert_eq!(idx, idx2);
        assert_eq!(reg.by_index(idx).unwrap().instance_name, "modeguard");
    }

    #[test]
    fn test_status_from_mode_bits() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let get = inst.sm().get_status.clone().unwrap();
        let id = EntryId::fid(0x1, 1, 0);

        let mut attrs_in = AttrSet::new();
        attrs_in.set_mode(0o3775);
        let mut out = AttrSet::new();
        get(inst, &id, &attrs_in, &mut out).unwrap();
        assert_eq!(inst.status_of(&out), Some("ok"));

        attrs_in.set_mode(0o0775); // setgid/sticky stripped
        let mut out = AttrSet::new();
        get(inst, &id, &attrs_in, &mut out).unwrap();
        assert_eq!(inst.status_of(&out), Some("invalid"));
    }

    #[test]
    fn test_missing_mode_is_an_error() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let get = inst.sm().get_status.clone().unwrap();
        let id = EntryId::fid(0x1, 2, 0);
        let mut out = AttrSet::new();
        assert!(get(inst, &id, &AttrSet::new(), &mut out).is_err());
    }

    #[test]
    fn test_config_reload_changes_guarded_bits() {
        let (reg, idx) = setup();
        let inst = reg.by_index(idx).unwrap();
        let get = inst.sm().get_status.clone().unwrap();
        let id = EntryId::fid(0x1, 3, 0);

        // reconfigure through the composite handler: only setgid now
        let handlers = reg.config_handlers();
        assert_eq!(handlers.len(), 1);
        let (_, handler) = &handlers[0];
        handler.read(&serde_json::json!({ "set_mode_mask": "2000" })).unwrap();
        handler
            .set_config(&serde_json::json!({ "set_mode_mask": "2000" }), true)
            .unwrap();

        let mut attrs_in = AttrSet::new();
        attrs_in.set_mode(0o2775); // setgid only, no sticky
        let mut out = AttrSet::new();
        get(inst, &id, &attrs_in, &mut out).unwrap();
        assert_eq!(inst.status_of(&out), Some("ok"));
    }

    #[test]
    fn test_config_rejects_garbage() {
        let (reg, _) = setup();
        let (_, handler) = &reg.config_handlers()[0];
        assert!(handler.read(&serde_json::json!({ "set_mode_mask": "99x" })).is_err());
        assert!(handler.read(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_enforce_mode_action_restores_bits() {
        let action = enforce_mode_action(DEFAULT_MODE_MASK);
        let id = EntryId::fid(0x1, 3, 0);
        let mut attrs = AttrSet::new();
        attrs.set_mode(0o0755);
        let mut out = String::new();
        let post = action(&id, &mut attrs, &Default::default(), &mut out).unwrap();
        assert_eq!(post, PostAction::Update);
        assert_eq!(attrs.mode(), Some(0o3755));
        assert_eq!(out, "3755");
    }
}
