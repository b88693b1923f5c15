// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Status-Manager Registry
//!
//! Instantiates status managers, assigns each instance its status slot and
//! info-slot range, and relocates generic attribute masks to actual ones.
//!
//! ## Lifecycle
//!
//! 1. [`SmRegistry::register_manager`] makes descriptors loadable by name
//!    (the built-in `basic` manager is always available).
//! 2. [`SmRegistry::create_instance`] is called once per policy; shared
//!    managers return their existing instance. Registration order is
//!    preserved and fixed for the process lifetime.
//! 3. [`SmRegistry::update_masks`] runs after all instances exist and
//!    computes each instance's real `status_mask_fresh`,
//!    `status_mask_cached` and softrm masks.
//! 4. [`SmRegistry::init_all`] calls each instance's optional init hook in
//!    registration order; the first failure aborts startup.
//!
//! After step 4 the registry is published behind an `Arc` and treated as
//! immutable.

use crate::entities::attr_set::AttrSet;
use crate::entities::changelog::ChangelogRecord;
use crate::entities::entry_id::EntryId;
use crate::error::EngineError;
use crate::rules::BoolExpr;
use crate::status_manager::{ClCbOutcome, RecordAction, SmConfigHandler, StatusManager};
use crate::value_objects::attr_mask::{bit_range, AttrMask, MAX_INFO_SLOTS, MAX_STATUS_SLOTS};
use crate::value_objects::info_value::{InfoDef, InfoValue};
use std::sync::Arc;

/// One registered status-manager instance.
#[derive(Debug, Clone)]
pub struct SmInstance {
    sm: Arc<StatusManager>,
    /// Slot in the status word.
    pub smi_index: usize,
    /// First global info slot of this instance (running sum of earlier
    /// instances' info counts).
    pub sm_info_offset: usize,
    /// Shared manager: the manager name. Private manager: the policy name.
    pub instance_name: String,
    /// Store column of the status (`<instance>_status`).
    pub db_field: String,
    /// User-visible status name (`<instance>.status`).
    pub user_field: String,
    /// Entries this instance applies to; `None` means every entry.
    pub scope: Option<BoolExpr>,
    /// Real masks, filled by [`SmRegistry::update_masks`].
    pub status_mask_fresh: AttrMask,
    pub status_mask_cached: AttrMask,
    pub softrm_table_mask: AttrMask,
    pub softrm_filter_mask: AttrMask,
}

impl SmInstance {
    /// The descriptor.
    pub fn sm(&self) -> &StatusManager {
        &self.sm
    }

    /// Translates a *generic* mask authored by this instance's manager
    /// into the actual mask after slot assignment: generic info bits are
    /// shifted by `sm_info_offset`, the generic status bit becomes this
    /// instance's status bit.
    pub fn actual_mask(&self, mask: AttrMask) -> AttrMask {
        let gen_info = mask.sm_info & bit_range(0, self.sm.nb_info());
        let gen_status = mask.status & AttrMask::status_bit(0);

        let mut out = mask;
        out.sm_info &= !gen_info;
        out.status &= !gen_status;

        if gen_info != 0 {
            out.sm_info |= gen_info << self.sm_info_offset;
        }
        if gen_status != 0 {
            out.status |= AttrMask::status_bit(self.smi_index);
        }
        out
    }

    /// Maps a local info index to its global slot.
    pub fn global_info_slot(&self, local: usize) -> usize {
        self.sm_info_offset + local
    }

    /// This instance's status bit plus its fresh attribute needs, as a
    /// real mask.
    pub fn status_refresh_mask(&self) -> AttrMask {
        AttrMask::of_status(self.smi_index) | self.status_mask_fresh
    }

    /// True when the entry could be in this instance's scope, given a
    /// possibly partial attribute set.
    pub fn scope_may_match(&self, attrs: &AttrSet, reg: &SmRegistry, now: i64) -> bool {
        match &self.scope {
            Some(expr) => expr.may_match(attrs, reg, now),
            None => true,
        }
    }

    /// Interns and stores a status value, validated against the manager's
    /// enumeration.
    pub fn set_status_attr(&self, attrs: &mut AttrSet, value: &str) -> Result<(), EngineError> {
        let idx = self.sm.status_index(value).ok_or_else(|| {
            EngineError::InvalidValue(format!(
                "invalid status '{}' for '{}' (allowed: {})",
                value,
                self.instance_name,
                self.sm.allowed_status_str()
            ))
        })?;
        attrs.set_status_slot(self.smi_index, idx);
        Ok(())
    }

    /// Reads this instance's status from an attribute set.
    pub fn status_of(&self, attrs: &AttrSet) -> Option<&'static str> {
        attrs
            .status_slot(self.smi_index)
            .and_then(|v| self.sm.status_name(v))
    }

    /// Stores a typed info value at the given local slot.
    pub fn set_sm_info(
        &self,
        attrs: &mut AttrSet,
        local: usize,
        value: InfoValue,
    ) -> Result<(), EngineError> {
        let def = self.sm.info_types.get(local).ok_or_else(|| {
            EngineError::internal_error(format!(
                "info index {} out of range for '{}'",
                local, self.instance_name
            ))
        })?;
        let value = def.check(value)?;
        attrs.set_info_slot(self.global_info_slot(local), value);
        Ok(())
    }

    /// Shorthand for unsigned info slots (timestamps, counters).
    pub fn set_uint_info(&self, attrs: &mut AttrSet, local: usize, value: u64) -> Result<(), EngineError> {
        let def = self.sm.info_types.get(local).ok_or_else(|| {
            EngineError::internal_error(format!(
                "info index {} out of range for '{}'",
                local, self.instance_name
            ))
        })?;
        let value = match def.db_type {
            crate::value_objects::info_value::InfoType::Duration => InfoValue::Duration(value),
            _ => InfoValue::Uint(value),
        };
        self.set_sm_info(attrs, local, value)
    }

    /// Reads a typed info value by local slot.
    pub fn get_sm_info<'a>(&self, attrs: &'a AttrSet, local: usize) -> Option<&'a InfoValue> {
        attrs.info_slot(self.global_info_slot(local))
    }
}

/// Summary of running every matching changelog callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClCbSummary {
    /// Highest-priority recommendation across managers.
    pub action: RecordAction,
    /// Status bits (and fresh attribute needs) of managers that asked for
    /// a status refresh.
    pub status_needs: AttrMask,
    /// Callbacks that returned an error (logged by the caller; the record
    /// is still processed with the remaining managers' outcome).
    pub errors: usize,
}

/// The process-wide status-manager registry.
#[derive(Default)]
pub struct SmRegistry {
    managers: Vec<Arc<StatusManager>>,
    instances: Vec<SmInstance>,
    info_count: usize,
}

impl SmRegistry {
    /// A registry with the built-in `basic` manager loadable.
    pub fn new() -> SmRegistry {
        let mut reg = SmRegistry::default();
        reg.managers
            .push(Arc::new(StatusManager::new("basic", &["ok", "failed"])));
        reg
    }

    /// Makes a descriptor loadable by name.
    pub fn register_manager(&mut self, sm: StatusManager) -> Result<(), EngineError> {
        if self.managers.iter().any(|m| m.name.eq_ignore_ascii_case(sm.name)) {
            return Err(EngineError::invalid_config(format!(
                "status manager '{}' registered twice",
                sm.name
            )));
        }
        self.managers.push(Arc::new(sm));
        Ok(())
    }

    fn manager_by_name(&self, name: &str) -> Option<Arc<StatusManager>> {
        self.managers
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Creates (or, for shared managers, returns) the instance of
    /// `sm_name` for policy `policy_name`. Returns the instance index.
    pub fn create_instance(
        &mut self,
        policy_name: &str,
        sm_name: &str,
        scope: Option<BoolExpr>,
    ) -> Result<usize, EngineError> {
        let sm = self.manager_by_name(sm_name).ok_or_else(|| {
            EngineError::invalid_config(format!("no such status manager: '{}'", sm_name))
        })?;

        if sm.flags.shared {
            if let Some(existing) = self
                .instances
                .iter()
                .find(|i| i.sm.name.eq_ignore_ascii_case(sm_name))
            {
                return Ok(existing.smi_index);
            }
        }

        if self.instances.len() + 1 > MAX_STATUS_SLOTS {
            return Err(EngineError::capacity(format!(
                "too many status managers: max {} supported",
                MAX_STATUS_SLOTS
            )));
        }
        if self.info_count + sm.nb_info() > MAX_INFO_SLOTS {
            return Err(EngineError::capacity(format!(
                "too many policy-specific attributes: max {} supported",
                MAX_INFO_SLOTS
            )));
        }

        let instance_name = if sm.flags.shared {
            sm.name.to_string()
        } else {
            policy_name.to_string()
        };

        let smi_index = self.instances.len();
        let sm_info_offset = self.info_count;
        self.info_count += sm.nb_info();

        self.instances.push(SmInstance {
            db_field: format!("{}_status", instance_name),
            user_field: format!("{}.status", instance_name),
            sm,
            smi_index,
            sm_info_offset,
            instance_name,
            scope,
            status_mask_fresh: AttrMask::EMPTY,
            status_mask_cached: AttrMask::EMPTY,
            softrm_table_mask: AttrMask::EMPTY,
            softrm_filter_mask: AttrMask::EMPTY,
        });

        Ok(smi_index)
    }

    /// Computes every instance's real masks; call once after all
    /// instances are registered.
    pub fn update_masks(&mut self) {
        for i in 0..self.instances.len() {
            let (fresh, cached, table, filter) = {
                let inst = &self.instances[i];
                (
                    inst.actual_mask(inst.sm.status_needs_fresh),
                    inst.actual_mask(inst.sm.status_needs_cached),
                    inst.actual_mask(inst.sm.softrm_table_mask),
                    inst.actual_mask(inst.sm.softrm_filter_mask),
                )
            };
            let inst = &mut self.instances[i];
            inst.status_mask_fresh = fresh;
            inst.status_mask_cached = cached;
            inst.softrm_table_mask = table;
            inst.softrm_filter_mask = filter;
        }
    }

    /// Calls each instance's init hook in registration order; the first
    /// failure aborts with that instance's error.
    pub fn init_all(&self) -> Result<(), EngineError> {
        for inst in &self.instances {
            if let Some(init) = &inst.sm.init {
                init(inst)?;
            }
        }
        Ok(())
    }

    pub fn by_index(&self, i: usize) -> Option<&SmInstance> {
        self.instances.get(i)
    }

    pub fn by_name(&self, instance_name: &str) -> Option<&SmInstance> {
        self.instances
            .iter()
            .find(|i| i.instance_name.eq_ignore_ascii_case(instance_name))
    }

    pub fn instances(&self) -> impl Iterator<Item = &SmInstance> {
        self.instances.iter()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Total assigned info slots.
    pub fn info_count(&self) -> usize {
        self.info_count
    }

    /// Union of all instances' status bits.
    pub fn all_status_mask(&self) -> AttrMask {
        let mut m = AttrMask::EMPTY;
        for i in 0..self.instances.len() {
            m.set_status(i);
        }
        m
    }

    /// Union of all assigned info bits.
    pub fn all_info_mask(&self) -> AttrMask {
        AttrMask {
            std: 0,
            status: 0,
            sm_info: bit_range(0, self.info_count),
        }
    }

    /// "Expand all": replaces the generic status bit with every instance's
    /// bit, and generic info bits with every assigned info bit. Used when
    /// the caller wants every registered manager's contribution.
    pub fn expand_all_mask(&self, mask: AttrMask) -> AttrMask {
        let gen_status = mask.status & AttrMask::status_bit(0);
        let gen_info = mask.sm_info & bit_range(0, MAX_INFO_SLOTS);

        let mut out = mask;
        if gen_status != 0 {
            out.status = (out.status & !gen_status) | self.all_status_mask().status;
        }
        if gen_info != 0 {
            out.sm_info = self.all_info_mask().sm_info;
        }
        out
    }

    /// Renders an interned status value of instance `idx`.
    pub fn status_str(&self, idx: usize, value: u8) -> Option<&'static str> {
        self.instances.get(idx).and_then(|i| i.sm.status_name(value))
    }

    /// Resolves `<instance>.<user_name>` info attributes.
    pub fn info_by_user_name<'a>(
        &'a self,
        smi: &'a SmInstance,
        user_name: &str,
    ) -> Option<(usize, &'a InfoDef)> {
        smi.sm
            .info_types
            .iter()
            .enumerate()
            .find(|(_, d)| d.user_name.eq_ignore_ascii_case(user_name))
            .map(|(local, d)| (smi.global_info_slot(local), d))
    }

    /// Attribute needs of the instances whose status bit is in `missing`:
    /// their cached or fresh masks, depending on `fresh`.
    pub fn attrs_for_missing_status(&self, missing: AttrMask, fresh: bool) -> AttrMask {
        let mut out = AttrMask::EMPTY;
        for inst in &self.instances {
            if missing.test_status(inst.smi_index) {
                out |= if fresh {
                    inst.status_mask_fresh
                } else {
                    inst.status_mask_cached
                };
            }
        }
        out
    }

    /// Union of every instance's fresh attribute needs.
    pub fn status_needs_fresh_all(&self) -> AttrMask {
        self.instances
            .iter()
            .fold(AttrMask::EMPTY, |acc, i| acc | i.status_mask_fresh)
    }

    /// Union of every instance's cached attribute needs.
    pub fn status_needs_cached_all(&self) -> AttrMask {
        self.instances
            .iter()
            .fold(AttrMask::EMPTY, |acc, i| acc | i.status_mask_cached)
    }

    /// True when any loaded manager handles removed entries.
    pub fn has_deleted_manager(&self) -> bool {
        self.instances.iter().any(|i| i.sm.flags.deleted)
    }

    /// Union of the softrm filter masks of deleted-managers.
    pub fn softrm_filter_mask_all(&self) -> AttrMask {
        self.instances
            .iter()
            .filter(|i| i.sm.flags.deleted)
            .fold(AttrMask::EMPTY, |acc, i| acc | i.softrm_filter_mask)
    }

    /// Union of the softrm table masks of deleted-managers.
    pub fn softrm_table_mask_all(&self) -> AttrMask {
        self.instances
            .iter()
            .filter(|i| i.sm.flags.deleted)
            .fold(AttrMask::EMPTY, |acc, i| acc | i.softrm_table_mask)
    }

    /// Asks every deleted-manager in scope what to do with a vanished
    /// entry; the highest-priority answer wins. A manager without a filter
    /// function always wants a tombstone for entries in its scope.
    pub fn match_all_softrm_filters(&self, id: &EntryId, attrs: &AttrSet, now: i64) -> RecordAction {
        let mut action = RecordAction::None;
        for inst in self.instances.iter().filter(|i| i.sm.flags.deleted) {
            if !inst.scope_may_match(attrs, self, now) {
                continue;
            }
            let a = match &inst.sm.softrm_filter {
                Some(filter) => filter(inst, id, attrs),
                None => RecordAction::SoftRmAlways,
            };
            action = action.max(a);
        }
        action
    }

    /// Runs every matching changelog callback in registration order.
    ///
    /// `scope_mask` restricts to instances whose status bit it contains
    /// (entries outside an instance's scope skip its callback). Refreshed
    /// attributes accumulate in `refreshed`; the highest-priority record
    /// action wins. Callback errors are counted, not propagated: the
    /// record is still handled with the remaining managers' outcome.
    pub fn run_all_changelog_cbs(
        &self,
        record: &ChangelogRecord,
        id: &EntryId,
        attrs: &AttrSet,
        refreshed: &mut AttrSet,
        scope_mask: AttrMask,
    ) -> ClCbSummary {
        let mut summary = ClCbSummary::default();
        for inst in &self.instances {
            let cb = match &inst.sm.changelog_cb {
                Some(cb) => cb,
                None => continue,
            };
            if !scope_mask.test_status(inst.smi_index) {
                continue;
            }
            match cb(inst, record, id, attrs, refreshed) {
                Ok(ClCbOutcome {
                    need_status_refresh,
                    action,
                }) => {
                    if need_status_refresh {
                        summary.status_needs |= inst.status_refresh_mask();
                    }
                    summary.action = summary.action.max(action);
                }
                Err(_) => summary.errors += 1,
            }
        }
        summary
    }

    /// The configuration sub-handlers of all instances, in registration
    /// order (the composite configuration handler).
    pub fn config_handlers(&self) -> Vec<(String, Arc<dyn SmConfigHandler>)> {
        self.instances
            .iter()
            .filter_map(|i| {
                i.sm
                    .cfg_handler
                    .clone()
                    .map(|h| (i.instance_name.clone(), h))
            })
            .collect()
    }
}

impl std::fmt::Debug for SmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmRegistry")
            .field("managers", &self.managers.len())
            .field("instances", &self.instances.len())
            .field("info_count", &self.info_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_manager::SmFlags;
    use crate::value_objects::attr_mask::StdAttr;
    use crate::value_objects::info_value::{CritType, InfoType};

    fn two_info_manager(name: &'static str, shared: bool) -> StatusManager {
        let mut sm = StatusManager::new(name, &["ok", "failed"]);
        sm.flags = SmFlags {
            shared,
            deleted: false,
        };
        sm.info_types = vec![
            InfoDef {
                user_name: "last_check",
                db_name: "lstchk",
                db_type: InfoType::Duration,
                size: 0,
                default: None,
                crit_type: CritType::Duration,
            },
            InfoDef {
                user_name: "output",
                db_name: "out",
                db_type: InfoType::Text,
                size: 255,
                default: None,
                crit_type: CritType::String,
            },
        ];
        sm.status_needs_fresh = AttrMask::of_std(&[StdAttr::Mode]) | AttrMask::GENERIC_STATUS;
        sm
    }

    #[test]
    fn test_slot_assignment_and_offsets() {
        let mut reg = SmRegistry::new();
        reg.register_manager(two_info_manager("checker", false)).unwrap();

        let a = reg.create_instance("pol_a", "basic", None).unwrap();
        let b = reg.create_instance("pol_b", "checker", None).unwrap();
        let c = reg.create_instance("pol_c", "checker", None).unwrap();

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(reg.by_index(1).unwrap().sm_info_offset, 0);
        assert_eq!(reg.by_index(2).unwrap().sm_info_offset, 2);
        assert_eq!(reg.info_count(), 4);

        // private instances are named after their policy
        assert_eq!(reg.by_index(1).unwrap().instance_name, "pol_b");
        assert_eq!(reg.by_index(1).unwrap().db_field, "pol_b_status");
    }

    #[test]
    fn test_shared_manager_single_instance() {
        let mut reg = SmRegistry::new();
        let mut sm = two_info_manager("guard", true);
        sm.info_types.clear();
        reg.register_manager(sm).unwrap();

        let a = reg.create_instance("pol_a", "guard", None).unwrap();
        let b = reg.create_instance("pol_b", "guard", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.instance_count(), 1);
        assert_eq!(reg.by_index(a).unwrap().instance_name, "guard");
    }

    #[test]
    fn test_generic_mask_translation() {
        let mut reg = SmRegistry::new();
        reg.register_manager(two_info_manager("checker", false)).unwrap();
        reg.create_instance("pol_a", "basic", None).unwrap();
        let idx = reg.create_instance("pol_b", "checker", None).unwrap();
        reg.update_masks();

        let inst = reg.by_index(idx).unwrap();
        let generic = AttrMask::GENERIC_STATUS | AttrMask::generic_info(1) | AttrMask::of_std(&[StdAttr::Size]);
        let actual = inst.actual_mask(generic);

        assert!(actual.test_status(idx));
        assert!(!actual.test_status(0));
        assert!(actual.test_info(inst.sm_info_offset + 1));
        assert!(!actual.test_info(1));
        assert!(actual.test_std(StdAttr::Size));

        // real fresh mask got the instance's own bit, not the generic one
        assert!(inst.status_mask_fresh.test_status(idx));
        assert!(inst.status_mask_fresh.test_std(StdAttr::Mode));
    }

    #[test]
    fn test_expand_all() {
        let mut reg = SmRegistry::new();
        reg.register_manager(two_info_manager("checker", false)).unwrap();
        reg.create_instance("pol_a", "basic", None).unwrap();
        reg.create_instance("pol_b", "checker", None).unwrap();

        let all = reg.expand_all_mask(AttrMask::GENERIC_STATUS);
        assert!(all.test_status(0));
        assert!(all.test_status(1));
    }

    #[test]
    fn test_capacity_overflow_is_an_error() {
        let mut reg = SmRegistry::new();
        // 'basic' is private: each policy gets its own instance, so the
        // status word fills up with MAX_STATUS_SLOTS instances exactly
        for i in 0..MAX_STATUS_SLOTS {
            reg.create_instance(&format!("pol{}", i), "basic", None).unwrap();
        }
        let res = reg.create_instance("one_too_many", "basic", None);
        assert!(matches!(res, Err(EngineError::CapacityExceeded(_))));
    }

    #[test]
    fn test_status_attr_roundtrip() {
        let mut reg = SmRegistry::new();
        let idx = reg.create_instance("pol", "basic", None).unwrap();
        reg.update_masks();

        let inst = reg.by_index(idx).unwrap();
        let mut attrs = AttrSet::new();
        inst.set_status_attr(&mut attrs, "failed").unwrap();
        assert_eq!(inst.status_of(&attrs), Some("failed"));

        assert!(inst.set_status_attr(&mut attrs, "bogus").is_err());
    }

    #[test]
    fn test_info_slots_through_instance() {
        let mut reg = SmRegistry::new();
        reg.register_manager(two_info_manager("checker", false)).unwrap();
        reg.create_instance("pol_a", "basic", None).unwrap();
        let idx = reg.create_instance("pol_b", "checker", None).unwrap();

        let inst = reg.by_index(idx).unwrap();
        let mut attrs = AttrSet::new();
        inst.set_uint_info(&mut attrs, 0, 12_345).unwrap();
        inst.set_sm_info(&mut attrs, 1, InfoValue::Text("all good".into())).unwrap();

        assert_eq!(
            inst.get_sm_info(&attrs, 0),
            Some(&InfoValue::Duration(12_345))
        );
        assert_eq!(
            inst.get_sm_info(&attrs, 1),
            Some(&InfoValue::Text("all good".into()))
        );

        // typed slots reject mismatches
        assert!(inst.set_sm_info(&mut attrs, 0, InfoValue::Text("x".into())).is_err());
    }
}
