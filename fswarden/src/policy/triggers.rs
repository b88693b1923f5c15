// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Trigger Configuration and Interpretation
//!
//! Triggers decide *when* a policy run launches and *how much* it should
//! do: periodic/scheduled launches, or threshold-crossing launches on
//! global, per-user, per-group, per-OST or per-pool usage.
//!
//! The timer wheel sampling usage and calling [`TriggerConfig::check`]
//! is the caller's; this module interprets one usage snapshot against the
//! configured thresholds and produces the run parameters (target plus
//! the amount needed to come back under the low threshold).
//!
//! ## Reload
//!
//! Scalar and threshold fields reload in place; changing a trigger's
//! type, its target list, or the *kind* of its thresholds (percentage vs
//! volume vs count) is refused.

use crate::policy::run::{RunParams, RunTarget};
use fswarden_domain::error::EngineError;
use fswarden_domain::services::action::ActionParams;
use fswarden_domain::value_objects::Counters;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What launches the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "args")]
pub enum TriggerType {
    /// Launch every `check_interval`.
    Periodic,
    /// Alias of `periodic`.
    Scheduled,
    /// Whole-filesystem usage thresholds.
    GlobalUsage,
    /// Per-user usage; empty list means every user.
    UserUsage(Vec<String>),
    /// Per-group usage; empty list means every group.
    GroupUsage(Vec<String>),
    /// Per-storage-target usage.
    OstUsage,
    /// Per-pool usage.
    PoolUsage(Vec<String>),
}

impl TriggerType {
    pub fn is_periodic(&self) -> bool {
        matches!(self, TriggerType::Periodic | TriggerType::Scheduled)
    }

    fn kind_str(&self) -> &'static str {
        match self {
            TriggerType::Periodic | TriggerType::Scheduled => "periodic",
            TriggerType::GlobalUsage => "global_usage",
            TriggerType::UserUsage(_) => "user_usage",
            TriggerType::GroupUsage(_) => "group_usage",
            TriggerType::OstUsage => "ost_usage",
            TriggerType::PoolUsage(_) => "pool_usage",
        }
    }
}

/// A usage threshold; high and low must be of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Percent of capacity used.
    Pct(f64),
    /// Bytes used.
    Vol(u64),
    /// Entry count.
    Cnt(u64),
}

impl Threshold {
    fn same_kind(&self, other: &Threshold) -> bool {
        matches!(
            (self, other),
            (Threshold::Pct(_), Threshold::Pct(_))
                | (Threshold::Vol(_), Threshold::Vol(_))
                | (Threshold::Cnt(_), Threshold::Cnt(_))
        )
    }
}

/// One usage sample the trigger is checked against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    /// The principal this sample describes (user, group, OST index or
    /// pool name); `None` for global samples.
    pub principal: Option<String>,
    pub used_vol: u64,
    pub total_vol: u64,
    pub used_count: u64,
}

impl UsageSnapshot {
    pub fn used_pct(&self) -> f64 {
        if self.total_vol == 0 {
            0.0
        } else {
            100.0 * self.used_vol as f64 / self.total_vol as f64
        }
    }
}

/// One trigger declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub trigger_type: TriggerType,
    /// Usage sampling / launch period.
    pub check_interval_secs: u64,
    /// Crossing this launches a run.
    pub high_threshold: Option<Threshold>,
    /// The run frees enough to come back under this.
    pub low_threshold: Option<Threshold>,
    /// Per-trigger caps handed to the run.
    pub max_action_count: u64,
    pub max_action_volume: u64,
    /// Idle time after a triggered run completes.
    pub post_trigger_wait_secs: u64,
    /// Raise an alert when the high threshold is crossed.
    pub alert_high: bool,
    /// Raise an alert when the run could not reach the low threshold.
    pub alert_low: bool,
    #[serde(default)]
    pub action_params: ActionParams,
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.trigger_type.is_periodic() {
            if self.check_interval_secs == 0 {
                return Err(EngineError::invalid_config(
                    "periodic trigger needs a check_interval",
                ));
            }
            return Ok(());
        }

        let high = self.high_threshold.as_ref().ok_or_else(|| {
            EngineError::invalid_config("usage trigger needs a high_threshold")
        })?;
        if let Some(low) = &self.low_threshold {
            if !high.same_kind(low) {
                return Err(EngineError::invalid_config(
                    "high_threshold and low_threshold must be of the same kind",
                ));
            }
        }
        Ok(())
    }

    /// Interprets one usage sample: `Some(run parameters)` when the
    /// trigger fires.
    pub fn check(&self, usage: &UsageSnapshot) -> Option<RunParams> {
        if self.trigger_type.is_periodic() {
            return Some(self.run_params(Counters::ZERO, usage));
        }

        let high = self.high_threshold?;
        let crossed = match high {
            Threshold::Pct(pct) => usage.used_pct() >= pct,
            Threshold::Vol(vol) => usage.used_vol >= vol,
            Threshold::Cnt(cnt) => usage.used_count >= cnt,
        };
        if !crossed {
            return None;
        }

        if self.alert_high {
            warn!(
                trigger = self.trigger_type.kind_str(),
                principal = usage.principal.as_deref().unwrap_or("-"),
                used_vol = usage.used_vol,
                used_pct = usage.used_pct(),
                "high threshold exceeded"
            );
        }

        // amount needed to come back under the low threshold
        let mut target_ctr = Counters::ZERO;
        match self.low_threshold.unwrap_or(high) {
            Threshold::Pct(pct) => {
                let goal_vol = (pct / 100.0 * usage.total_vol as f64) as u64;
                target_ctr.vol = usage.used_vol.saturating_sub(goal_vol);
            }
            Threshold::Vol(vol) => {
                target_ctr.vol = usage.used_vol.saturating_sub(vol);
            }
            Threshold::Cnt(cnt) => {
                target_ctr.count = usage.used_count.saturating_sub(cnt);
            }
        }
        if target_ctr.is_zero() {
            // already under the low mark: fire with the count of one so
            // the run does the minimum useful work
            target_ctr.count = 1;
        }

        Some(self.run_params(target_ctr, usage))
    }

    fn run_params(&self, mut target_ctr: Counters, usage: &UsageSnapshot) -> RunParams {
        if self.max_action_count > 0 {
            target_ctr.count = if target_ctr.count == 0 {
                self.max_action_count
            } else {
                target_ctr.count.min(self.max_action_count)
            };
        }
        if self.max_action_volume > 0 {
            target_ctr.vol = if target_ctr.vol == 0 {
                self.max_action_volume
            } else {
                target_ctr.vol.min(self.max_action_volume)
            };
        }

        let target = match (&self.trigger_type, usage.principal.as_deref()) {
            (TriggerType::UserUsage(_), Some(user)) => RunTarget::User(user.to_string()),
            (TriggerType::GroupUsage(_), Some(group)) => RunTarget::Group(group.to_string()),
            (TriggerType::OstUsage, Some(ost)) => ost
                .parse::<u32>()
                .map(RunTarget::Ost)
                .unwrap_or(RunTarget::All),
            (TriggerType::PoolUsage(_), Some(pool)) => RunTarget::Pool(pool.to_string()),
            _ => RunTarget::All,
        };

        RunParams {
            target,
            target_ctr,
            action_params: self.action_params.clone(),
            force: false,
            ignore_policies: false,
            no_limit: false,
        }
    }

    /// Live reload: scalar and threshold values are adjusted in place; a
    /// change of type, target list, or threshold kind is refused.
    /// Returns the refused field names.
    pub fn reload_from(&mut self, new: &TriggerConfig) -> Vec<&'static str> {
        let mut refused = Vec::new();

        if self.trigger_type != new.trigger_type {
            warn!(
                current = self.trigger_type.kind_str(),
                requested = new.trigger_type.kind_str(),
                "trigger type/target cannot be modified dynamically"
            );
            refused.push("trigger_type");
        }

        let kind_change = |a: &Option<Threshold>, b: &Option<Threshold>| match (a, b) {
            (Some(x), Some(y)) => !x.same_kind(y),
            (None, None) => false,
            _ => true,
        };

        if kind_change(&self.high_threshold, &new.high_threshold) {
            warn!("high_threshold kind cannot be modified dynamically");
            refused.push("high_threshold");
        } else if self.high_threshold != new.high_threshold {
            info!("trigger high_threshold updated");
            self.high_threshold = new.high_threshold;
        }

        if kind_change(&self.low_threshold, &new.low_threshold) {
            warn!("low_threshold kind cannot be modified dynamically");
            refused.push("low_threshold");
        } else if self.low_threshold != new.low_threshold {
            info!("trigger low_threshold updated");
            self.low_threshold = new.low_threshold;
        }

        macro_rules! swap_field {
            ($field:ident) => {
                if self.$field != new.$field {
                    info!(field = stringify!($field), "trigger parameter updated");
                    self.$field = new.$field.clone();
                }
            };
        }
        swap_field!(check_interval_secs);
        swap_field!(max_action_count);
        swap_field!(max_action_volume);
        swap_field!(post_trigger_wait_secs);
        swap_field!(alert_high);
        swap_field!(alert_low);
        swap_field!(action_params);

        refused
    }
}
