// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Rules and Fileclasses
//!
//! Boolean expressions over entry attributes, and the structures built from
//! them: fileclass definitions, policy scopes, whitelist/ignore rules, and
//! the per-policy rule list.
//!
//! ## Evaluation modes
//!
//! An expression can be evaluated two ways:
//!
//! - [`BoolExpr::matches`] — strict: a criterion on an absent attribute is
//!   a [`EngineError::MissingAttribute`] error, so callers know what to
//!   fetch before retrying.
//! - [`BoolExpr::may_match`] — three-valued: absent attributes make a
//!   criterion *unknown*; the expression may still collapse to a definite
//!   answer (e.g. one disjunct already true). Used to decide whether an
//!   entry could be in a scope before paying for attribute retrieval.
//!
//! Time-like attributes compare as **ages**: `last_access > 30d` holds
//! when the entry was last accessed more than 30 days before `now`.
//! String criteria with `*`/`?` wildcards are shell-style patterns.

use crate::entities::attr_set::{AttrSet, FsKind};
use crate::error::EngineError;
use crate::services::action::ActionParams;
use crate::services::entry_store::{FilterAttr, FilterItem, FilterOp, FilterValue};
use crate::status_manager::registry::SmRegistry;
use crate::value_objects::attr_mask::{AttrMask, StdAttr};
use crate::value_objects::info_value::CritType;
use serde::{Deserialize, Serialize};

/// Comparison operator in a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn cmp_i64(self, a: i64, b: i64) -> bool {
        match self {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
        }
    }

    fn invert_for_age(self) -> CompareOp {
        // "older than" on a timestamp column means a *smaller* value
        match self {
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            other => other,
        }
    }
}

/// The attribute a criterion examines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CritTarget {
    Std(StdAttr),
    /// `<instance>.status`.
    Status { instance: String },
    /// `<instance>.<info>`.
    Info { instance: String, attr: String },
}

/// The value a criterion compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritValue {
    Num(i64),
    /// Age in seconds; the criterion compares `now - attr` against it.
    AgeSecs(i64),
    Str(String),
    Kind(FsKind),
    Bool(bool),
}

/// A single comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub target: CritTarget,
    pub op: CompareOp,
    pub value: CritValue,
}

fn pattern_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') && !pattern.contains('?') {
        return pattern == value;
    }
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c if regex::escape(&c.to_string()).len() > 1 => re.push_str(&regex::escape(&c.to_string())),
            c => re.push(c),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map(|r| r.is_match(value)).unwrap_or(false)
}

impl Criterion {
    /// Strict evaluation; absent attributes are errors.
    pub fn matches(&self, attrs: &AttrSet, reg: &SmRegistry, now: i64) -> Result<bool, EngineError> {
        self.eval(attrs, reg, now)?
            .ok_or_else(|| EngineError::missing_attr(self.target_name(reg)))
    }

    /// Three-valued evaluation; `None` means "unknown, attribute absent".
    fn eval(&self, attrs: &AttrSet, reg: &SmRegistry, now: i64) -> Result<Option<bool>, EngineError> {
        match &self.target {
            CritTarget::Std(attr) => self.eval_std(*attr, attrs, now),
            CritTarget::Status { instance } => {
                let smi = reg
                    .by_name(instance)
                    .ok_or_else(|| EngineError::invalid_config(format!("unknown status manager '{}'", instance)))?;
                let expected = match &self.value {
                    CritValue::Str(s) => s.as_str(),
                    other => {
                        return Err(EngineError::invalid_config(format!(
                            "status criterion expects a string, got {:?}",
                            other
                        )))
                    }
                };
                let current = match attrs.status_slot(smi.smi_index) {
                    Some(v) => reg.status_str(smi.smi_index, v),
                    // an absent status compares as the empty string
                    None => None,
                };
                let eq = current.unwrap_or("") == expected;
                Ok(Some(match self.op {
                    CompareOp::Eq => eq,
                    CompareOp::Ne => !eq,
                    _ => {
                        return Err(EngineError::invalid_config(
                            "status criteria only support == and !=",
                        ))
                    }
                }))
            }
            CritTarget::Info { instance, attr } => {
                let smi = reg
                    .by_name(instance)
                    .ok_or_else(|| EngineError::invalid_config(format!("unknown status manager '{}'", instance)))?;
                let (slot, def) = reg
                    .info_by_user_name(smi, attr)
                    .ok_or_else(|| EngineError::invalid_config(format!("unknown attribute '{}.{}'", instance, attr)))?;
                let val = match attrs.info_slot(slot) {
                    Some(v) => v,
                    None => return Ok(None),
                };
                match def.crit_type {
                    CritType::Number => {
                        let v = val.as_uint().ok_or_else(|| {
                            EngineError::InvalidValue(format!("'{}.{}' is not numeric", instance, attr))
                        })? as i64;
                        match &self.value {
                            CritValue::Num(n) => Ok(Some(self.op.cmp_i64(v, *n))),
                            other => Err(EngineError::invalid_config(format!(
                                "numeric criterion expected, got {:?}",
                                other
                            ))),
                        }
                    }
                    CritType::Duration => {
                        let v = val.as_uint().ok_or_else(|| {
                            EngineError::InvalidValue(format!("'{}.{}' is not numeric", instance, attr))
                        })? as i64;
                        match &self.value {
                            CritValue::AgeSecs(age) => Ok(Some(self.op.cmp_i64(now.saturating_sub(v), *age))),
                            CritValue::Num(n) => Ok(Some(self.op.cmp_i64(v, *n))),
                            other => Err(EngineError::invalid_config(format!(
                                "duration criterion expected, got {:?}",
                                other
                            ))),
                        }
                    }
                    CritType::String => {
                        let s = val.as_str().unwrap_or("");
                        match (&self.value, self.op) {
                            (CritValue::Str(p), CompareOp::Eq) => Ok(Some(pattern_match(p, s))),
                            (CritValue::Str(p), CompareOp::Ne) => Ok(Some(!pattern_match(p, s))),
                            _ => Err(EngineError::invalid_config(
                                "string criteria only support == and !=",
                            )),
                        }
                    }
                }
            }
        }
    }

    fn eval_std(&self, attr: StdAttr, attrs: &AttrSet, now: i64) -> Result<Option<bool>, EngineError> {
        // time attributes compare as ages
        if attr.is_time() {
            let t = match attrs.time_attr(attr) {
                Some(t) => t,
                None => return Ok(None),
            };
            return match &self.value {
                CritValue::AgeSecs(age) => Ok(Some(self.op.cmp_i64(now.saturating_sub(t), *age))),
                CritValue::Num(n) => Ok(Some(self.op.cmp_i64(t, *n))),
                other => Err(EngineError::invalid_config(format!(
                    "time criterion expects an age, got {:?}",
                    other
                ))),
            };
        }

        let num = |v: i64| -> Result<Option<bool>, EngineError> {
            match &self.value {
                CritValue::Num(n) => Ok(Some(self.op.cmp_i64(v, *n))),
                other => Err(EngineError::invalid_config(format!(
                    "numeric criterion expected for '{}', got {:?}",
                    attr, other
                ))),
            }
        };
        let strv = |v: Option<&str>| -> Result<Option<bool>, EngineError> {
            let v = match v {
                Some(v) => v,
                None => return Ok(None),
            };
            match (&self.value, self.op) {
                (CritValue::Str(p), CompareOp::Eq) => Ok(Some(pattern_match(p, v))),
                (CritValue::Str(p), CompareOp::Ne) => Ok(Some(!pattern_match(p, v))),
                _ => Err(EngineError::invalid_config(format!(
                    "string criteria on '{}' only support == and !=",
                    attr
                ))),
            }
        };

        match attr {
            StdAttr::Size => match attrs.size() {
                Some(v) => num(v as i64),
                None => Ok(None),
            },
            StdAttr::Blocks => match attrs.blocks() {
                Some(v) => num(v as i64),
                None => Ok(None),
            },
            StdAttr::Nlink => match attrs.nlink() {
                Some(v) => num(v as i64),
                None => Ok(None),
            },
            StdAttr::Depth => match attrs.depth() {
                Some(v) => num(v as i64),
                None => Ok(None),
            },
            StdAttr::Dircount => match attrs.dircount() {
                Some(v) => num(v as i64),
                None => Ok(None),
            },
            StdAttr::Mode => match attrs.mode() {
                Some(v) => num(v as i64),
                None => Ok(None),
            },
            StdAttr::Kind => {
                let k = match attrs.kind() {
                    Some(k) => k,
                    None => return Ok(None),
                };
                match (&self.value, self.op) {
                    (CritValue::Kind(want), CompareOp::Eq) => Ok(Some(k == *want)),
                    (CritValue::Kind(want), CompareOp::Ne) => Ok(Some(k != *want)),
                    _ => Err(EngineError::invalid_config("type criteria only support == and !=")),
                }
            }
            StdAttr::Invalid => {
                let v = match attrs.invalid() {
                    Some(v) => v,
                    None => return Ok(None),
                };
                match (&self.value, self.op) {
                    (CritValue::Bool(want), CompareOp::Eq) => Ok(Some(v == *want)),
                    (CritValue::Bool(want), CompareOp::Ne) => Ok(Some(v != *want)),
                    _ => Err(EngineError::invalid_config("bool criteria only support == and !=")),
                }
            }
            StdAttr::Name => strv(attrs.name()),
            StdAttr::Fullpath => strv(attrs.fullpath()),
            StdAttr::Owner => strv(attrs.owner()),
            StdAttr::Group => strv(attrs.group()),
            StdAttr::Fileclass => strv(attrs.fileclass()),
            StdAttr::Link => strv(attrs.link()),
            other => Err(EngineError::invalid_config(format!(
                "attribute '{}' cannot be used in conditions",
                other
            ))),
        }
    }

    fn target_name(&self, _reg: &SmRegistry) -> String {
        match &self.target {
            CritTarget::Std(a) => a.as_str().to_string(),
            CritTarget::Status { instance } => format!("{}.status", instance),
            CritTarget::Info { instance, attr } => format!("{}.{}", instance, attr),
        }
    }

    /// The attribute bits this criterion reads.
    pub fn attr_need(&self, reg: &SmRegistry) -> AttrMask {
        match &self.target {
            CritTarget::Std(a) => AttrMask::of_std(&[*a]),
            CritTarget::Status { instance } => reg
                .by_name(instance)
                .map(|smi| AttrMask::of_status(smi.smi_index))
                .unwrap_or(AttrMask::EMPTY),
            CritTarget::Info { instance, attr } => reg
                .by_name(instance)
                .and_then(|smi| reg.info_by_user_name(smi, attr))
                .map(|(slot, _)| AttrMask::of_info(slot))
                .unwrap_or(AttrMask::EMPTY),
        }
    }

    /// Best-effort conversion into a store filter conjunct. Criteria the
    /// store cannot index (patterns on paths, ages on info slots of
    /// non-duration type, ...) yield `None`.
    pub fn to_filter_item(&self, reg: &SmRegistry, now: i64) -> Option<FilterItem> {
        let attr = match &self.target {
            CritTarget::Std(a) => FilterAttr::Std(*a),
            CritTarget::Status { instance } => FilterAttr::Status(reg.by_name(instance)?.smi_index),
            CritTarget::Info { instance, attr } => {
                let smi = reg.by_name(instance)?;
                let (slot, _) = reg.info_by_user_name(smi, attr)?;
                FilterAttr::Info(slot)
            }
        };
        let (op, value) = match &self.value {
            CritValue::Num(n) => (filter_op(self.op)?, FilterValue::Num(*n)),
            CritValue::AgeSecs(age) => (
                filter_op(self.op.invert_for_age())?,
                FilterValue::Num(now.saturating_sub(*age)),
            ),
            CritValue::Str(s) if !s.contains('*') && !s.contains('?') => {
                (filter_op(self.op)?, FilterValue::Str(s.clone()))
            }
            CritValue::Str(s) if self.op == CompareOp::Eq => (FilterOp::Like, FilterValue::Str(s.clone())),
            CritValue::Str(_) => return None,
            CritValue::Kind(k) => (filter_op(self.op)?, FilterValue::Str(k.as_str().to_string())),
            CritValue::Bool(b) => (filter_op(self.op)?, FilterValue::Bool(*b)),
        };
        Some(FilterItem::new(attr, op, value))
    }
}

fn filter_op(op: CompareOp) -> Option<FilterOp> {
    Some(match op {
        CompareOp::Eq => FilterOp::Eq,
        CompareOp::Ne => FilterOp::Ne,
        CompareOp::Gt => FilterOp::Gt,
        CompareOp::Ge => FilterOp::Ge,
        CompareOp::Lt => FilterOp::Lt,
        CompareOp::Le => FilterOp::Le,
    })
}

/// A boolean expression over entry attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoolExpr {
    Constant(bool),
    Criterion(Criterion),
    Not(Box<BoolExpr>),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
}

impl Default for BoolExpr {
    /// The universal scope: matches everything.
    fn default() -> Self {
        BoolExpr::Constant(true)
    }
}

impl BoolExpr {
    /// Convenience criterion constructor.
    pub fn cond(target: CritTarget, op: CompareOp, value: CritValue) -> BoolExpr {
        BoolExpr::Criterion(Criterion { target, op, value })
    }

    /// Strict evaluation.
    pub fn matches(&self, attrs: &AttrSet, reg: &SmRegistry, now: i64) -> Result<bool, EngineError> {
        match self.eval3(attrs, reg, now)? {
            Some(b) => Ok(b),
            None => Err(EngineError::missing_attr(
                "expression needs attributes absent from the entry",
            )),
        }
    }

    /// Three-valued evaluation: unknown criteria may be absorbed by the
    /// surrounding And/Or structure.
    fn eval3(&self, attrs: &AttrSet, reg: &SmRegistry, now: i64) -> Result<Option<bool>, EngineError> {
        match self {
            BoolExpr::Constant(b) => Ok(Some(*b)),
            BoolExpr::Criterion(c) => c.eval(attrs, reg, now),
            BoolExpr::Not(e) => Ok(e.eval3(attrs, reg, now)?.map(|b| !b)),
            BoolExpr::And(es) => {
                let mut unknown = false;
                for e in es {
                    match e.eval3(attrs, reg, now)? {
                        Some(false) => return Ok(Some(false)),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(true) })
            }
            BoolExpr::Or(es) => {
                let mut unknown = false;
                for e in es {
                    match e.eval3(attrs, reg, now)? {
                        Some(true) => return Ok(Some(true)),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
        }
    }

    /// True unless the expression definitely does not match. Used for
    /// scope checks on partial attribute sets.
    pub fn may_match(&self, attrs: &AttrSet, reg: &SmRegistry, now: i64) -> bool {
        match self.eval3(attrs, reg, now) {
            Ok(Some(b)) => b,
            Ok(None) => true,
            Err(_) => true,
        }
    }

    /// Union of the attribute bits the expression reads.
    pub fn attr_need(&self, reg: &SmRegistry) -> AttrMask {
        match self {
            BoolExpr::Constant(_) => AttrMask::EMPTY,
            BoolExpr::Criterion(c) => c.attr_need(reg),
            BoolExpr::Not(e) => e.attr_need(reg),
            BoolExpr::And(es) | BoolExpr::Or(es) => es
                .iter()
                .fold(AttrMask::EMPTY, |acc, e| acc | e.attr_need(reg)),
        }
    }

    /// Best-effort conversion to store filter conjuncts. Only a top-level
    /// And-tree of convertible criteria yields items; anything else yields
    /// an empty vector (the caller filters in memory instead).
    pub fn to_filter_items(&self, reg: &SmRegistry, now: i64) -> Vec<FilterItem> {
        match self {
            BoolExpr::Criterion(c) => c.to_filter_item(reg, now).into_iter().collect(),
            BoolExpr::And(es) => {
                let mut out = Vec::new();
                for e in es {
                    out.extend(e.to_filter_items(reg, now));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// True when the expression references any time-like standard
    /// attribute other than `keep`, or any info slot other than `keep_info`.
    /// Used to decide whether the end-of-list heuristic is conclusive.
    pub fn references_other_times(&self, keep: Option<StdAttr>, keep_info: Option<usize>, reg: &SmRegistry) -> bool {
        match self {
            BoolExpr::Constant(_) => false,
            BoolExpr::Criterion(c) => match &c.target {
                CritTarget::Std(a) => a.is_time() && Some(*a) != keep,
                CritTarget::Info { instance, attr } => {
                    match reg.by_name(instance).and_then(|smi| reg.info_by_user_name(smi, attr)) {
                        Some((slot, def)) => def.crit_type == CritType::Duration && Some(slot) != keep_info,
                        None => false,
                    }
                }
                CritTarget::Status { .. } => false,
            },
            BoolExpr::Not(e) => e.references_other_times(keep, keep_info, reg),
            BoolExpr::And(es) | BoolExpr::Or(es) => {
                es.iter().any(|e| e.references_other_times(keep, keep_info, reg))
            }
        }
    }
}

/// A named predicate over attributes; matched classes are stored on the
/// entry and reused per the fileclass update policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileClass {
    pub name: String,
    pub definition: BoolExpr,
    /// Action-parameter overrides, keyed by policy name; only the slot of
    /// the running policy applies.
    #[serde(default)]
    pub action_params: std::collections::BTreeMap<String, ActionParams>,
}

impl FileClass {
    pub fn new(name: impl Into<String>, definition: BoolExpr) -> FileClass {
        FileClass {
            name: name.into(),
            definition,
            action_params: Default::default(),
        }
    }
}

/// The fileclass definitions known to a policy run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileClassSet {
    pub classes: Vec<FileClass>,
}

impl FileClassSet {
    pub fn by_name(&self, name: &str) -> Option<&FileClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// First class (declaration order) whose definition matches.
    pub fn match_entry(
        &self,
        attrs: &AttrSet,
        reg: &SmRegistry,
        now: i64,
    ) -> Result<Option<&FileClass>, EngineError> {
        for class in &self.classes {
            if class.definition.matches(attrs, reg, now)? {
                return Ok(Some(class));
            }
        }
        Ok(None)
    }
}

/// One policy rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    /// Target fileclasses; empty means the rule applies to any entry in
    /// scope (condition-only rule).
    pub fileclasses: Vec<String>,
    /// The rule's own condition, re-evaluated on fresh attributes before
    /// the action runs.
    pub condition: Option<BoolExpr>,
    /// Per-rule action parameter overrides.
    pub action_params: ActionParams,
}

/// Outcome of matching an entry against a rule set.
#[derive(Debug)]
pub enum RuleMatch<'a> {
    /// Matched an ignore rule or an ignored fileclass.
    Ignored,
    /// Matched a rule; the captured fileclass, if any.
    Rule(&'a PolicyRule, Option<&'a str>),
    NoMatch,
}

/// The rule tree of a policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<PolicyRule>,
    /// Whitelist conditions: matching entries are never acted on.
    pub ignore: Vec<BoolExpr>,
    /// Whitelisted fileclass names.
    pub ignore_fileclasses: Vec<String>,
}

impl RuleSet {
    /// Matches the entry: ignore rules first, then rules in order.
    pub fn match_entry<'a>(
        &'a self,
        attrs: &AttrSet,
        classes: &'a FileClassSet,
        reg: &SmRegistry,
        now: i64,
    ) -> Result<RuleMatch<'a>, EngineError> {
        for ign in &self.ignore {
            if ign.matches(attrs, reg, now)? {
                return Ok(RuleMatch::Ignored);
            }
        }
        for class_name in &self.ignore_fileclasses {
            if let Some(class) = classes.by_name(class_name) {
                if class.definition.matches(attrs, reg, now)? {
                    return Ok(RuleMatch::Ignored);
                }
            }
        }
        for rule in &self.rules {
            if rule.fileclasses.is_empty() {
                let cond_ok = match &rule.condition {
                    Some(c) => c.matches(attrs, reg, now)?,
                    None => true,
                };
                if cond_ok {
                    return Ok(RuleMatch::Rule(rule, None));
                }
                continue;
            }
            for class_name in &rule.fileclasses {
                let class = classes.by_name(class_name).ok_or_else(|| {
                    EngineError::invalid_config(format!("rule '{}' targets unknown fileclass '{}'", rule.name, class_name))
                })?;
                if class.definition.matches(attrs, reg, now)? {
                    return Ok(RuleMatch::Rule(rule, Some(class.name.as_str())));
                }
            }
        }
        Ok(RuleMatch::NoMatch)
    }

    /// Attribute bits needed to match any rule or ignore condition.
    pub fn attr_need(&self, classes: &FileClassSet, reg: &SmRegistry) -> AttrMask {
        let mut need = AttrMask::EMPTY;
        for e in &self.ignore {
            need |= e.attr_need(reg);
        }
        for r in &self.rules {
            if let Some(c) = &r.condition {
                need |= c.attr_need(reg);
            }
            for cn in &r.fileclasses {
                if let Some(class) = classes.by_name(cn) {
                    need |= class.definition.attr_need(reg);
                }
            }
        }
        for cn in &self.ignore_fileclasses {
            if let Some(class) = classes.by_name(cn) {
                need |= class.definition.attr_need(reg);
            }
        }
        need
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_manager::registry::SmRegistry;

    fn reg() -> SmRegistry {
        SmRegistry::new()
    }

    fn age_crit(attr: StdAttr, op: CompareOp, age: i64) -> BoolExpr {
        BoolExpr::cond(CritTarget::Std(attr), op, CritValue::AgeSecs(age))
    }

    #[test]
    fn test_age_semantics() {
        let reg = reg();
        let mut attrs = AttrSet::new();
        attrs.set_last_access(1_000);

        // at now=4000, age is 3000
        let expr = age_crit(StdAttr::LastAccess, CompareOp::Gt, 2_000);
        assert!(expr.matches(&attrs, &reg, 4_000).unwrap());
        let expr = age_crit(StdAttr::LastAccess, CompareOp::Gt, 5_000);
        assert!(!expr.matches(&attrs, &reg, 4_000).unwrap());
    }

    #[test]
    fn test_missing_attr_strict_vs_may_match() {
        let reg = reg();
        let attrs = AttrSet::new();
        let expr = age_crit(StdAttr::LastAccess, CompareOp::Gt, 10);
        assert!(expr.matches(&attrs, &reg, 100).is_err());
        assert!(expr.may_match(&attrs, &reg, 100));
    }

    #[test]
    fn test_three_valued_or_collapses() {
        let reg = reg();
        let mut attrs = AttrSet::new();
        attrs.set_size(10_000);

        // size known-true OR last_access unknown => true
        let expr = BoolExpr::Or(vec![
            BoolExpr::cond(CritTarget::Std(StdAttr::Size), CompareOp::Gt, CritValue::Num(1_000)),
            age_crit(StdAttr::LastAccess, CompareOp::Gt, 10),
        ]);
        assert!(expr.matches(&attrs, &reg, 100).unwrap());
    }

    #[test]
    fn test_pattern_match_on_names() {
        let reg = reg();
        let mut attrs = AttrSet::new();
        attrs.set_name("core.1234");

        let expr = BoolExpr::cond(
            CritTarget::Std(StdAttr::Name),
            CompareOp::Eq,
            CritValue::Str("core.*".into()),
        );
        assert!(expr.matches(&attrs, &reg, 0).unwrap());
    }

    #[test]
    fn test_filter_conversion_inverts_age() {
        let reg = reg();
        // last_access > 30d  =>  last_access_column < now-30d
        let expr = age_crit(StdAttr::LastAccess, CompareOp::Gt, 30 * 86_400);
        let items = expr.to_filter_items(&reg, 100 * 86_400);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].op, FilterOp::Lt);
        assert_eq!(items[0].value, FilterValue::Num(70 * 86_400));
    }

    #[test]
    fn test_non_convertible_yields_empty() {
        let reg = reg();
        let expr = BoolExpr::Or(vec![
            age_crit(StdAttr::LastAccess, CompareOp::Gt, 10),
            age_crit(StdAttr::LastMod, CompareOp::Gt, 10),
        ]);
        assert!(expr.to_filter_items(&reg, 100).is_empty());
    }

    #[test]
    fn test_rule_set_ignore_wins() {
        let reg = reg();
        let classes = FileClassSet {
            classes: vec![FileClass::new(
                "big",
                BoolExpr::cond(CritTarget::Std(StdAttr::Size), CompareOp::Gt, CritValue::Num(100)),
            )],
        };
        let rules = RuleSet {
            rules: vec![PolicyRule {
                name: "purge_big".into(),
                fileclasses: vec!["big".into()],
                condition: None,
                action_params: ActionParams::new(),
            }],
            ignore: vec![BoolExpr::cond(
                CritTarget::Std(StdAttr::Owner),
                CompareOp::Eq,
                CritValue::Str("root".into()),
            )],
            ignore_fileclasses: vec![],
        };

        let mut attrs = AttrSet::new();
        attrs.set_size(500);
        attrs.set_owner("root");
        assert!(matches!(
            rules.match_entry(&attrs, &classes, &reg, 0).unwrap(),
            RuleMatch::Ignored
        ));

        attrs.set_owner("alice");
        match rules.match_entry(&attrs, &classes, &reg, 0).unwrap() {
            RuleMatch::Rule(r, Some(cls)) => {
                assert_eq!(r.name, "purge_big");
                assert_eq!(cls, "big");
            }
            other => panic!("unexpected match: {:?}", other),
        }
    }
}
