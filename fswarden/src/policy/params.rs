// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Action Parameters and Placeholder Substitution
//!
//! Builds the parameter set handed to an action by overlaying, in growing
//! priority: policy defaults, trigger overrides, rule overrides, and the
//! matched fileclass's overrides for this policy. Every value then goes
//! through `{placeholder}` substitution.
//!
//! ## Placeholders
//!
//! `{cfg}`, `{fsname}`, `{fspath}`, `{rule}`, `{fileclass}`, `{path}`,
//! `{name}`, `{fid}`, `{output}`, plus any attribute name — including
//! status-manager attributes as `{<instance>.<info>}` and
//! `{<instance>.status}`. Unknown placeholders are an error (braces are
//! mandatory). For argv vectors each element is substituted in place; for
//! single command strings values are shell-quoted.

use fswarden_domain::entities::{AttrSet, EntryId};
use fswarden_domain::error::EngineError;
use fswarden_domain::rules::{FileClass, PolicyRule};
use fswarden_domain::services::action::ActionParams;
use fswarden_domain::status_manager::{SmInstance, SmRegistry};
use fswarden_domain::value_objects::attr_mask::StdAttr;
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.]+)\}").expect("valid placeholder regex"));

/// Everything a substitution can draw from.
pub struct SubstContext<'a> {
    pub id: &'a EntryId,
    pub attrs: &'a AttrSet,
    pub params: &'a ActionParams,
    pub registry: &'a SmRegistry,
    /// The policy's own status-manager instance; bare info-attribute
    /// names (e.g. `{output}`) resolve against it.
    pub smi: Option<&'a SmInstance>,
    pub fsname: &'a str,
    pub fspath: &'a str,
    pub cfg_path: &'a str,
    pub rule: Option<&'a str>,
    pub fileclass: Option<&'a str>,
}

impl<'a> SubstContext<'a> {
    fn lookup(&self, key: &str) -> Result<String, EngineError> {
        match key {
            "cfg" => return Ok(self.cfg_path.to_string()),
            "fsname" => return Ok(self.fsname.to_string()),
            "fspath" => return Ok(self.fspath.to_string()),
            "fid" => return Ok(self.id.to_string()),
            "rule" => {
                return self
                    .rule
                    .map(|s| s.to_string())
                    .ok_or_else(|| EngineError::InvalidValue("no rule in this context".into()))
            }
            "fileclass" => return Ok(self.fileclass.unwrap_or("").to_string()),
            "path" => {
                return self
                    .attrs
                    .fullpath()
                    .map(|s| s.to_string())
                    .ok_or_else(|| EngineError::missing_attr("fullpath"))
            }
            "name" => {
                return self
                    .attrs
                    .name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| EngineError::missing_attr("name"))
            }
            _ => {}
        }

        // action parameters may be referenced from commands
        if let Some(v) = self.params.get(key) {
            return Ok(v.to_string());
        }

        // standard attribute names
        if let Some(attr) = StdAttr::from_name(key) {
            return self
                .attrs
                .std_attr_string(attr)
                .ok_or_else(|| EngineError::missing_attr(key));
        }

        // bare info-attribute names resolve against the policy's own
        // status manager ({output}, {last_check}, ...)
        if let Some(smi) = self.smi {
            if key.eq_ignore_ascii_case("status") {
                return Ok(smi.status_of(self.attrs).unwrap_or("").to_string());
            }
            if let Some((slot, _)) = self.registry.info_by_user_name(smi, key) {
                return self
                    .attrs
                    .info_slot(slot)
                    .map(|v| v.to_string())
                    .ok_or_else(|| EngineError::missing_attr(key));
            }
        }

        // '<instance>.<attr>' status-manager attributes
        if let Some((inst_name, attr_name)) = key.split_once('.') {
            let smi = self.registry.by_name(inst_name).ok_or_else(|| {
                EngineError::InvalidValue(format!("unknown status manager '{}' in '{{{}}}'", inst_name, key))
            })?;
            if attr_name.eq_ignore_ascii_case("status") {
                return Ok(smi.status_of(self.attrs).unwrap_or("").to_string());
            }
            let (slot, _) = self.registry.info_by_user_name(smi, attr_name).ok_or_else(|| {
                EngineError::InvalidValue(format!("unknown attribute '{{{}}}'", key))
            })?;
            return self
                .attrs
                .info_slot(slot)
                .map(|v| v.to_string())
                .ok_or_else(|| EngineError::missing_attr(key));
        }

        Err(EngineError::InvalidValue(format!("unknown placeholder '{{{}}}'", key)))
    }
}

/// Substitutes every `{placeholder}` in `input`. With `quote`, each value
/// is single-quoted for the shell.
pub fn subst_params(input: &str, ctx: &SubstContext<'_>, quote: bool) -> Result<String, EngineError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(input) {
        let m = caps.get(0).expect("match exists");
        let key = caps.get(1).expect("group exists").as_str();
        out.push_str(&input[last..m.start()]);
        let val = ctx.lookup(key)?;
        if quote {
            out.push_str(&shell_quote(&val));
        } else {
            out.push_str(&val);
        }
        last = m.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// POSIX single-quote escaping.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=".contains(c)) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Substitutes an argv template element-wise (no quoting: values land in
/// argv slots, not in a shell).
pub fn subst_argv(argv: &[String], ctx: &SubstContext<'_>) -> Result<Vec<String>, EngineError> {
    argv.iter().map(|a| subst_params(a, ctx, false)).collect()
}

/// Builds the final parameter set for one entry: policy defaults, trigger
/// overrides, rule overrides, fileclass overrides (for this policy), then
/// placeholder substitution on every value.
#[allow(clippy::too_many_arguments)]
pub fn build_action_params(
    policy_name: &str,
    policy_defaults: &ActionParams,
    trigger_params: &ActionParams,
    rule: &PolicyRule,
    fileclass: Option<&FileClass>,
    id: &EntryId,
    attrs: &AttrSet,
    registry: &SmRegistry,
    smi: Option<&SmInstance>,
    fsname: &str,
    fspath: &str,
    cfg_path: &str,
) -> Result<ActionParams, EngineError> {
    let mut params = policy_defaults.clone();
    params.merge_from(trigger_params);
    params.merge_from(&rule.action_params);
    if let Some(class) = fileclass {
        if let Some(over) = class.action_params.get(policy_name) {
            params.merge_from(over);
        }
    }

    let snapshot = params.clone();
    let ctx = SubstContext {
        id,
        attrs,
        params: &snapshot,
        registry,
        smi,
        fsname,
        fspath,
        cfg_path,
        rule: Some(&rule.name),
        fileclass: fileclass.map(|c| c.name.as_str()),
    };
    params.map_values(|_, v| subst_params(v, &ctx, false))?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fswarden_domain::rules::BoolExpr;

    fn ctx_fixture() -> (EntryId, AttrSet, SmRegistry) {
        let id = EntryId::fid(0x200000007, 0x42, 0);
        let mut attrs = AttrSet::new();
        attrs.set_fullpath("/fs/dir/file");
        attrs.set_name("file");
        attrs.set_size(12345);
        let reg = SmRegistry::new();
        (id, attrs, reg)
    }

    #[test]
    fn test_basic_placeholders() {
        let (id, attrs, reg) = ctx_fixture();
        let params = ActionParams::new();
        let ctx = SubstContext {
            id: &id,
            attrs: &attrs,
            params: &params,
            registry: &reg,
            smi: None,
            fsname: "fs0",
            fspath: "/fs",
            cfg_path: "/etc/fswarden.conf",
            rule: Some("purge_old"),
            fileclass: Some("scratch"),
        };

        let out = subst_params("archive {path} ({fid}) rule={rule} size={size}", &ctx, false).unwrap();
        assert_eq!(
            out,
            "archive /fs/dir/file ([0x200000007:0x42:0x0]) rule=purge_old size=12345"
        );
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let (id, attrs, reg) = ctx_fixture();
        let params = ActionParams::new();
        let ctx = SubstContext {
            id: &id,
            attrs: &attrs,
            params: &params,
            registry: &reg,
            smi: None,
            fsname: "fs0",
            fspath: "/fs",
            cfg_path: "",
            rule: None,
            fileclass: None,
        };
        assert!(subst_params("{bogus_thing}", &ctx, false).is_err());
    }

    #[test]
    fn test_shell_quoting() {
        assert_eq!(shell_quote("plain-value_1.0"), "plain-value_1.0");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_merge_priority_and_substitution() {
        let (id, attrs, reg) = ctx_fixture();

        let mut policy_defaults = ActionParams::new();
        policy_defaults.set("target", "default-pool");
        policy_defaults.set("entry", "{path}");

        let mut trigger = ActionParams::new();
        trigger.set("target", "trigger-pool");

        let mut rule = PolicyRule {
            name: "r1".into(),
            ..PolicyRule::default()
        };
        rule.action_params.set("target", "rule-pool");

        let mut class = FileClass::new("scratch", BoolExpr::Constant(true));
        let mut class_over = ActionParams::new();
        class_over.set("target", "class-pool");
        class.action_params.insert("purge".into(), class_over);

        let params = build_action_params(
            "purge",
            &policy_defaults,
            &trigger,
            &rule,
            Some(&class),
            &id,
            &attrs,
            &reg,
            None,
            "fs0",
            "/fs",
            "",
        )
        .unwrap();

        // fileclass wins, then rule, then trigger, then policy
        assert_eq!(params.get("target"), Some("class-pool"));
        assert_eq!(params.get("entry"), Some("/fs/dir/file"));
    }

    #[test]
    fn test_fileclass_override_only_for_this_policy() {
        let (id, attrs, reg) = ctx_fixture();
        let rule = PolicyRule::default();

        let mut class = FileClass::new("scratch", BoolExpr::Constant(true));
        let mut other = ActionParams::new();
        other.set("target", "other-policy-pool");
        class.action_params.insert("archive".into(), other);

        let mut defaults = ActionParams::new();
        defaults.set("target", "default-pool");

        let params = build_action_params(
            "purge",
            &defaults,
            &ActionParams::new(),
            &rule,
            Some(&class),
            &id,
            &attrs,
            &reg,
            None,
            "fs0",
            "/fs",
            "",
        )
        .unwrap();
        assert_eq!(params.get("target"), Some("default-pool"));
    }
}
