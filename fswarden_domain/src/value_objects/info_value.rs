// /////////////////////////////////////////////////////////////////////////////
// FSWarden RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Status-Manager Info Attributes
//!
//! Typed values for the per-instance info slots a status manager declares
//! (e.g. `last_check`, `last_alert`, `output`). Each slot carries a
//! [`InfoDef`] (static metadata: names, type, default, criterion type) and
//! at runtime an optional [`InfoValue`].
//!
//! The declared type is enforced on write: storing a string into an
//! unsigned slot is an [`EngineError::InvalidValue`]. Bounded strings are
//! truncated at their declared size, mirroring the store's column width.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of an info slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoType {
    /// Unsigned integer (also used for epoch timestamps).
    Uint,
    /// A duration in seconds.
    Duration,
    /// Bounded text; the payload is truncated at the declared size.
    Text,
}

/// How rule conditions compare against this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritType {
    /// Compared as a plain number.
    Number,
    /// Compared as an age relative to now (`last_check > 7d`).
    Duration,
    /// Compared as a string.
    String,
}

/// Static declaration of one info attribute of a status manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDef {
    /// User-visible name (`<instance>.<user_name>` in conditions and
    /// placeholders).
    pub user_name: &'static str,
    /// Store column suffix (`<instance>_<db_name>`).
    pub db_name: &'static str,
    /// Storage type.
    pub db_type: InfoType,
    /// Maximum size for [`InfoType::Text`] slots (0 otherwise).
    pub size: usize,
    /// Default value when the slot was never written.
    pub default: Option<InfoValue>,
    /// Comparison semantics in rule conditions.
    pub crit_type: CritType,
}

impl InfoDef {
    /// Validates a value against this declaration, truncating bounded text.
    pub fn check(&self, value: InfoValue) -> Result<InfoValue, EngineError> {
        match (self.db_type, value) {
            (InfoType::Uint, v @ InfoValue::Uint(_)) => Ok(v),
            (InfoType::Duration, v @ InfoValue::Duration(_)) => Ok(v),
            (InfoType::Text, InfoValue::Text(mut s)) => {
                if self.size > 0 && s.len() > self.size {
                    s.truncate(self.size);
                }
                Ok(InfoValue::Text(s))
            }
            (expected, got) => Err(EngineError::InvalidValue(format!(
                "info attribute '{}' expects {:?}, got {}",
                self.user_name, expected, got
            ))),
        }
    }
}

/// A value stored in an info slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Uint(u64),
    /// Seconds.
    Duration(u64),
    Text(String),
}

impl InfoValue {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            InfoValue::Uint(v) | InfoValue::Duration(v) => Some(*v),
            InfoValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Uint(v) => write!(f, "{}", v),
            InfoValue::Duration(v) => write!(f, "{}", v),
            InfoValue::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_def(size: usize) -> InfoDef {
        InfoDef {
            user_name: "output",
            db_name: "out",
            db_type: InfoType::Text,
            size,
            default: None,
            crit_type: CritType::String,
        }
    }

    #[test]
    fn test_check_truncates_bounded_text() {
        let def = text_def(4);
        let v = def.check(InfoValue::Text("overlong".into())).unwrap();
        assert_eq!(v, InfoValue::Text("over".into()));
    }

    #[test]
    fn test_check_rejects_type_mismatch() {
        let def = text_def(0);
        assert!(def.check(InfoValue::Uint(3)).is_err());
    }

    #[test]
    fn test_uint_accessor_covers_duration() {
        assert_eq!(InfoValue::Duration(30).as_uint(), Some(30));
        assert_eq!(InfoValue::Text("x".into()).as_uint(), None);
    }
}
