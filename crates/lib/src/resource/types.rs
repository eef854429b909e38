//! Enumerations used by environment variable declarations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether the declared value should be present in or absent from the variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
  #[default]
  Present,
  Absent,
}

/// How a declared value interacts with the value already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
  /// Replace the whole value.
  Clobber,
  /// Make sure the declared segments appear, in order, anywhere in the value.
  #[default]
  Insert,
  /// Make sure the declared segments end the value.
  Append,
  /// Make sure the declared segments start the value.
  Prepend,
}

/// Registry value type for an environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
  /// `REG_SZ`
  #[serde(rename = "text", alias = "REG_SZ")]
  Text,
  /// `REG_EXPAND_SZ`: `%VAR%` references are expanded by readers.
  #[serde(rename = "expandable", alias = "REG_EXPAND_SZ")]
  ExpandableText,
}

/// Error returned when parsing an enum from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what} '{value}', expected one of: {expected}")]
pub struct ParseError {
  what: &'static str,
  value: String,
  expected: &'static str,
}

impl Ensure {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Present => "present",
      Self::Absent => "absent",
    }
  }
}

impl MergeMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Clobber => "clobber",
      Self::Insert => "insert",
      Self::Append => "append",
      Self::Prepend => "prepend",
    }
  }
}

impl ValueKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Text => "REG_SZ",
      Self::ExpandableText => "REG_EXPAND_SZ",
    }
  }
}

impl fmt::Display for Ensure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl fmt::Display for MergeMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl fmt::Display for ValueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Ensure {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "present" => Ok(Self::Present),
      "absent" => Ok(Self::Absent),
      _ => Err(ParseError {
        what: "ensure",
        value: s.to_string(),
        expected: "present, absent",
      }),
    }
  }
}

impl FromStr for MergeMode {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "clobber" => Ok(Self::Clobber),
      "insert" => Ok(Self::Insert),
      "append" => Ok(Self::Append),
      "prepend" => Ok(Self::Prepend),
      _ => Err(ParseError {
        what: "merge mode",
        value: s.to_string(),
        expected: "clobber, insert, append, prepend",
      }),
    }
  }
}

impl FromStr for ValueKind {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "text" | "reg_sz" => Ok(Self::Text),
      "expandable" | "reg_expand_sz" => Ok(Self::ExpandableText),
      _ => Err(ParseError {
        what: "value type",
        value: s.to_string(),
        expected: "text, expandable, REG_SZ, REG_EXPAND_SZ",
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn merge_mode_defaults_to_insert() {
    assert_eq!(MergeMode::default(), MergeMode::Insert);
  }

  #[test]
  fn value_kind_accepts_registry_names() {
    assert_eq!("REG_EXPAND_SZ".parse::<ValueKind>().unwrap(), ValueKind::ExpandableText);
    assert_eq!("text".parse::<ValueKind>().unwrap(), ValueKind::Text);

    let kind: ValueKind = serde_json::from_str(r#""REG_SZ""#).unwrap();
    assert_eq!(kind, ValueKind::Text);
  }

  #[test]
  fn parse_errors_name_the_field() {
    let err = "sideways".parse::<MergeMode>().unwrap_err();
    assert_eq!(
      err.to_string(),
      "invalid merge mode 'sideways', expected one of: clobber, insert, append, prepend"
    );
  }
}
