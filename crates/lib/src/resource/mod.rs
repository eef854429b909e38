//! Environment variable declarations.
//!
//! A [`VariableDecl`] is the raw field bag read from configuration or the
//! command line. Converting it into an [`EnvResource`] validates it once; the
//! rest of the crate only ever sees validated, immutable resources.
//!
//! # Declaration shapes
//!
//! ```json
//! { "title": "JAVA_HOME=C:\\jdk", "mergemode": "clobber" }
//! { "name": "PATH", "value": ["C:\\tools", "C:\\bin"], "mergemode": "append" }
//! { "name": "PATH", "value": "C:\\old", "ensure": "absent", "user": "alice" }
//! ```

mod types;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_BROADCAST_TIMEOUT_MS, DEFAULT_SEPARATOR};

pub use types::{Ensure, MergeMode, ParseError, ValueKind};

/// A declared value: a single string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueDecl {
  One(String),
  Many(Vec<String>),
}

/// Unvalidated declaration of an environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariableDecl {
  /// `NAME` or `NAME=VALUE`. Explicit `name`/`value` fields take precedence.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value: Option<ValueDecl>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ensure: Option<Ensure>,
  #[serde(rename = "mergemode", alias = "merge_mode", skip_serializing_if = "Option::is_none")]
  pub merge_mode: Option<MergeMode>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub separator: Option<String>,
  #[serde(rename = "type", alias = "kind", skip_serializing_if = "Option::is_none")]
  pub value_kind: Option<ValueKind>,
  /// Owning user; `None` targets the machine-wide environment.
  #[serde(alias = "owner", skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,
  /// Per-window broadcast timeout in milliseconds.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub broadcast_timeout: Option<u32>,
}

/// Errors raised while validating a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("environment variable name must be provided")]
  MissingName,

  #[error("invalid environment variable name '{0}': names cannot contain '='")]
  InvalidName(String),

  #[error("'{name}': 'value' parameter must be provided when 'ensure => present'")]
  ValueRequired { name: String },

  #[error("'{name}': 'value' parameter must be provided when 'ensure => absent' and 'mergemode => {mode}'")]
  ValueRequiredForRemoval { name: String, mode: MergeMode },

  #[error("'{name}': separator cannot be empty")]
  EmptySeparator { name: String },

  #[error("'{name}': broadcast_timeout must be a positive number of milliseconds")]
  InvalidTimeout { name: String },
}

impl VariableDecl {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      ..Self::default()
    }
  }

  /// Start from a `NAME` or `NAME=VALUE` title.
  pub fn from_title(title: impl Into<String>) -> Self {
    Self {
      title: Some(title.into()),
      ..Self::default()
    }
  }

  pub fn value(mut self, value: impl Into<String>) -> Self {
    self.value = Some(ValueDecl::One(value.into()));
    self
  }

  pub fn values<I, S>(mut self, values: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.value = Some(ValueDecl::Many(values.into_iter().map(Into::into).collect()));
    self
  }

  pub fn ensure(mut self, ensure: Ensure) -> Self {
    self.ensure = Some(ensure);
    self
  }

  pub fn merge_mode(mut self, mode: MergeMode) -> Self {
    self.merge_mode = Some(mode);
    self
  }

  pub fn separator(mut self, separator: impl Into<String>) -> Self {
    self.separator = Some(separator.into());
    self
  }

  pub fn value_kind(mut self, kind: ValueKind) -> Self {
    self.value_kind = Some(kind);
    self
  }

  pub fn user(mut self, user: impl Into<String>) -> Self {
    self.user = Some(user.into());
    self
  }

  pub fn broadcast_timeout(mut self, millis: u32) -> Self {
    self.broadcast_timeout = Some(millis);
    self
  }

  pub fn build(self) -> Result<EnvResource, ValidationError> {
    EnvResource::try_from(self)
  }
}

/// A validated environment variable declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvResource {
  name: String,
  segments: Vec<String>,
  ensure: Ensure,
  merge_mode: MergeMode,
  separator: String,
  value_kind: Option<ValueKind>,
  owner: Option<String>,
  broadcast_timeout_ms: u32,
}

impl EnvResource {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Desired value segments, already split on the separator.
  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  pub fn ensure(&self) -> Ensure {
    self.ensure
  }

  /// The merge mode as declared.
  pub fn merge_mode(&self) -> MergeMode {
    self.merge_mode
  }

  /// The merge mode used to compare and remove.
  ///
  /// Removal in append or prepend mode must succeed wherever the value sits,
  /// so those modes compare like insert when `ensure` is absent.
  pub fn comparison_mode(&self) -> MergeMode {
    match (self.ensure, self.merge_mode) {
      (Ensure::Absent, MergeMode::Append | MergeMode::Prepend) => MergeMode::Insert,
      (_, mode) => mode,
    }
  }

  pub fn separator(&self) -> &str {
    &self.separator
  }

  pub fn value_kind(&self) -> Option<ValueKind> {
    self.value_kind
  }

  /// Owning user, or `None` for the machine-wide environment.
  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  pub fn broadcast_timeout(&self) -> Duration {
    Duration::from_millis(u64::from(self.broadcast_timeout_ms))
  }
}

impl fmt::Display for EnvResource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.owner {
      Some(user) => write!(f, "{} (user {})", self.name, user),
      None => write!(f, "{}", self.name),
    }
  }
}

impl TryFrom<VariableDecl> for EnvResource {
  type Error = ValidationError;

  fn try_from(decl: VariableDecl) -> Result<Self, Self::Error> {
    let (title_name, title_value) = match decl.title.as_deref() {
      Some(title) => split_title(title),
      None => (None, None),
    };

    let name = decl.name.or(title_name).unwrap_or_default();
    if name.is_empty() {
      return Err(ValidationError::MissingName);
    }
    if name.contains('=') {
      return Err(ValidationError::InvalidName(name));
    }

    let separator = decl.separator.unwrap_or_else(|| DEFAULT_SEPARATOR.to_string());
    if separator.is_empty() {
      return Err(ValidationError::EmptySeparator { name });
    }

    let raw = match decl.value.or(title_value.map(ValueDecl::One)) {
      Some(ValueDecl::One(value)) => vec![value],
      Some(ValueDecl::Many(values)) => values,
      None => Vec::new(),
    };
    // Split the way stored values are split, so that a written value reads
    // back as the same segments: an empty string has none.
    let segments: Vec<String> = raw
      .iter()
      .filter(|value| !value.is_empty())
      .flat_map(|value| value.split(separator.as_str()).map(str::to_string))
      .collect();

    let ensure = decl.ensure.unwrap_or_default();
    let merge_mode = decl.merge_mode.unwrap_or_default();

    if segments.is_empty() {
      match (ensure, merge_mode) {
        (Ensure::Present, _) => return Err(ValidationError::ValueRequired { name }),
        (Ensure::Absent, MergeMode::Clobber) => {}
        (Ensure::Absent, mode) => return Err(ValidationError::ValueRequiredForRemoval { name, mode }),
      }
    }

    let broadcast_timeout_ms = decl.broadcast_timeout.unwrap_or(DEFAULT_BROADCAST_TIMEOUT_MS);
    if broadcast_timeout_ms == 0 {
      return Err(ValidationError::InvalidTimeout { name });
    }

    Ok(Self {
      name,
      segments,
      ensure,
      merge_mode,
      separator,
      value_kind: decl.value_kind,
      owner: decl.user,
      broadcast_timeout_ms,
    })
  }
}

/// Split `NAME=VALUE` at the first `=`; a title without `=` is only a name.
fn split_title(title: &str) -> (Option<String>, Option<String>) {
  match title.split_once('=') {
    Some((name, value)) => (Some(name.to_string()), Some(value.to_string())),
    None => (Some(title.to_string()), None),
  }
}
