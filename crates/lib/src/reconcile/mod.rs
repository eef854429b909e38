//! Reconciliation of declared variables against the store.
//!
//! [`merge`] holds the pure decisions: splitting stored values, the
//! `exists` predicate per merge mode, and the value to write back.
//! [`Session`] performs the I/O around them for one run: it resolves the
//! target key (mounting user hives as needed), reads the current value,
//! applies the planned [`Change`], and broadcasts the update.

pub mod merge;
mod session;

use std::fmt;

use thiserror::Error;

use crate::hive::HiveError;
use crate::platform::IdentityError;
use crate::store::{RawValue, StoreError};

pub use session::{Observation, Session};

/// What a change does to the variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  /// Make the declared segments present.
  Create,
  /// Remove the declared segments, or the whole variable in clobber mode.
  Destroy,
  /// Rewrite the unchanged value under the declared kind.
  SetKind,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Destroy => "destroy",
      Self::SetKind => "set-kind",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A planned mutation of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
  pub action: Action,
  /// Stored value before the change, `None` when unset.
  pub before: Option<RawValue>,
  /// Value after the change, `None` when the variable is deleted.
  pub after: Option<RawValue>,
}

/// Result of reconciling one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// The store already matches the declaration.
  InSync,
  /// The change was written.
  Applied(Change),
  /// The change would be written; nothing was touched.
  Planned(Change),
}

impl Outcome {
  pub fn change(&self) -> Option<&Change> {
    match self {
      Self::InSync => None,
      Self::Applied(change) | Self::Planned(change) => Some(change),
    }
  }
}

/// Errors that abort the reconciliation of a single resource.
#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Identity(#[from] IdentityError),

  #[error(transparent)]
  Hive(#[from] HiveError),
}
