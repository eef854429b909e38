//! Scoped access to registry keys.
//!
//! The store is the hierarchical key-value database environment variables live
//! in. Two roots matter here:
//!
//! ```text
//! HKEY_LOCAL_MACHINE\System\CurrentControlSet\Control\Session Manager\Environment
//! HKEY_USERS\<sid>\Environment
//! ```
//!
//! Keys are opened through [`Store::open`] or [`Store::create`] and returned as
//! handles that are closed when dropped, on every exit path.

#[cfg(any(feature = "test-fixtures", test))]
pub mod memory;
#[cfg(windows)]
pub mod registry;

use std::fmt;

use thiserror::Error;

use crate::consts::{MACHINE_ENVIRONMENT_PATH, PROFILE_LIST_PATH, USER_ENVIRONMENT_SUBKEY};
use crate::platform::{NativeError, Sid};
use crate::resource::ValueKind;

/// Top-level registry namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hive {
  LocalMachine,
  Users,
}

impl Hive {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::LocalMachine => "HKEY_LOCAL_MACHINE",
      Self::Users => "HKEY_USERS",
    }
  }
}

/// A key path inside a hive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyLocation {
  pub hive: Hive,
  pub path: String,
}

impl KeyLocation {
  pub fn new(hive: Hive, path: impl Into<String>) -> Self {
    Self {
      hive,
      path: path.into(),
    }
  }

  /// The machine-wide environment key.
  pub fn machine_environment() -> Self {
    Self::new(Hive::LocalMachine, MACHINE_ENVIRONMENT_PATH)
  }

  /// Root of a user's hive, present only while the hive is loaded.
  pub fn user_hive(sid: &Sid) -> Self {
    Self::new(Hive::Users, sid.as_str())
  }

  /// A user's environment key.
  pub fn user_environment(sid: &Sid) -> Self {
    Self::new(Hive::Users, format!(r"{}\{}", sid, USER_ENVIRONMENT_SUBKEY))
  }

  /// The profile record for a user.
  pub fn profile(sid: &Sid) -> Self {
    Self::new(Hive::LocalMachine, format!(r"{}\{}", PROFILE_LIST_PATH, sid))
  }

  /// Full path of a value under this key, for messages.
  pub fn value_path(&self, name: &str) -> String {
    format!(r"{}\{}", self, name)
  }
}

impl fmt::Display for KeyLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.path.is_empty() {
      f.write_str(self.hive.as_str())
    } else {
      write!(f, r"{}\{}", self.hive.as_str(), self.path)
    }
  }
}

/// Access requested when opening a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Read,
  /// Read and write.
  Write,
}

/// A stored value and its registry type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
  pub kind: ValueKind,
  pub data: String,
}

impl RawValue {
  pub fn new(kind: ValueKind, data: impl Into<String>) -> Self {
    Self {
      kind,
      data: data.into(),
    }
  }

  pub fn text(data: impl Into<String>) -> Self {
    Self::new(ValueKind::Text, data)
  }

  pub fn expandable(data: impl Into<String>) -> Self {
    Self::new(ValueKind::ExpandableText, data)
  }
}

/// The store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
  Opening,
  Creating,
  Reading,
  Writing,
  Deleting,
}

impl fmt::Display for StoreAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Opening => "opening",
      Self::Creating => "creating",
      Self::Reading => "reading",
      Self::Writing => "writing",
      Self::Deleting => "deleting",
    })
  }
}

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// The key or value does not exist.
  #[error("'{path}' not found")]
  NotFound { path: String },

  /// Any other registry failure.
  #[error("{action} '{path}' returned error {}: {}", .source.code, .source.message)]
  Native {
    action: StoreAction,
    path: String,
    #[source]
    source: NativeError,
  },

  /// The value exists but is not a text type.
  #[error("'{path}' has unsupported registry type {kind}")]
  UnsupportedKind { path: String, kind: u32 },
}

impl StoreError {
  pub fn native(action: StoreAction, path: impl Into<String>, source: NativeError) -> Self {
    Self::Native {
      action,
      path: path.into(),
      source,
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }
}

/// Scoped access to registry keys.
pub trait Store {
  /// Open key handle; released on drop.
  type Key<'a>: StoreKey
  where
    Self: 'a;

  /// Open an existing key. Fails with [`StoreError::NotFound`] if it is missing.
  fn open(&self, location: &KeyLocation, access: Access) -> Result<Self::Key<'_>, StoreError>;

  /// Open a key, creating it and any missing parents.
  fn create(&self, location: &KeyLocation, access: Access) -> Result<Self::Key<'_>, StoreError>;
}

/// An open key.
pub trait StoreKey {
  fn location(&self) -> &KeyLocation;

  /// Read a value. Fails with [`StoreError::NotFound`] if it is absent.
  fn read(&self, name: &str) -> Result<RawValue, StoreError>;

  fn write(&self, name: &str, value: &RawValue) -> Result<(), StoreError>;

  fn delete(&self, name: &str) -> Result<(), StoreError>;
}
