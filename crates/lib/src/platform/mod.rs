//! Platform capabilities consumed by the reconciler.
//!
//! The reconciler never calls the operating system directly. Everything it
//! needs beyond key-value access goes through the traits in this module:
//!
//! - [`HiveLoader`]: mount and unmount detached user hives under the restore privilege
//! - [`Identities`]: username to SID resolution and profile lookup
//! - [`Notifier`]: the "environment changed" broadcast
//!
//! On Windows, [`windows`] provides the real implementations. Tests use
//! [`crate::store::memory::MemoryStore`] plus small fakes.

#[cfg(windows)]
pub mod windows;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Security identifier of a user account, in string form (`S-1-5-21-...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sid(pub String);

impl Sid {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Sid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A failed native call: its result code and the decoded system message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error {code}: {message}")]
pub struct NativeError {
  pub code: u32,
  pub message: String,
}

impl NativeError {
  pub fn new(code: u32, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }

  /// Decode a system error code into its message.
  pub fn from_code(code: u32) -> Self {
    // On Windows the standard library formats this through FormatMessageW.
    let message = std::io::Error::from_raw_os_error(code as i32).to_string();
    Self { code, message }
  }

  /// Capture the calling thread's last OS error.
  pub fn last() -> Self {
    let err = std::io::Error::last_os_error();
    Self {
      code: err.raw_os_error().unwrap_or_default() as u32,
      message: err.to_string(),
    }
  }
}

/// Errors from identity resolution and profile lookup.
#[derive(Debug, Error)]
pub enum IdentityError {
  #[error("could not resolve user '{user}' to a SID: {source}")]
  Unresolved {
    user: String,
    #[source]
    source: NativeError,
  },

  #[error("no profile is registered for {sid}")]
  NoProfile { sid: Sid },

  #[error("failed to read the profile path for {sid}: {source}")]
  ProfileLookup {
    sid: Sid,
    #[source]
    source: StoreError,
  },
}

/// Errors obtaining platform capabilities.
#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("unsupported platform: {0} (the Windows registry is required)")]
  Unsupported(&'static str),
}

/// Mounting and unmounting of detached user hives under `HKEY_USERS`.
pub trait HiveLoader {
  /// Scoped hold on the restore privilege; dropping it releases the privilege.
  type Privilege<'a>
  where
    Self: 'a;

  fn restore_privilege(&self) -> Result<Self::Privilege<'_>, NativeError>;

  /// Load the hive `file` under `HKEY_USERS\{sid}`. Requires the restore privilege.
  fn load_hive(&self, sid: &Sid, file: &Path) -> Result<(), NativeError>;

  /// Unload the hive mounted at `HKEY_USERS\{sid}`. Requires the restore privilege.
  fn unload_hive(&self, sid: &Sid) -> Result<(), NativeError>;
}

/// Username to SID resolution and profile lookup.
pub trait Identities {
  fn resolve(&self, user: &str) -> Result<Sid, IdentityError>;

  /// Profile directory of `sid`, the directory holding its hive file.
  fn profile_path(&self, sid: &Sid) -> Result<PathBuf, IdentityError>;
}

/// Best-effort notification that the environment changed.
pub trait Notifier {
  /// Fire and forget: failures are not reported and never retried.
  fn broadcast(&self, timeout: Duration);
}

/// The capabilities a reconciliation run works against.
pub struct Host<S, I, N> {
  pub store: S,
  pub identities: I,
  pub notifier: N,
}

impl<S, I, N> Host<S, I, N> {
  pub fn new(store: S, identities: I, notifier: N) -> Self {
    Self {
      store,
      identities,
      notifier,
    }
  }
}
