//! Test doubles for winenv-lib.
//!
//! Registry behavior comes from [`crate::store::memory::MemoryStore`]; this
//! module covers the remaining platform capabilities.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::platform::{Identities, IdentityError, NativeError, Notifier, Sid};

/// Identity resolver backed by a fixed table of users.
#[derive(Debug, Default)]
pub struct FixedIdentities {
  users: BTreeMap<String, Sid>,
  profiles: BTreeMap<Sid, PathBuf>,
}

impl FixedIdentities {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_user(mut self, user: &str, sid: Sid, profile: impl Into<PathBuf>) -> Self {
    self.users.insert(user.to_lowercase(), sid.clone());
    self.profiles.insert(sid, profile.into());
    self
  }
}

impl Identities for FixedIdentities {
  fn resolve(&self, user: &str) -> Result<Sid, IdentityError> {
    self
      .users
      .get(&user.to_lowercase())
      .cloned()
      .ok_or_else(|| IdentityError::Unresolved {
        user: user.to_string(),
        source: NativeError::new(1332, "No mapping between account names and security IDs was done."),
      })
  }

  fn profile_path(&self, sid: &Sid) -> Result<PathBuf, IdentityError> {
    self
      .profiles
      .get(sid)
      .cloned()
      .ok_or_else(|| IdentityError::NoProfile { sid: sid.clone() })
  }
}

/// Notifier that records each broadcast's timeout.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  timeouts: RefCell<Vec<Duration>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn count(&self) -> usize {
    self.timeouts.borrow().len()
  }

  pub fn timeouts(&self) -> Vec<Duration> {
    self.timeouts.borrow().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn broadcast(&self, timeout: Duration) {
    self.timeouts.borrow_mut().push(timeout);
  }
}
