//! On-demand mounting of user registry hives.
//!
//! A user's environment lives in their profile hive (`NTUSER.DAT`), which is
//! only present under `HKEY_USERS\<sid>` while the user is logged on. For any
//! other user the hive is loaded here, on first use, and stays loaded for the
//! rest of the run so several variables of the same user share one mount.
//! [`HiveManager::unmount_all`] unloads everything this run loaded, once,
//! after the whole batch.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::USER_HIVE_FILE;
use crate::platform::{HiveLoader, IdentityError, Identities, NativeError, Sid};
use crate::store::{Access, KeyLocation, Store, StoreError};

/// A hive this run loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedHive {
  pub sid: Sid,
  /// The hive file that was loaded.
  pub file: PathBuf,
}

/// Errors raised while making a user's hive available.
#[derive(Debug, Error)]
pub enum HiveError {
  #[error("cannot locate the registry hive of {sid}: {source}")]
  ProfileNotFound {
    sid: Sid,
    #[source]
    source: IdentityError,
  },

  #[error("loading hive '{}' for {sid} returned error {}: {}", .file.display(), .source.code, .source.message)]
  Mount {
    sid: Sid,
    file: PathBuf,
    #[source]
    source: NativeError,
  },

  #[error("checking whether the hive of {sid} is loaded: {source}")]
  Probe {
    sid: Sid,
    #[source]
    source: StoreError,
  },
}

/// A hive that could not be unloaded at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountFailure {
  pub hive: LoadedHive,
  pub error: NativeError,
}

impl fmt::Display for UnmountFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "unloading hive '{}' for {} returned {}",
      self.hive.file.display(),
      self.hive.sid,
      self.error
    )
  }
}

/// Tracks the hives loaded during one run.
#[derive(Debug, Default)]
pub struct HiveManager {
  loaded: Vec<LoadedHive>,
}

impl HiveManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Hives loaded so far and not yet unloaded.
  pub fn loaded(&self) -> &[LoadedHive] {
    &self.loaded
  }

  /// Make sure `HKEY_USERS\<sid>` resolves, loading the user's hive if needed.
  pub fn ensure_mounted<S, I>(&mut self, store: &S, identities: &I, sid: &Sid) -> Result<(), HiveError>
  where
    S: Store + HiveLoader,
    I: Identities,
  {
    if self.loaded.iter().any(|hive| hive.sid == *sid) {
      return Ok(());
    }

    match store.open(&KeyLocation::user_hive(sid), Access::Read) {
      Ok(_) => {
        debug!(sid = %sid, "user hive already loaded");
        return Ok(());
      }
      Err(StoreError::NotFound { .. }) => {}
      Err(source) => {
        return Err(HiveError::Probe {
          sid: sid.clone(),
          source,
        });
      }
    }

    let profile = identities
      .profile_path(sid)
      .map_err(|source| HiveError::ProfileNotFound {
        sid: sid.clone(),
        source,
      })?;
    let file = profile.join(USER_HIVE_FILE);

    info!(sid = %sid, file = %file.display(), "loading user hive");

    let mount_error = |source: NativeError| HiveError::Mount {
      sid: sid.clone(),
      file: file.clone(),
      source,
    };
    let privilege = store.restore_privilege().map_err(mount_error)?;
    let loaded = store.load_hive(sid, &file);
    drop(privilege);
    loaded.map_err(mount_error)?;

    self.loaded.push(LoadedHive { sid: sid.clone(), file });
    Ok(())
  }

  /// Unload every hive loaded by this run.
  ///
  /// Failures are collected and logged; each one leaves the remaining hives
  /// unaffected. The list is drained either way, so a second call does nothing.
  pub fn unmount_all<L: HiveLoader>(&mut self, loader: &L) -> Vec<UnmountFailure> {
    if self.loaded.is_empty() {
      return Vec::new();
    }

    let hives: Vec<LoadedHive> = self.loaded.drain(..).collect();
    info!(count = hives.len(), "unloading user hives");

    let privilege = match loader.restore_privilege() {
      Ok(privilege) => privilege,
      Err(error) => {
        warn!(error = %error, "failed to acquire the restore privilege, user hives stay loaded");
        return hives
          .into_iter()
          .map(|hive| UnmountFailure {
            hive,
            error: error.clone(),
          })
          .collect();
      }
    };

    let mut failures = Vec::new();
    for hive in hives {
      match loader.unload_hive(&hive.sid) {
        Ok(()) => debug!(sid = %hive.sid, "unloaded user hive"),
        Err(error) => {
          warn!(sid = %hive.sid, error = %error, "failed to unload user hive");
          failures.push(UnmountFailure { hive, error });
        }
      }
    }
    drop(privilege);

    failures
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use tracing_test::traced_test;

  use super::*;
  use crate::store::RawValue;
  use crate::store::memory::MemoryStore;
  use crate::util::testutil::FixedIdentities;

  fn alice() -> Sid {
    Sid("S-1-5-21-1001".into())
  }

  fn bob() -> Sid {
    Sid("S-1-5-21-1002".into())
  }

  fn setup() -> (MemoryStore, FixedIdentities) {
    let store = MemoryStore::new();
    store.add_hive_file(Path::new(r"C:\Users\alice").join(USER_HIVE_FILE));
    store.add_hive_file(Path::new(r"C:\Users\bob").join(USER_HIVE_FILE));
    let identities = FixedIdentities::new()
      .with_user("alice", alice(), r"C:\Users\alice")
      .with_user("bob", bob(), r"C:\Users\bob");
    (store, identities)
  }

  #[test]
  fn mounts_unloaded_hive_once() {
    let (store, identities) = setup();
    let mut hives = HiveManager::new();

    hives.ensure_mounted(&store, &identities, &alice()).unwrap();
    hives.ensure_mounted(&store, &identities, &alice()).unwrap();

    assert_eq!(store.load_count(), 1);
    assert!(store.is_mounted(&alice()));
    assert_eq!(hives.loaded().len(), 1);
    assert_eq!(hives.loaded()[0].file, Path::new(r"C:\Users\alice").join(USER_HIVE_FILE));
  }

  #[test]
  fn already_loaded_hive_is_left_alone() {
    let (store, identities) = setup();
    // A logged-on user's hive is already present.
    store.set_value(&KeyLocation::user_environment(&alice()), "PATH", RawValue::text("x"));
    let mut hives = HiveManager::new();

    hives.ensure_mounted(&store, &identities, &alice()).unwrap();

    assert_eq!(store.load_count(), 0);
    assert!(hives.loaded().is_empty());
    assert!(hives.unmount_all(&store).is_empty());
    assert_eq!(store.unload_count(), 0);
  }

  #[test]
  fn missing_profile_is_a_hive_error() {
    let store = MemoryStore::new();
    let identities = FixedIdentities::new();
    let mut hives = HiveManager::new();

    let err = hives.ensure_mounted(&store, &identities, &alice()).unwrap_err();
    assert!(matches!(err, HiveError::ProfileNotFound { .. }));
    assert!(hives.loaded().is_empty());
  }

  #[test]
  fn missing_hive_file_reports_native_code() {
    let store = MemoryStore::new();
    let identities = FixedIdentities::new().with_user("alice", alice(), r"C:\Users\alice");
    let mut hives = HiveManager::new();

    let err = hives.ensure_mounted(&store, &identities, &alice()).unwrap_err();
    match err {
      HiveError::Mount { source, .. } => assert_eq!(source.code, 2),
      other => panic!("expected Mount error, got: {}", other),
    }
    assert!(hives.loaded().is_empty());
  }

  #[test]
  fn unmount_all_uses_one_privilege_scope() {
    let (store, identities) = setup();
    let mut hives = HiveManager::new();
    hives.ensure_mounted(&store, &identities, &alice()).unwrap();
    hives.ensure_mounted(&store, &identities, &bob()).unwrap();
    let before = store.privilege_acquisitions();

    let failures = hives.unmount_all(&store);

    assert!(failures.is_empty());
    assert_eq!(store.privilege_acquisitions(), before + 1);
    assert_eq!(store.unload_count(), 2);
    assert!(!store.is_mounted(&alice()));
    assert!(!store.is_mounted(&bob()));
  }

  #[traced_test]
  #[test]
  fn unmount_failures_are_collected_and_logged() {
    let (store, identities) = setup();
    store.fail_unload(&alice());
    let mut hives = HiveManager::new();
    hives.ensure_mounted(&store, &identities, &alice()).unwrap();
    hives.ensure_mounted(&store, &identities, &bob()).unwrap();

    let failures = hives.unmount_all(&store);

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].hive.sid, alice());
    assert_eq!(failures[0].error.code, 5);
    assert!(!store.is_mounted(&bob()));
    assert!(logs_contain("failed to unload user hive"));
  }

  #[test]
  fn unmount_all_runs_once() {
    let (store, identities) = setup();
    let mut hives = HiveManager::new();
    hives.ensure_mounted(&store, &identities, &alice()).unwrap();

    hives.unmount_all(&store);
    hives.unmount_all(&store);

    assert_eq!(store.unload_count(), 1);
  }
}
