//! Per-run reconciliation against a [`Host`].
//!
//! A session resolves where each variable lives, mounting user hives on
//! demand, reads the stored value, and applies the change [`merge::plan`]
//! decides on. Every mutation is followed by an environment broadcast.

use std::collections::HashMap;

use tracing::{debug, info};

use super::{Change, Outcome, ReconcileError, merge};
use crate::hive::{HiveManager, UnmountFailure};
use crate::platform::{HiveLoader, Host, Identities, Notifier, Sid};
use crate::resource::EnvResource;
use crate::store::{Access, KeyLocation, RawValue, Store, StoreError, StoreKey};

/// The stored state of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
  /// Environment key the variable lives under.
  pub location: KeyLocation,
  /// Stored value, `None` when the key or value does not exist.
  pub current: Option<RawValue>,
}

/// Reconciliation context for one run.
///
/// Owns the hives mounted during the run and the SIDs resolved so far.
/// [`Session::finish`] unloads the hives; dropping an unfinished session does
/// the same, so an early return or a panic never leaves a user's hive loaded.
pub struct Session<'h, S, I, N>
where
  S: Store + HiveLoader,
{
  host: &'h Host<S, I, N>,
  hives: HiveManager,
  sids: HashMap<String, Sid>,
}

impl<'h, S, I, N> Session<'h, S, I, N>
where
  S: Store + HiveLoader,
  I: Identities,
  N: Notifier,
{
  pub fn new(host: &'h Host<S, I, N>) -> Self {
    Self {
      host,
      hives: HiveManager::new(),
      sids: HashMap::new(),
    }
  }

  pub fn hives(&self) -> &HiveManager {
    &self.hives
  }

  /// Bring `resource` in line with its declaration.
  pub fn reconcile(&mut self, resource: &EnvResource) -> Result<Outcome, ReconcileError> {
    let observation = self.inspect(resource)?;
    match merge::plan(resource, observation.current.as_ref()) {
      None => {
        debug!(variable = %resource, "in sync");
        Ok(Outcome::InSync)
      }
      Some(change) => {
        self.apply(resource, &observation.location, &change)?;
        Ok(Outcome::Applied(change))
      }
    }
  }

  /// Decide what reconciling `resource` would change, without writing.
  pub fn preview(&mut self, resource: &EnvResource) -> Result<Outcome, ReconcileError> {
    let observation = self.inspect(resource)?;
    Ok(match merge::plan(resource, observation.current.as_ref()) {
      None => Outcome::InSync,
      Some(change) => Outcome::Planned(change),
    })
  }

  /// Resolve the target key of `resource` and read its current value.
  pub fn inspect(&mut self, resource: &EnvResource) -> Result<Observation, ReconcileError> {
    let location = self.target(resource)?;
    let current = self.read(&location, resource.name())?;
    debug!(
      variable = %resource,
      location = %location,
      current = ?current.as_ref().map(|value| value.data.as_str()),
      "inspected"
    );
    Ok(Observation { location, current })
  }

  /// Write `change` for `resource` under `location`, then broadcast.
  pub fn apply(&mut self, resource: &EnvResource, location: &KeyLocation, change: &Change) -> Result<(), ReconcileError> {
    let store = &self.host.store;
    let name = resource.name();

    match (&change.before, &change.after) {
      (_, None) => {
        let key = store.open(location, Access::Write)?;
        key.delete(name)?;
      }
      (None, Some(value)) => {
        let key = store.create(location, Access::Write)?;
        key.write(name, value)?;
      }
      (Some(_), Some(value)) => {
        let key = store.open(location, Access::Write)?;
        key.write(name, value)?;
      }
    }

    info!(
      variable = %resource,
      location = %location,
      action = %change.action,
      value = ?change.after.as_ref().map(|value| value.data.as_str()),
      "updated environment variable"
    );
    self.host.notifier.broadcast(resource.broadcast_timeout());
    Ok(())
  }

  /// Unload every hive this session mounted.
  pub fn finish(mut self) -> Vec<UnmountFailure> {
    self.hives.unmount_all(&self.host.store)
  }

  fn target(&mut self, resource: &EnvResource) -> Result<KeyLocation, ReconcileError> {
    let Some(user) = resource.owner() else {
      return Ok(KeyLocation::machine_environment());
    };
    let sid = self.sid_for(user)?;
    self
      .hives
      .ensure_mounted(&self.host.store, &self.host.identities, &sid)?;
    Ok(KeyLocation::user_environment(&sid))
  }

  fn sid_for(&mut self, user: &str) -> Result<Sid, ReconcileError> {
    let folded = user.to_lowercase();
    if let Some(sid) = self.sids.get(&folded) {
      return Ok(sid.clone());
    }
    let sid = self.host.identities.resolve(user)?;
    debug!(user, sid = %sid, "resolved user");
    self.sids.insert(folded, sid.clone());
    Ok(sid)
  }

  fn read(&self, location: &KeyLocation, name: &str) -> Result<Option<RawValue>, StoreError> {
    let key = match self.host.store.open(location, Access::Read) {
      Ok(key) => key,
      Err(err) if err.is_not_found() => return Ok(None),
      Err(err) => return Err(err),
    };
    match key.read(name) {
      Ok(value) => Ok(Some(value)),
      Err(err) if err.is_not_found() => Ok(None),
      Err(err) => Err(err),
    }
  }
}

impl<S, I, N> Drop for Session<'_, S, I, N>
where
  S: Store + HiveLoader,
{
  fn drop(&mut self) {
    // No-op after `finish`, which drains the list.
    self.hives.unmount_all(&self.host.store);
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;
  use std::time::Duration;

  use super::*;
  use crate::consts::{USER_ENVIRONMENT_SUBKEY, USER_HIVE_FILE};
  use crate::platform::IdentityError;
  use crate::reconcile::Action;
  use crate::resource::{Ensure, MergeMode, ValueKind, VariableDecl};
  use crate::store::memory::MemoryStore;
  use crate::util::testutil::{FixedIdentities, RecordingNotifier};

  type TestHost = Host<MemoryStore, FixedIdentities, RecordingNotifier>;

  fn alice() -> Sid {
    Sid("S-1-5-21-1001".into())
  }

  fn hive_file() -> std::path::PathBuf {
    Path::new(r"C:\Users\alice").join(USER_HIVE_FILE)
  }

  fn host() -> TestHost {
    let store = MemoryStore::new();
    store.add_hive_file(hive_file());
    let identities = FixedIdentities::new().with_user("alice", alice(), r"C:\Users\alice");
    Host::new(store, identities, RecordingNotifier::new())
  }

  fn machine() -> KeyLocation {
    KeyLocation::machine_environment()
  }

  #[test]
  fn creates_unset_machine_variable() {
    let host = host();
    let resource = VariableDecl::new("TOOLS").value("C:\\tools").build().unwrap();

    let mut session = Session::new(&host);
    let outcome = session.reconcile(&resource).unwrap();
    assert!(session.finish().is_empty());

    assert!(matches!(outcome, Outcome::Applied(Change { action: Action::Create, .. })));
    assert_eq!(host.store.value(&machine(), "TOOLS"), Some(RawValue::text("C:\\tools")));
    assert_eq!(host.notifier.count(), 1);
    assert_eq!(host.store.open_handles(), 0);
  }

  #[test]
  fn in_sync_variable_is_not_touched() {
    let host = host();
    host.store.set_value(&machine(), "PATH", RawValue::expandable("A;B;C"));
    let resource = VariableDecl::new("PATH").values(["A", "C"]).build().unwrap();

    let mut session = Session::new(&host);
    assert_eq!(session.reconcile(&resource).unwrap(), Outcome::InSync);
    session.finish();

    assert_eq!(host.notifier.count(), 0);
    assert_eq!(host.store.value(&machine(), "PATH"), Some(RawValue::expandable("A;B;C")));
  }

  #[test]
  fn broadcast_uses_declared_timeout() {
    let host = host();
    let resource = VariableDecl::new("X").value("1").broadcast_timeout(250).build().unwrap();

    let mut session = Session::new(&host);
    session.reconcile(&resource).unwrap();
    session.finish();

    assert_eq!(host.notifier.timeouts(), vec![Duration::from_millis(250)]);
  }

  #[test]
  fn user_variable_mounts_writes_and_unmounts() {
    let host = host();
    let resource = VariableDecl::new("PATH")
      .value("C:\\Users\\alice\\bin")
      .merge_mode(MergeMode::Append)
      .user("alice")
      .build()
      .unwrap();

    let mut session = Session::new(&host);
    session.reconcile(&resource).unwrap();
    assert!(host.store.is_mounted(&alice()));
    assert!(session.finish().is_empty());

    assert!(!host.store.is_mounted(&alice()));
    assert_eq!(
      host.store.hive_value(&hive_file(), USER_ENVIRONMENT_SUBKEY, "PATH"),
      Some(RawValue::text("C:\\Users\\alice\\bin"))
    );
    assert_eq!(host.store.open_handles(), 0);
  }

  #[test]
  fn same_user_shares_one_mount() {
    let host = host();
    let first = VariableDecl::new("A").value("1").user("alice").build().unwrap();
    let second = VariableDecl::new("B").value("2").user("ALICE").build().unwrap();

    let mut session = Session::new(&host);
    session.reconcile(&first).unwrap();
    session.reconcile(&second).unwrap();
    session.finish();

    assert_eq!(host.store.load_count(), 1);
    assert_eq!(host.store.unload_count(), 1);
  }

  #[test]
  fn dropping_an_unfinished_session_unmounts() {
    let host = host();
    let resource = VariableDecl::new("A").value("1").user("alice").build().unwrap();

    {
      let mut session = Session::new(&host);
      session.reconcile(&resource).unwrap();
      assert!(host.store.is_mounted(&alice()));
    }

    assert!(!host.store.is_mounted(&alice()));
    assert_eq!(host.store.unload_count(), 1);
  }

  #[test]
  fn unknown_user_fails_with_identity_error() {
    let host = host();
    let resource = VariableDecl::new("A").value("1").user("mallory").build().unwrap();

    let mut session = Session::new(&host);
    let err = session.reconcile(&resource).unwrap_err();
    session.finish();

    match err {
      ReconcileError::Identity(IdentityError::Unresolved { user, .. }) => assert_eq!(user, "mallory"),
      other => panic!("expected identity error, got: {}", other),
    }
    assert_eq!(host.store.load_count(), 0);
  }

  #[test]
  fn denied_write_is_a_store_error() {
    let host = host();
    host.store.set_value(&machine(), "PATH", RawValue::text("A"));
    host.store.deny_writes(&machine());
    let resource = VariableDecl::new("PATH").value("B").build().unwrap();

    let mut session = Session::new(&host);
    let err = session.reconcile(&resource).unwrap_err();
    session.finish();

    assert!(matches!(err, ReconcileError::Store(StoreError::Native { .. })));
    assert!(err.to_string().contains("returned error 5"));
    assert_eq!(host.notifier.count(), 0);
    assert_eq!(host.store.open_handles(), 0);
  }

  #[test]
  fn preview_does_not_write() {
    let host = host();
    host.store.set_value(&machine(), "PATH", RawValue::text("A;B;C"));
    let resource = VariableDecl::new("PATH")
      .value("B")
      .merge_mode(MergeMode::Append)
      .build()
      .unwrap();

    let mut session = Session::new(&host);
    let outcome = session.preview(&resource).unwrap();
    session.finish();

    let change = outcome.change().unwrap();
    assert!(matches!(outcome, Outcome::Planned(_)));
    assert_eq!(change.after, Some(RawValue::text("A;C;B")));
    assert_eq!(host.store.value(&machine(), "PATH"), Some(RawValue::text("A;B;C")));
    assert_eq!(host.notifier.count(), 0);
  }

  #[test]
  fn destroy_keeps_empty_remainder() {
    let host = host();
    host.store.set_value(&machine(), "LIST", RawValue::expandable("A"));
    let resource = VariableDecl::new("LIST").value("a").ensure(Ensure::Absent).build().unwrap();

    let mut session = Session::new(&host);
    session.reconcile(&resource).unwrap();
    session.finish();

    assert_eq!(host.store.value(&machine(), "LIST"), Some(RawValue::expandable("")));
    assert_eq!(host.notifier.count(), 1);
  }

  #[test]
  fn set_kind_rewrites_user_value() {
    let host = host();
    host
      .store
      .set_hive_value(&hive_file(), USER_ENVIRONMENT_SUBKEY, "TEMP", RawValue::text(r"%USERPROFILE%\Temp"));
    let resource = VariableDecl::new("TEMP")
      .value(r"%USERPROFILE%\Temp")
      .merge_mode(MergeMode::Clobber)
      .value_kind(ValueKind::ExpandableText)
      .user("alice")
      .build()
      .unwrap();

    let mut session = Session::new(&host);
    let outcome = session.reconcile(&resource).unwrap();
    session.finish();

    assert_eq!(outcome.change().map(|c| c.action), Some(Action::SetKind));
    assert_eq!(
      host.store.hive_value(&hive_file(), USER_ENVIRONMENT_SUBKEY, "TEMP"),
      Some(RawValue::expandable(r"%USERPROFILE%\Temp"))
    );
  }
}
