//! End-to-end reconciliation scenarios against the in-memory registry.

#![cfg(feature = "test-fixtures")]

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use winenv_lib::consts::{USER_ENVIRONMENT_SUBKEY, USER_HIVE_FILE};
use winenv_lib::platform::{Host, Identities, IdentityError, NativeError, Notifier, Sid};
use winenv_lib::reconcile::{Action, Outcome};
use winenv_lib::store::memory::MemoryStore;
use winenv_lib::store::{KeyLocation, RawValue};
use winenv_lib::{Ensure, EnvResource, MergeMode, RunMode, RunReport, VariableDecl, run};

const ALICE_SID: &str = "S-1-5-21-3623811015-3361044348-30300820-1013";

/// Knows a single user, `alice`.
struct OneUser;

impl Identities for OneUser {
  fn resolve(&self, user: &str) -> Result<Sid, IdentityError> {
    if user.eq_ignore_ascii_case("alice") {
      Ok(Sid(ALICE_SID.to_string()))
    } else {
      Err(IdentityError::Unresolved {
        user: user.to_string(),
        source: NativeError::new(1332, "No mapping between account names and security IDs was done."),
      })
    }
  }

  fn profile_path(&self, sid: &Sid) -> Result<PathBuf, IdentityError> {
    if sid.as_str() == ALICE_SID {
      Ok(PathBuf::from(r"C:\Users\alice"))
    } else {
      Err(IdentityError::NoProfile { sid: sid.clone() })
    }
  }
}

#[derive(Default)]
struct CountingNotifier {
  count: Cell<usize>,
}

impl Notifier for CountingNotifier {
  fn broadcast(&self, _timeout: Duration) {
    self.count.set(self.count.get() + 1);
  }
}

type TestHost = Host<MemoryStore, OneUser, CountingNotifier>;

fn host() -> TestHost {
  let store = MemoryStore::new();
  store.add_hive_file(alice_hive());
  Host::new(store, OneUser, CountingNotifier::default())
}

fn alice_hive() -> PathBuf {
  Path::new(r"C:\Users\alice").join(USER_HIVE_FILE)
}

fn machine() -> KeyLocation {
  KeyLocation::machine_environment()
}

fn apply(host: &TestHost, resource: EnvResource) -> RunReport {
  let report = run(host, &[resource], RunMode::Apply);
  assert!(report.is_success(), "run failed: {:?}", report.resources[0].result);
  assert!(report.unmount_failures.is_empty());
  report
}

fn action(report: &RunReport) -> Option<Action> {
  match &report.resources[0].result {
    Ok(outcome) => outcome.change().map(|change| change.action),
    Err(err) => panic!("unexpected error: {}", err),
  }
}

#[test]
fn unset_variable_is_created_with_clobber_write() {
  let host = host();
  let resource = VariableDecl::new("TOOLS").value("C:\\tools").build().unwrap();

  let report = apply(&host, resource);

  assert_eq!(action(&report), Some(Action::Create));
  assert_eq!(host.store.value(&machine(), "TOOLS"), Some(RawValue::text("C:\\tools")));
  assert_eq!(host.notifier.count.get(), 1);
}

#[test]
fn append_moves_existing_segment_to_the_end() {
  let host = host();
  host.store.set_value(&machine(), "PATH", RawValue::text("A;B;C"));
  let resource = VariableDecl::new("PATH")
    .value("B")
    .merge_mode(MergeMode::Append)
    .build()
    .unwrap();

  apply(&host, resource);

  assert_eq!(host.store.value(&machine(), "PATH"), Some(RawValue::text("A;C;B")));
}

#[test]
fn ordered_insert_in_place_is_in_sync() {
  let host = host();
  host.store.set_value(&machine(), "PATH", RawValue::text("A;B;C"));
  let resource = VariableDecl::new("PATH").values(["A", "C"]).build().unwrap();

  let report = apply(&host, resource);

  assert!(matches!(report.resources[0].result, Ok(Outcome::InSync)));
  assert_eq!(host.store.value(&machine(), "PATH"), Some(RawValue::text("A;B;C")));
  assert_eq!(host.notifier.count.get(), 0);
}

#[test]
fn ordered_insert_out_of_order_is_rewritten() {
  let host = host();
  host.store.set_value(&machine(), "PATH", RawValue::text("A;B;C"));
  let resource = VariableDecl::new("PATH").values(["C", "A"]).build().unwrap();

  apply(&host, resource);

  assert_eq!(host.store.value(&machine(), "PATH"), Some(RawValue::text("B;C;A")));
}

#[test]
fn absent_clobber_deletes_the_variable() {
  let host = host();
  host.store.set_value(&machine(), "OLD", RawValue::text("whatever"));
  let resource = VariableDecl::new("OLD")
    .ensure(Ensure::Absent)
    .merge_mode(MergeMode::Clobber)
    .build()
    .unwrap();

  let report = apply(&host, resource);

  assert_eq!(action(&report), Some(Action::Destroy));
  assert_eq!(host.store.value(&machine(), "OLD"), None);
  assert!(host.store.key_exists(&machine()));
}

#[test]
fn absent_prepend_removes_segment_anywhere() {
  let host = host();
  host.store.set_value(&machine(), "PATH", RawValue::text("A;B;C"));
  let resource = VariableDecl::new("PATH")
    .value("B")
    .ensure(Ensure::Absent)
    .merge_mode(MergeMode::Prepend)
    .build()
    .unwrap();

  apply(&host, resource);

  assert_eq!(host.store.value(&machine(), "PATH"), Some(RawValue::text("A;C")));
}

#[test]
fn absent_variable_that_is_unset_is_left_alone() {
  let host = host();
  let resource = VariableDecl::new("OLD")
    .ensure(Ensure::Absent)
    .merge_mode(MergeMode::Clobber)
    .build()
    .unwrap();

  let report = apply(&host, resource);

  assert!(matches!(report.resources[0].result, Ok(Outcome::InSync)));
  assert_eq!(host.notifier.count.get(), 0);
}

#[test]
fn second_run_is_idempotent() {
  let host = host();
  host.store.set_value(&machine(), "PATH", RawValue::expandable(r"%SystemRoot%;C:\bin"));
  let resource = VariableDecl::new("PATH")
    .value(r"C:\tools")
    .merge_mode(MergeMode::Prepend)
    .build()
    .unwrap();

  apply(&host, resource.clone());
  let report = apply(&host, resource);

  assert!(matches!(report.resources[0].result, Ok(Outcome::InSync)));
  assert_eq!(
    host.store.value(&machine(), "PATH"),
    Some(RawValue::expandable(r"C:\tools;%SystemRoot%;C:\bin"))
  );
  assert_eq!(host.notifier.count.get(), 1);
}

#[test]
fn empty_segments_are_stable_across_runs() {
  let host = host();
  let resource = VariableDecl::new("TRAILING")
    .value("A;;")
    .merge_mode(MergeMode::Clobber)
    .build()
    .unwrap();

  apply(&host, resource.clone());
  let report = apply(&host, resource);

  assert!(matches!(report.resources[0].result, Ok(Outcome::InSync)));
  assert_eq!(host.store.value(&machine(), "TRAILING"), Some(RawValue::text("A;;")));
  assert_eq!(host.notifier.count.get(), 1);
}

#[test]
fn empty_declared_value_is_rejected() {
  let err = VariableDecl::from_title("EMPTY=").build().unwrap_err();
  assert!(err.to_string().contains("'value' parameter must be provided"));
}

#[test]
fn user_variables_land_in_the_unloaded_profile_hive() {
  let host = host();
  host.store.set_hive_value(
    &alice_hive(),
    USER_ENVIRONMENT_SUBKEY,
    "Path",
    RawValue::expandable(r"%USERPROFILE%\bin"),
  );
  let resources = vec![
    VariableDecl::new("PATH")
      .value(r"C:\Users\alice\tools")
      .merge_mode(MergeMode::Append)
      .user("alice")
      .build()
      .unwrap(),
    VariableDecl::new("EDITOR")
      .value("vim")
      .merge_mode(MergeMode::Clobber)
      .user("Alice")
      .build()
      .unwrap(),
  ];

  let report = run(&host, &resources, RunMode::Apply);

  assert!(report.is_success());
  assert_eq!(host.store.load_count(), 1);
  assert_eq!(host.store.unload_count(), 1);
  assert!(!host.store.is_mounted(&Sid(ALICE_SID.to_string())));
  assert_eq!(
    host.store.hive_value(&alice_hive(), USER_ENVIRONMENT_SUBKEY, "PATH"),
    Some(RawValue::expandable(r"%USERPROFILE%\bin;C:\Users\alice\tools"))
  );
  assert_eq!(
    host.store.hive_value(&alice_hive(), USER_ENVIRONMENT_SUBKEY, "EDITOR"),
    Some(RawValue::text("vim"))
  );
  assert_eq!(host.store.open_handles(), 0);
}

#[test]
fn one_failing_resource_does_not_abort_the_batch() {
  let host = host();
  let resources = vec![
    VariableDecl::new("A").value("1").user("mallory").build().unwrap(),
    VariableDecl::new("B").value("2").user("alice").build().unwrap(),
    VariableDecl::new("C").value("3").build().unwrap(),
  ];

  let report = run(&host, &resources, RunMode::Apply);

  assert_eq!(report.failed(), 1);
  assert_eq!(report.changed(), 2);
  let err = report.resources[0].result.as_ref().unwrap_err();
  assert!(err.to_string().contains("mallory"));
  assert_eq!(
    host.store.hive_value(&alice_hive(), USER_ENVIRONMENT_SUBKEY, "B"),
    Some(RawValue::text("2"))
  );
  assert_eq!(host.store.value(&machine(), "C"), Some(RawValue::text("3")));
}

#[test]
fn plan_mounts_for_inspection_but_writes_nothing() {
  let host = host();
  let resource = VariableDecl::new("EDITOR").value("vim").user("alice").build().unwrap();

  let report = run(&host, &[resource], RunMode::Plan);

  assert!(matches!(report.resources[0].result, Ok(Outcome::Planned(_))));
  assert_eq!(host.store.load_count(), 1);
  assert_eq!(host.store.unload_count(), 1);
  assert_eq!(host.store.hive_value(&alice_hive(), USER_ENVIRONMENT_SUBKEY, "EDITOR"), None);
  assert_eq!(host.notifier.count.get(), 0);
}
