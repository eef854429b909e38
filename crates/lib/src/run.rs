//! Batch driver.
//!
//! [`run`] reconciles a list of resources inside one [`Session`], in order.
//! A failing resource is reported and the batch moves on; hives mounted along
//! the way are unloaded once, after the last resource, whatever happened.

use tracing::{error, info};

use crate::hive::UnmountFailure;
use crate::platform::{HiveLoader, Host, Identities, Notifier, PlatformError};
use crate::reconcile::{Outcome, ReconcileError, Session};
use crate::resource::EnvResource;
use crate::store::Store;

/// Whether changes are written or only planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
  #[default]
  Apply,
  Plan,
}

/// Result for one resource.
#[derive(Debug)]
pub struct ResourceReport {
  /// The resource as displayed: its name, plus the owner for user variables.
  pub resource: String,
  pub result: Result<Outcome, ReconcileError>,
}

/// Result of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
  pub resources: Vec<ResourceReport>,
  pub unmount_failures: Vec<UnmountFailure>,
}

impl RunReport {
  pub fn failed(&self) -> usize {
    self.resources.iter().filter(|report| report.result.is_err()).count()
  }

  pub fn changed(&self) -> usize {
    self
      .resources
      .iter()
      .filter(|report| matches!(report.result, Ok(Outcome::Applied(_) | Outcome::Planned(_))))
      .count()
  }

  pub fn is_success(&self) -> bool {
    self.failed() == 0
  }
}

/// Reconcile `resources` against `host`.
pub fn run<S, I, N>(host: &Host<S, I, N>, resources: &[EnvResource], mode: RunMode) -> RunReport
where
  S: Store + HiveLoader,
  I: Identities,
  N: Notifier,
{
  info!(count = resources.len(), mode = ?mode, "reconciling environment variables");

  let mut session = Session::new(host);
  let mut reports = Vec::with_capacity(resources.len());

  for resource in resources {
    let result = match mode {
      RunMode::Apply => session.reconcile(resource),
      RunMode::Plan => session.preview(resource),
    };
    if let Err(err) = &result {
      error!(variable = %resource, error = %err, "failed to reconcile environment variable");
    }
    reports.push(ResourceReport {
      resource: resource.to_string(),
      result,
    });
  }

  let unmount_failures = session.finish();
  let report = RunReport {
    resources: reports,
    unmount_failures,
  };
  info!(changed = report.changed(), failed = report.failed(), "run complete");
  report
}

/// Reconcile `resources` against the local machine's registry.
#[cfg(windows)]
pub fn run_native(resources: &[EnvResource], mode: RunMode) -> Result<RunReport, PlatformError> {
  let host = crate::platform::windows::host();
  Ok(run(&host, resources, mode))
}

/// Reconcile `resources` against the local machine's registry.
#[cfg(not(windows))]
pub fn run_native(_resources: &[EnvResource], _mode: RunMode) -> Result<RunReport, PlatformError> {
  Err(PlatformError::Unsupported(std::env::consts::OS))
}
