//! Rendering of run reports, shared by every command that reconciles.

use anyhow::{Result, bail};
use owo_colors::{OwoColorize, Stream};
use serde_json::{Value, json};

use winenv_lib::reconcile::{Action, Change, Outcome};
use winenv_lib::{ResourceReport, RunMode, RunReport};

use crate::output::{
  OutputFormat, format_value, print_error, print_info, print_json, print_stat, print_success, print_warning, symbols,
};

/// Print `report` and fail if any variable could not be reconciled.
pub fn finish(report: &RunReport, mode: RunMode, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    print_json(&to_json(report, mode))?;
  } else {
    print_text(report, mode);
  }

  let failed = report.failed();
  if failed > 0 {
    bail!("{} of {} variable(s) failed to reconcile", failed, report.resources.len());
  }
  Ok(())
}

fn print_text(report: &RunReport, mode: RunMode) {
  for resource in &report.resources {
    match &resource.result {
      Ok(Outcome::InSync) => println!(
        "  {} {} {}",
        symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        resource.resource,
        "(in sync)".if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
      Ok(Outcome::Applied(change) | Outcome::Planned(change)) => print_change(&resource.resource, change),
      Err(err) => print_error(&format!("{}: {}", resource.resource, err)),
    }
  }

  for failure in &report.unmount_failures {
    print_warning(&failure.to_string());
  }

  println!();
  let changed = report.changed();
  match (mode, changed) {
    (_, 0) if report.failed() == 0 => print_info("No changes"),
    (RunMode::Apply, n) => print_success(&format!("Applied {} change(s)", n)),
    (RunMode::Plan, n) => print_info(&format!("Would apply {} change(s)", n)),
  }
  print_stat("Variables", &report.resources.len().to_string());
  print_stat("Changed", &changed.to_string());
  print_stat("Failed", &report.failed().to_string());
}

fn print_change(resource: &str, change: &Change) {
  let before = change.before.as_ref().map(|value| value.data.as_str());
  let after = change.after.as_ref().map(|value| value.data.as_str());

  let symbol = match (before, after) {
    (None, _) => symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    (_, None) => symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    _ => symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
  };

  let detail = match (change.action, &change.after) {
    (Action::SetKind, Some(value)) => format!("type {} {}", symbols::ARROW, value.kind),
    _ => format!("{} {} {}", format_value(before), symbols::ARROW, format_value(after)),
  };
  println!("  {} {}: {}", symbol, resource, detail);
}

fn to_json(report: &RunReport, mode: RunMode) -> Value {
  let resources: Vec<Value> = report.resources.iter().map(resource_json).collect();
  let unmount_failures: Vec<Value> = report
    .unmount_failures
    .iter()
    .map(|failure| {
      json!({
        "sid": failure.hive.sid.as_str(),
        "file": failure.hive.file.display().to_string(),
        "code": failure.error.code,
        "message": failure.error.message,
      })
    })
    .collect();

  let mode = match mode {
    RunMode::Apply => "apply",
    RunMode::Plan => "plan",
  };
  json!({
    "mode": mode,
    "changed": report.changed(),
    "failed": report.failed(),
    "resources": resources,
    "unmount_failures": unmount_failures,
  })
}

fn resource_json(report: &ResourceReport) -> Value {
  let (status, change) = match &report.result {
    Ok(Outcome::InSync) => ("in_sync", None),
    Ok(Outcome::Applied(change)) => ("applied", Some(change)),
    Ok(Outcome::Planned(change)) => ("planned", Some(change)),
    Err(err) => return json!({ "variable": report.resource, "status": "failed", "error": err.to_string() }),
  };
  let Some(change) = change else {
    return json!({ "variable": report.resource, "status": status });
  };
  json!({
    "variable": report.resource,
    "status": status,
    "action": change.action.as_str(),
    "before": change.before.as_ref().map(|value| value.data.as_str()),
    "after": change.after.as_ref().map(|value| value.data.as_str()),
    "type": change.after.as_ref().map(|value| value.kind.as_str()),
  })
}
