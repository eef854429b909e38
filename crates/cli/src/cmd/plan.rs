//! Implementation of the `winenv plan` command.
//!
//! Like `apply`, but only reads: each variable is inspected and the change
//! reconciling it would make is printed. User hives loaded for inspection are
//! unloaded again before the command returns.

use std::path::Path;

use anyhow::{Context, Result};

use winenv_lib::manifest::load_resources;
use winenv_lib::{RunMode, run_native};

use crate::cmd::report;
use crate::output::OutputFormat;

pub fn cmd_plan(file: &Path, output: OutputFormat) -> Result<()> {
  let resources =
    load_resources(file).with_context(|| format!("Failed to load config: {}", file.display()))?;

  let report = run_native(&resources, RunMode::Plan)?;
  report::finish(&report, RunMode::Plan, output)
}
