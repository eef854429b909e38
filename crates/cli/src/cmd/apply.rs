//! Implementation of the `winenv apply` command.
//!
//! Loads a configuration file and brings every declared variable in line with
//! the registry, in declaration order.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use winenv_lib::manifest::load_resources;
use winenv_lib::{RunMode, run_native};

use crate::cmd::report;
use crate::output::OutputFormat;

pub fn cmd_apply(file: &Path, output: OutputFormat) -> Result<()> {
  let resources =
    load_resources(file).with_context(|| format!("Failed to load config: {}", file.display()))?;
  info!(path = %file.display(), count = resources.len(), "applying config");

  let report = run_native(&resources, RunMode::Apply)?;
  report::finish(&report, RunMode::Apply, output)
}
