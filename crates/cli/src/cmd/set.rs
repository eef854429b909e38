//! Implementation of the `winenv set` and `winenv unset` commands.
//!
//! Both reconcile a single variable declared on the command line; `unset`
//! declares it absent.

use anyhow::{Context, Result};
use clap::Args;

use winenv_lib::{Ensure, EnvResource, MergeMode, RunMode, ValueKind, VariableDecl, run_native};

use crate::cmd::report;
use crate::output::OutputFormat;

/// A variable declared on the command line.
#[derive(Debug, Args)]
pub struct VariableArgs {
  /// Variable name, or NAME=VALUE
  pub variable: String,

  /// Value segment; repeat for several. Overrides a value given as NAME=VALUE
  #[arg(long = "value")]
  pub values: Vec<String>,

  /// How the value merges with the stored one: clobber, insert, append, prepend
  #[arg(short, long)]
  pub mode: Option<MergeMode>,

  /// Segment separator (default: ";")
  #[arg(long)]
  pub separator: Option<String>,

  /// Registry value type: REG_SZ or REG_EXPAND_SZ
  #[arg(long = "type")]
  pub kind: Option<ValueKind>,

  /// Target this user's environment instead of the machine's
  #[arg(short, long)]
  pub user: Option<String>,

  /// Broadcast timeout per window, in milliseconds
  #[arg(long)]
  pub broadcast_timeout: Option<u32>,
}

impl VariableArgs {
  fn into_resource(self, ensure: Ensure) -> Result<EnvResource> {
    let mut decl = VariableDecl::from_title(self.variable).ensure(ensure);
    if !self.values.is_empty() {
      decl = decl.values(self.values);
    }
    decl.merge_mode = self.mode;
    decl.separator = self.separator;
    decl.value_kind = self.kind;
    decl.user = self.user;
    decl.broadcast_timeout = self.broadcast_timeout;
    decl.build().context("Invalid variable declaration")
  }
}

pub fn cmd_set(args: VariableArgs, ensure: Ensure, output: OutputFormat) -> Result<()> {
  let resource = args.into_resource(ensure)?;
  let report = run_native(std::slice::from_ref(&resource), RunMode::Apply)?;
  report::finish(&report, RunMode::Apply, output)
}
