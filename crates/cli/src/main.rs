mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use winenv_lib::Ensure;

use crate::cmd::VariableArgs;
use crate::output::OutputFormat;

/// winenv - Declarative Windows environment variables
#[derive(Parser)]
#[command(name = "winenv")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Reconcile every variable declared in a configuration file
  Apply {
    /// Path to the configuration file (.lua or .json)
    #[arg(default_value = "winenv.lua")]
    config: PathBuf,
  },

  /// Show what apply would change, without writing
  Plan {
    /// Path to the configuration file (.lua or .json)
    #[arg(default_value = "winenv.lua")]
    config: PathBuf,
  },

  /// Ensure a single variable holds a value
  Set(VariableArgs),

  /// Ensure a single variable, or some of its segments, is absent
  Unset(VariableArgs),
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Apply { config } => cmd::cmd_apply(&config, cli.output),
    Commands::Plan { config } => cmd::cmd_plan(&config, cli.output),
    Commands::Set(args) => cmd::cmd_set(args, Ensure::Present, cli.output),
    Commands::Unset(args) => cmd::cmd_set(args, Ensure::Absent, cli.output),
  }
}
