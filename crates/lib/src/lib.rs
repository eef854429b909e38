//! winenv-lib: Windows environment variable reconciliation
//!
//! This crate provides the pieces that bring declared environment variables
//! in line with the registry:
//! - `EnvResource`: an immutable, validated variable declaration
//! - `Store`: scoped access to registry keys (real registry or in-memory)
//! - `HiveManager`: on-demand mounting of unloaded user profile hives
//! - `Session`: the per-run reconciliation context (inspect, decide, apply)
//! - `run`: the batch driver that guarantees hive cleanup at run end

pub mod consts;
pub mod hive;
pub mod manifest;
pub mod platform;
pub mod reconcile;
pub mod resource;
pub mod run;
pub mod store;
pub mod util;

pub use resource::{Ensure, EnvResource, MergeMode, ValidationError, ValueKind, VariableDecl};
pub use run::{ResourceReport, RunMode, RunReport, run, run_native};
