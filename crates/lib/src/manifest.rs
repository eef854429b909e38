//! Configuration files declaring environment variables.
//!
//! Two formats are accepted, chosen by file extension:
//!
//! - `.lua`: a Lua 5.4 chunk returning the manifest table
//! - `.json`: the same shape as JSON
//!
//! ```lua
//! return {
//!   variables = {
//!     { name = "PATH", value = { "C:\\tools", "C:\\bin" }, mergemode = "append" },
//!     { title = "JAVA_HOME=C:\\jdk", mergemode = "clobber", type = "REG_SZ" },
//!     { name = "PATH", value = "C:\\old", ensure = "absent", user = "alice" },
//!   },
//! }
//! ```
//!
//! Every declaration is validated before anything touches the registry; the
//! first invalid one fails the whole load.

use std::path::{Path, PathBuf};

use mlua::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::resource::{EnvResource, ValidationError, VariableDecl};

/// Errors that can occur while loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("config file not found: {}", .0.display())]
  NotFound(PathBuf),

  #[error("failed to read '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("unsupported config format '{}' (expected .lua or .json)", .0.display())]
  UnsupportedFormat(PathBuf),

  #[error("invalid JSON in '{}': {source}", .path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// The Lua error is kept rendered: `mlua::Error` is neither `Send` nor `Sync`.
  #[error("lua error in '{}': {message}", .path.display())]
  Lua { path: PathBuf, message: String },

  #[error("variable #{index} ({name}): {source}")]
  Invalid {
    /// One-based position in `variables`.
    index: usize,
    name: String,
    #[source]
    source: ValidationError,
  },
}

/// The declared variables of one configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
  pub variables: Vec<VariableDecl>,
}

impl Manifest {
  /// Read a manifest from `path`, picking the format from its extension.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    if !path.exists() {
      return Err(ManifestError::NotFound(path.to_path_buf()));
    }

    let extension = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(str::to_ascii_lowercase);
    let source = || {
      std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
      })
    };

    let manifest = match extension.as_deref() {
      Some("lua") => Self::from_lua(&source()?, path)?,
      Some("json") => Self::from_json(&source()?, path)?,
      _ => return Err(ManifestError::UnsupportedFormat(path.to_path_buf())),
    };
    debug!(path = %path.display(), count = manifest.variables.len(), "loaded manifest");
    Ok(manifest)
  }

  /// Parse a JSON manifest; `path` is only used in error messages.
  pub fn from_json(json: &str, path: &Path) -> Result<Self, ManifestError> {
    serde_json::from_str(json).map_err(|source| ManifestError::Json {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Evaluate a Lua chunk returning the manifest table.
  pub fn from_lua(chunk: &str, path: &Path) -> Result<Self, ManifestError> {
    let lua_error = |message: String| ManifestError::Lua {
      path: path.to_path_buf(),
      message,
    };

    let lua = Lua::new();
    let value = lua
      .load(chunk)
      .set_name(format!("@{}", path.display()))
      .eval::<LuaValue>()
      .map_err(|err| lua_error(err.to_string()))?;

    if !value.is_table() {
      return Err(lua_error(format!("config must return a table, got {}", value.type_name())));
    }
    lua.from_value(value).map_err(|err| lua_error(err.to_string()))
  }

  /// Validate every declaration, in order.
  pub fn resources(&self) -> Result<Vec<EnvResource>, ManifestError> {
    self
      .variables
      .iter()
      .enumerate()
      .map(|(i, decl)| {
        EnvResource::try_from(decl.clone()).map_err(|source| ManifestError::Invalid {
          index: i + 1,
          name: display_name(decl),
          source,
        })
      })
      .collect()
  }
}

/// Load `path` and validate its declarations.
pub fn load_resources(path: &Path) -> Result<Vec<EnvResource>, ManifestError> {
  Manifest::load(path)?.resources()
}

fn display_name(decl: &VariableDecl) -> String {
  decl
    .name
    .clone()
    .or_else(|| {
      decl
        .title
        .as_deref()
        .map(|title| title.split_once('=').map_or(title, |(name, _)| name).to_string())
    })
    .unwrap_or_else(|| "unnamed".to_string())
}
