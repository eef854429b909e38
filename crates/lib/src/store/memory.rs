//! In-memory registry.
//!
//! Behaves like the registry as far as this crate cares: key paths and value
//! names are case-insensitive (case is preserved for values), keys must exist
//! before they can be opened, and detached hive files can be loaded under
//! `HKEY_USERS\<sid>` and unloaded again. Write access, failed unloads, and the
//! restore privilege are all observable so reconciliation can be tested
//! without a Windows host.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::consts::{
  ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_INVALID_PARAMETER, ERROR_PRIVILEGE_NOT_HELD,
  ERROR_SHARING_VIOLATION, USER_ENVIRONMENT_SUBKEY,
};
use crate::platform::{HiveLoader, NativeError, Sid};

use super::{Access, KeyLocation, RawValue, Store, StoreAction, StoreError, StoreKey};

/// Values of one key: folded name -> (original name, value).
type Values = BTreeMap<String, (String, RawValue)>;

/// Keys of a detached hive: folded path relative to the hive root -> values.
type HiveTree = BTreeMap<String, Values>;

#[derive(Debug, Default)]
struct State {
  keys: BTreeMap<String, Values>,
  hive_files: BTreeMap<PathBuf, HiveTree>,
  mounted: BTreeMap<String, PathBuf>,
  denied: BTreeSet<String>,
  failing_unloads: BTreeSet<String>,
  privilege_depth: usize,
  privilege_acquisitions: usize,
  open_handles: usize,
  loads: usize,
  unloads: usize,
}

/// In-memory registry implementing [`Store`] and [`HiveLoader`].
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: RefCell<State>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create `location` (and its parents) if needed and set a value under it.
  pub fn set_value(&self, location: &KeyLocation, name: &str, value: RawValue) {
    let mut state = self.state.borrow_mut();
    let key = insert_key(&mut state.keys, &fold_location(location), 1);
    key.insert(fold(name), (name.to_string(), value));
  }

  pub fn value(&self, location: &KeyLocation, name: &str) -> Option<RawValue> {
    let state = self.state.borrow();
    state
      .keys
      .get(&fold_location(location))
      .and_then(|values| values.get(&fold(name)))
      .map(|(_, value)| value.clone())
  }

  pub fn key_exists(&self, location: &KeyLocation) -> bool {
    self.state.borrow().keys.contains_key(&fold_location(location))
  }

  /// Register a detached hive file holding an empty `Environment` key.
  pub fn add_hive_file(&self, file: impl Into<PathBuf>) {
    let mut tree = HiveTree::new();
    tree.insert(String::new(), Values::new());
    tree.insert(fold(USER_ENVIRONMENT_SUBKEY), Values::new());
    self.state.borrow_mut().hive_files.insert(file.into(), tree);
  }

  /// Set a value inside a detached hive file; `subkey` is relative to the hive root.
  pub fn set_hive_value(&self, file: &Path, subkey: &str, name: &str, value: RawValue) {
    let mut state = self.state.borrow_mut();
    let tree = state.hive_files.entry(file.to_path_buf()).or_default();
    let key = insert_key(tree, &fold(subkey), 0);
    key.insert(fold(name), (name.to_string(), value));
  }

  /// Read a value from a detached (currently unloaded) hive file.
  pub fn hive_value(&self, file: &Path, subkey: &str, name: &str) -> Option<RawValue> {
    let state = self.state.borrow();
    state
      .hive_files
      .get(file)
      .and_then(|tree| tree.get(&fold(subkey)))
      .and_then(|values| values.get(&fold(name)))
      .map(|(_, value)| value.clone())
  }

  /// Make opening `location` for writing fail with access denied.
  pub fn deny_writes(&self, location: &KeyLocation) {
    self.state.borrow_mut().denied.insert(fold_location(location));
  }

  /// Make unloading the hive of `sid` fail with access denied.
  pub fn fail_unload(&self, sid: &Sid) {
    self.state.borrow_mut().failing_unloads.insert(fold(sid.as_str()));
  }

  pub fn is_mounted(&self, sid: &Sid) -> bool {
    self.state.borrow().mounted.contains_key(&fold(sid.as_str()))
  }

  pub fn load_count(&self) -> usize {
    self.state.borrow().loads
  }

  pub fn unload_count(&self) -> usize {
    self.state.borrow().unloads
  }

  pub fn privilege_acquisitions(&self) -> usize {
    self.state.borrow().privilege_acquisitions
  }

  /// Number of key handles not yet dropped.
  pub fn open_handles(&self) -> usize {
    self.state.borrow().open_handles
  }

  fn handle(&self, location: &KeyLocation, folded: String, access: Access) -> MemoryKey<'_> {
    self.state.borrow_mut().open_handles += 1;
    MemoryKey {
      store: self,
      location: location.clone(),
      folded,
      access,
    }
  }

  fn check_privilege(state: &State) -> Result<(), NativeError> {
    if state.privilege_depth == 0 {
      return Err(NativeError::new(
        ERROR_PRIVILEGE_NOT_HELD,
        "A required privilege is not held by the client.",
      ));
    }
    Ok(())
  }
}

impl Store for MemoryStore {
  type Key<'a> = MemoryKey<'a>;

  fn open(&self, location: &KeyLocation, access: Access) -> Result<MemoryKey<'_>, StoreError> {
    let folded = fold_location(location);
    {
      let state = self.state.borrow();
      if !state.keys.contains_key(&folded) {
        return Err(StoreError::NotFound {
          path: location.to_string(),
        });
      }
      if access == Access::Write && state.denied.contains(&folded) {
        return Err(StoreError::native(StoreAction::Opening, location.to_string(), access_denied()));
      }
    }
    Ok(self.handle(location, folded, access))
  }

  fn create(&self, location: &KeyLocation, access: Access) -> Result<MemoryKey<'_>, StoreError> {
    let folded = fold_location(location);
    {
      let mut state = self.state.borrow_mut();
      if state.denied.contains(&folded) {
        return Err(StoreError::native(StoreAction::Creating, location.to_string(), access_denied()));
      }
      insert_key(&mut state.keys, &folded, 1);
    }
    Ok(self.handle(location, folded, access))
  }
}

impl HiveLoader for MemoryStore {
  type Privilege<'a> = MemoryPrivilege<'a>;

  fn restore_privilege(&self) -> Result<MemoryPrivilege<'_>, NativeError> {
    let mut state = self.state.borrow_mut();
    state.privilege_depth += 1;
    state.privilege_acquisitions += 1;
    Ok(MemoryPrivilege { store: self })
  }

  fn load_hive(&self, sid: &Sid, file: &Path) -> Result<(), NativeError> {
    let mut state = self.state.borrow_mut();
    Self::check_privilege(&state)?;

    let sid_key = fold(sid.as_str());
    if state.mounted.contains_key(&sid_key) {
      return Err(NativeError::new(
        ERROR_SHARING_VIOLATION,
        "The process cannot access the file because it is being used by another process.",
      ));
    }
    let tree = state.hive_files.remove(file).ok_or_else(|| {
      NativeError::new(ERROR_FILE_NOT_FOUND, "The system cannot find the file specified.")
    })?;

    let root = fold_location(&KeyLocation::user_hive(sid));
    for (relative, values) in tree {
      let path = if relative.is_empty() {
        root.clone()
      } else {
        format!(r"{}\{}", root, relative)
      };
      state.keys.insert(path, values);
    }
    state.mounted.insert(sid_key, file.to_path_buf());
    state.loads += 1;
    Ok(())
  }

  fn unload_hive(&self, sid: &Sid) -> Result<(), NativeError> {
    let mut state = self.state.borrow_mut();
    Self::check_privilege(&state)?;

    let sid_key = fold(sid.as_str());
    if state.failing_unloads.contains(&sid_key) {
      return Err(access_denied());
    }
    let file = state
      .mounted
      .remove(&sid_key)
      .ok_or_else(|| NativeError::new(ERROR_INVALID_PARAMETER, "The parameter is incorrect."))?;

    let root = fold_location(&KeyLocation::user_hive(sid));
    let prefix = format!(r"{}\", root);
    let paths: Vec<String> = state
      .keys
      .keys()
      .filter(|path| **path == root || path.starts_with(&prefix))
      .cloned()
      .collect();

    let mut tree = HiveTree::new();
    for path in paths {
      if let Some(values) = state.keys.remove(&path) {
        let relative = path.strip_prefix(&prefix).unwrap_or_default().to_string();
        tree.insert(relative, values);
      }
    }
    state.hive_files.insert(file, tree);
    state.unloads += 1;
    Ok(())
  }
}

/// Open key of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryKey<'a> {
  store: &'a MemoryStore,
  location: KeyLocation,
  folded: String,
  access: Access,
}

impl MemoryKey<'_> {
  fn check_writable(&self, action: StoreAction, name: &str) -> Result<(), StoreError> {
    if self.access == Access::Read {
      return Err(StoreError::native(action, self.location.value_path(name), access_denied()));
    }
    Ok(())
  }

  fn key_gone(&self, action: StoreAction, name: &str) -> StoreError {
    StoreError::native(
      action,
      self.location.value_path(name),
      NativeError::new(1018, "Illegal operation attempted on a registry key that has been marked for deletion."),
    )
  }
}

impl StoreKey for MemoryKey<'_> {
  fn location(&self) -> &KeyLocation {
    &self.location
  }

  fn read(&self, name: &str) -> Result<RawValue, StoreError> {
    let state = self.store.state.borrow();
    let values = state
      .keys
      .get(&self.folded)
      .ok_or_else(|| self.key_gone(StoreAction::Reading, name))?;
    values
      .get(&fold(name))
      .map(|(_, value)| value.clone())
      .ok_or_else(|| StoreError::NotFound {
        path: self.location.value_path(name),
      })
  }

  fn write(&self, name: &str, value: &RawValue) -> Result<(), StoreError> {
    self.check_writable(StoreAction::Writing, name)?;
    let mut state = self.store.state.borrow_mut();
    let values = state
      .keys
      .get_mut(&self.folded)
      .ok_or_else(|| self.key_gone(StoreAction::Writing, name))?;
    // An existing value keeps the case of its name.
    let folded = fold(name);
    let stored_name = values
      .get(&folded)
      .map(|(original, _)| original.clone())
      .unwrap_or_else(|| name.to_string());
    values.insert(folded, (stored_name, value.clone()));
    Ok(())
  }

  fn delete(&self, name: &str) -> Result<(), StoreError> {
    self.check_writable(StoreAction::Deleting, name)?;
    let mut state = self.store.state.borrow_mut();
    let values = state
      .keys
      .get_mut(&self.folded)
      .ok_or_else(|| self.key_gone(StoreAction::Deleting, name))?;
    match values.remove(&fold(name)) {
      Some(_) => Ok(()),
      None => Err(StoreError::NotFound {
        path: self.location.value_path(name),
      }),
    }
  }
}

impl Drop for MemoryKey<'_> {
  fn drop(&mut self) {
    self.store.state.borrow_mut().open_handles -= 1;
  }
}

/// Held restore privilege of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryPrivilege<'a> {
  store: &'a MemoryStore,
}

impl Drop for MemoryPrivilege<'_> {
  fn drop(&mut self) {
    self.store.state.borrow_mut().privilege_depth -= 1;
  }
}

fn fold(s: &str) -> String {
  s.to_lowercase()
}

fn fold_location(location: &KeyLocation) -> String {
  fold(&location.to_string())
}

fn access_denied() -> NativeError {
  NativeError::new(ERROR_ACCESS_DENIED, "Access is denied.")
}

/// Insert `path` and its ancestors, returning the key's values.
///
/// The first `skip` components are not keys themselves (the hive name).
fn insert_key<'m>(keys: &'m mut BTreeMap<String, Values>, path: &str, skip: usize) -> &'m mut Values {
  let parts: Vec<&str> = path.split('\\').collect();
  for depth in (skip + 1)..parts.len() {
    keys.entry(parts[..depth].join("\\")).or_default();
  }
  keys.entry(path.to_string()).or_default()
}
