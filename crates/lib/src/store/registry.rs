//! The Windows registry.

use std::path::Path;
use std::ptr;

use tracing::trace;
use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_MORE_DATA, ERROR_SUCCESS, WIN32_ERROR};
use windows_sys::Win32::System::Registry::{
  HKEY, HKEY_LOCAL_MACHINE, HKEY_USERS, KEY_READ, KEY_WRITE, REG_EXPAND_SZ, REG_OPTION_NON_VOLATILE, REG_SAM_FLAGS,
  REG_SZ, REG_VALUE_TYPE, RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegLoadKeyW, RegOpenKeyExW,
  RegQueryValueExW, RegSetValueExW, RegUnLoadKeyW,
};

use super::{Access, Hive, KeyLocation, RawValue, Store, StoreAction, StoreError, StoreKey};
use crate::platform::windows::{RestorePrivilege, from_wide, to_wide};
use crate::platform::{HiveLoader, NativeError, Sid};
use crate::resource::ValueKind;

/// Registry access through the `Reg*W` family.
#[derive(Debug, Default)]
pub struct RegistryStore;

impl RegistryStore {
  pub fn new() -> Self {
    Self
  }
}

fn root(hive: Hive) -> HKEY {
  match hive {
    Hive::LocalMachine => HKEY_LOCAL_MACHINE,
    Hive::Users => HKEY_USERS,
  }
}

fn sam(access: Access) -> REG_SAM_FLAGS {
  match access {
    Access::Read => KEY_READ,
    Access::Write => KEY_READ | KEY_WRITE,
  }
}

/// Map a registry status to a store error for `path`.
fn check(status: WIN32_ERROR, action: StoreAction, path: impl FnOnce() -> String) -> Result<(), StoreError> {
  match status {
    ERROR_SUCCESS => Ok(()),
    ERROR_FILE_NOT_FOUND => Err(StoreError::NotFound { path: path() }),
    code => Err(StoreError::native(action, path(), NativeError::from_code(code))),
  }
}

impl Store for RegistryStore {
  type Key<'a> = RegistryKey;

  fn open(&self, location: &KeyLocation, access: Access) -> Result<RegistryKey, StoreError> {
    let subkey = to_wide(&location.path);
    let mut handle: HKEY = ptr::null_mut();
    // SAFETY: `subkey` is nul-terminated and `handle` is a valid out pointer.
    let status = unsafe { RegOpenKeyExW(root(location.hive), subkey.as_ptr(), 0, sam(access), &mut handle) };
    check(status, StoreAction::Opening, || location.to_string())?;
    trace!(location = %location, "opened key");
    Ok(RegistryKey {
      handle,
      location: location.clone(),
    })
  }

  fn create(&self, location: &KeyLocation, access: Access) -> Result<RegistryKey, StoreError> {
    let subkey = to_wide(&location.path);
    let mut handle: HKEY = ptr::null_mut();
    // SAFETY: `subkey` is nul-terminated; optional arguments are null.
    let status = unsafe {
      RegCreateKeyExW(
        root(location.hive),
        subkey.as_ptr(),
        0,
        ptr::null(),
        REG_OPTION_NON_VOLATILE,
        sam(access),
        ptr::null(),
        &mut handle,
        ptr::null_mut(),
      )
    };
    check(status, StoreAction::Creating, || location.to_string())?;
    Ok(RegistryKey {
      handle,
      location: location.clone(),
    })
  }
}

impl HiveLoader for RegistryStore {
  type Privilege<'a> = RestorePrivilege;

  fn restore_privilege(&self) -> Result<RestorePrivilege, NativeError> {
    RestorePrivilege::acquire()
  }

  fn load_hive(&self, sid: &Sid, file: &Path) -> Result<(), NativeError> {
    let subkey = to_wide(sid.as_str());
    let file = to_wide(file.as_os_str());
    // SAFETY: both strings are nul-terminated.
    match unsafe { RegLoadKeyW(HKEY_USERS, subkey.as_ptr(), file.as_ptr()) } {
      ERROR_SUCCESS => Ok(()),
      code => Err(NativeError::from_code(code)),
    }
  }

  fn unload_hive(&self, sid: &Sid) -> Result<(), NativeError> {
    let subkey = to_wide(sid.as_str());
    // SAFETY: `subkey` is nul-terminated.
    match unsafe { RegUnLoadKeyW(HKEY_USERS, subkey.as_ptr()) } {
      ERROR_SUCCESS => Ok(()),
      code => Err(NativeError::from_code(code)),
    }
  }
}

/// An open registry key; closed on drop.
#[derive(Debug)]
pub struct RegistryKey {
  handle: HKEY,
  location: KeyLocation,
}

impl StoreKey for RegistryKey {
  fn location(&self) -> &KeyLocation {
    &self.location
  }

  fn read(&self, name: &str) -> Result<RawValue, StoreError> {
    let value_name = to_wide(name);
    let path = || self.location.value_path(name);
    let mut buf: Vec<u16> = vec![0; 256];

    loop {
      let mut kind: REG_VALUE_TYPE = 0;
      let mut len = (buf.len() * 2) as u32;
      // SAFETY: `buf` holds `len` bytes; all out pointers are valid.
      let status = unsafe {
        RegQueryValueExW(
          self.handle,
          value_name.as_ptr(),
          ptr::null(),
          &mut kind,
          buf.as_mut_ptr().cast(),
          &mut len,
        )
      };
      if status == ERROR_MORE_DATA {
        // The value may grow between calls; retry with the reported size.
        buf.resize((len as usize).div_ceil(2) + 1, 0);
        continue;
      }
      check(status, StoreAction::Reading, path)?;

      let kind = match kind {
        REG_SZ => ValueKind::Text,
        REG_EXPAND_SZ => ValueKind::ExpandableText,
        other => return Err(StoreError::UnsupportedKind { path: path(), kind: other }),
      };
      let chars = (len as usize / 2).min(buf.len());
      return Ok(RawValue::new(kind, from_wide(&buf[..chars])));
    }
  }

  fn write(&self, name: &str, value: &RawValue) -> Result<(), StoreError> {
    let value_name = to_wide(name);
    let data = to_wide(&value.data);
    let kind = match value.kind {
      ValueKind::Text => REG_SZ,
      ValueKind::ExpandableText => REG_EXPAND_SZ,
    };
    // SAFETY: `data` is nul-terminated UTF-16 and the byte count includes the nul.
    let status = unsafe {
      RegSetValueExW(
        self.handle,
        value_name.as_ptr(),
        0,
        kind,
        data.as_ptr().cast(),
        (data.len() * 2) as u32,
      )
    };
    check(status, StoreAction::Writing, || self.location.value_path(name))
  }

  fn delete(&self, name: &str) -> Result<(), StoreError> {
    let value_name = to_wide(name);
    // SAFETY: `value_name` is nul-terminated.
    let status = unsafe { RegDeleteValueW(self.handle, value_name.as_ptr()) };
    check(status, StoreAction::Deleting, || self.location.value_path(name))
  }
}

impl Drop for RegistryKey {
  fn drop(&mut self) {
    // SAFETY: the handle was opened by this key and is closed exactly once.
    unsafe {
      RegCloseKey(self.handle);
    }
  }
}
