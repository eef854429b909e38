//! Scoped token privileges.
//!
//! Loading and unloading a hive needs `SeRestorePrivilege` and
//! `SeBackupPrivilege` enabled on the process token. [`RestorePrivilege`]
//! enables both and puts back the previous state when dropped.

use std::ptr;

use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{CloseHandle, ERROR_NOT_ALL_ASSIGNED, GetLastError, HANDLE, LUID};
use windows_sys::Win32::Security::{
  AdjustTokenPrivileges, LUID_AND_ATTRIBUTES, LookupPrivilegeValueW, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES,
  TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use super::to_wide;
use crate::platform::NativeError;

const PRIVILEGES: [&str; 2] = ["SeRestorePrivilege", "SeBackupPrivilege"];

/// Enabled restore and backup privileges; restored on drop.
pub struct RestorePrivilege {
  token: HANDLE,
  previous: Vec<TOKEN_PRIVILEGES>,
}

impl RestorePrivilege {
  pub fn acquire() -> Result<Self, NativeError> {
    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: GetCurrentProcess returns a pseudo handle that needs no closing;
    // `token` receives a new handle owned by the guard below.
    let opened = unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY, &mut token) };
    if opened == 0 {
      return Err(NativeError::last());
    }

    let mut guard = Self {
      token,
      previous: Vec::with_capacity(PRIVILEGES.len()),
    };
    for name in PRIVILEGES {
      let previous = enable(token, name)?;
      guard.previous.push(previous);
    }
    debug!("enabled restore and backup privileges");
    Ok(guard)
  }
}

impl Drop for RestorePrivilege {
  fn drop(&mut self) {
    for previous in self.previous.iter().rev() {
      // SAFETY: `previous` was filled by AdjustTokenPrivileges for this token.
      let ok = unsafe { AdjustTokenPrivileges(self.token, 0, previous, 0, ptr::null_mut(), ptr::null_mut()) };
      if ok == 0 {
        warn!(error = %NativeError::last(), "failed to restore token privileges");
      }
    }
    // SAFETY: the token handle is owned by this guard.
    unsafe {
      CloseHandle(self.token);
    }
  }
}

/// Enable `name` on `token`, returning the previous state.
fn enable(token: HANDLE, name: &str) -> Result<TOKEN_PRIVILEGES, NativeError> {
  let wide = to_wide(name);
  let mut luid = LUID { LowPart: 0, HighPart: 0 };
  // SAFETY: `wide` is nul-terminated and outlives the call.
  if unsafe { LookupPrivilegeValueW(ptr::null(), wide.as_ptr(), &mut luid) } == 0 {
    return Err(NativeError::last());
  }

  let requested = TOKEN_PRIVILEGES {
    PrivilegeCount: 1,
    Privileges: [LUID_AND_ATTRIBUTES {
      Luid: luid,
      Attributes: SE_PRIVILEGE_ENABLED,
    }],
  };
  let mut previous = TOKEN_PRIVILEGES {
    PrivilegeCount: 0,
    Privileges: [LUID_AND_ATTRIBUTES {
      Luid: LUID { LowPart: 0, HighPart: 0 },
      Attributes: 0,
    }],
  };
  let mut returned = 0u32;

  // SAFETY: both structs are valid TOKEN_PRIVILEGES with room for one entry.
  let ok = unsafe {
    AdjustTokenPrivileges(
      token,
      0,
      &requested,
      std::mem::size_of::<TOKEN_PRIVILEGES>() as u32,
      &mut previous,
      &mut returned,
    )
  };
  if ok == 0 {
    return Err(NativeError::last());
  }
  // Success is also reported when the token does not hold the privilege at all.
  // SAFETY: reads the calling thread's last-error value.
  let last = unsafe { GetLastError() };
  if last == ERROR_NOT_ALL_ASSIGNED {
    return Err(NativeError::from_code(last));
  }
  Ok(previous)
}
