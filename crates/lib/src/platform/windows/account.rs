//! Account lookup through the local security authority.

use std::path::PathBuf;
use std::ptr;

use tracing::debug;
use windows_sys::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, GetLastError, LocalFree};
use windows_sys::Win32::Security::Authorization::ConvertSidToStringSidW;
use windows_sys::Win32::Security::{LookupAccountNameW, SID_NAME_USE};
use windows_sys::Win32::System::Environment::ExpandEnvironmentStringsW;
use windows_sys::core::PWSTR;

use super::{from_wide, to_wide};
use crate::consts::PROFILE_IMAGE_PATH_VALUE;
use crate::platform::{Identities, IdentityError, NativeError, Sid};
use crate::resource::ValueKind;
use crate::store::registry::RegistryStore;
use crate::store::{Access, KeyLocation, Store, StoreAction, StoreError, StoreKey};

/// Resolves accounts with `LookupAccountNameW` and reads profile paths from
/// the `ProfileList` key.
#[derive(Debug, Default)]
pub struct AccountIdentities {
  registry: RegistryStore,
}

impl AccountIdentities {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Identities for AccountIdentities {
  fn resolve(&self, user: &str) -> Result<Sid, IdentityError> {
    let unresolved = |source| IdentityError::Unresolved {
      user: user.to_string(),
      source,
    };
    let sid = lookup_account(user).map_err(unresolved)?;
    debug!(user, sid = %sid, "looked up account");
    Ok(sid)
  }

  fn profile_path(&self, sid: &Sid) -> Result<PathBuf, IdentityError> {
    let lookup_error = |source| IdentityError::ProfileLookup {
      sid: sid.clone(),
      source,
    };

    let value = match self.registry.open(&KeyLocation::profile(sid), Access::Read) {
      Ok(key) => key.read(PROFILE_IMAGE_PATH_VALUE),
      Err(err) => Err(err),
    };
    let value = match value {
      Ok(value) => value,
      Err(err) if err.is_not_found() => return Err(IdentityError::NoProfile { sid: sid.clone() }),
      Err(err) => return Err(lookup_error(err)),
    };

    let path = match value.kind {
      ValueKind::Text => value.data,
      ValueKind::ExpandableText => expand(&value.data).map_err(|source| {
        lookup_error(StoreError::native(
          StoreAction::Reading,
          KeyLocation::profile(sid).value_path(PROFILE_IMAGE_PATH_VALUE),
          source,
        ))
      })?,
    };
    Ok(PathBuf::from(path))
  }
}

fn lookup_account(user: &str) -> Result<Sid, NativeError> {
  let name = to_wide(user);
  let mut sid_len = 0u32;
  let mut domain_len = 0u32;
  let mut use_kind: SID_NAME_USE = 0;

  // First call only sizes the buffers.
  // SAFETY: null buffers with zero lengths are the documented sizing call.
  let sized = unsafe {
    LookupAccountNameW(
      ptr::null(),
      name.as_ptr(),
      ptr::null_mut(),
      &mut sid_len,
      ptr::null_mut(),
      &mut domain_len,
      &mut use_kind,
    )
  };
  if sized == 0 {
    // SAFETY: reads the calling thread's last-error value.
    let code = unsafe { GetLastError() };
    if code != ERROR_INSUFFICIENT_BUFFER {
      return Err(NativeError::from_code(code));
    }
  }

  let mut sid = vec![0u8; sid_len as usize];
  let mut domain = vec![0u16; domain_len as usize];
  // SAFETY: buffers are sized as the first call requested.
  let found = unsafe {
    LookupAccountNameW(
      ptr::null(),
      name.as_ptr(),
      sid.as_mut_ptr().cast(),
      &mut sid_len,
      domain.as_mut_ptr(),
      &mut domain_len,
      &mut use_kind,
    )
  };
  if found == 0 {
    return Err(NativeError::last());
  }

  let mut text: PWSTR = ptr::null_mut();
  // SAFETY: `sid` holds a valid SID; on success `text` is a LocalAlloc'd string.
  if unsafe { ConvertSidToStringSidW(sid.as_mut_ptr().cast(), &mut text) } == 0 {
    return Err(NativeError::last());
  }
  // SAFETY: `text` is nul-terminated; it is freed right after copying.
  let string = unsafe {
    let len = (0..).take_while(|&i| *text.add(i) != 0).count();
    let string = String::from_utf16_lossy(std::slice::from_raw_parts(text, len));
    LocalFree(text.cast());
    string
  };
  Ok(Sid(string))
}

/// Expand `%VAR%` references with the current process environment.
fn expand(value: &str) -> Result<String, NativeError> {
  let source = to_wide(value);
  // SAFETY: a null destination with size zero returns the required length.
  let needed = unsafe { ExpandEnvironmentStringsW(source.as_ptr(), ptr::null_mut(), 0) };
  if needed == 0 {
    return Err(NativeError::last());
  }
  let mut buf = vec![0u16; needed as usize];
  // SAFETY: `buf` holds `needed` characters.
  let written = unsafe { ExpandEnvironmentStringsW(source.as_ptr(), buf.as_mut_ptr(), needed) };
  if written == 0 || written > needed {
    return Err(NativeError::last());
  }
  Ok(from_wide(&buf))
}
