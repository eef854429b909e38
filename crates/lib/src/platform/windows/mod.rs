//! Windows implementations of the platform capabilities.
//!
//! - [`account`]: account name to SID resolution and profile lookup
//! - [`privilege`]: scoped enabling of the backup and restore privileges
//! - [`broadcast`]: the `WM_SETTINGCHANGE` environment broadcast
//!
//! The registry itself is [`crate::store::registry::RegistryStore`].

pub mod account;
pub mod broadcast;
pub mod privilege;

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use crate::platform::Host;
use crate::store::registry::RegistryStore;

pub use account::AccountIdentities;
pub use broadcast::EnvironmentBroadcast;
pub use privilege::RestorePrivilege;

/// The capabilities of the local machine.
pub fn host() -> Host<RegistryStore, AccountIdentities, EnvironmentBroadcast> {
  Host::new(RegistryStore::new(), AccountIdentities::new(), EnvironmentBroadcast)
}

/// Nul-terminated UTF-16 copy of `s`.
pub(crate) fn to_wide(s: impl AsRef<OsStr>) -> Vec<u16> {
  s.as_ref().encode_wide().chain(Some(0)).collect()
}

/// Decode UTF-16 up to the first nul.
pub(crate) fn from_wide(buf: &[u16]) -> String {
  let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
  String::from_utf16_lossy(&buf[..end])
}
