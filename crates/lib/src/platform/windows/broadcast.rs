use std::time::Duration;

use tracing::debug;
use windows_sys::Win32::UI::WindowsAndMessaging::{HWND_BROADCAST, SMTO_ABORTIFHUNG, SendMessageTimeoutW, WM_SETTINGCHANGE};

use super::to_wide;
use crate::platform::Notifier;

/// Tells top-level windows that the environment changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentBroadcast;

impl Notifier for EnvironmentBroadcast {
  fn broadcast(&self, timeout: Duration) {
    let area = to_wide("Environment");
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    let mut result = 0usize;

    // SAFETY: `area` is nul-terminated and outlives the call, which is
    // synchronous; `result` is a valid out pointer.
    let sent = unsafe {
      SendMessageTimeoutW(
        HWND_BROADCAST,
        WM_SETTINGCHANGE,
        0,
        area.as_ptr() as isize,
        SMTO_ABORTIFHUNG,
        millis,
        &mut result,
      )
    };
    debug!(delivered = sent != 0, timeout_ms = millis, "broadcast environment change");
  }
}
