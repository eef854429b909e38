//! Registry locations and defaults shared across the crate.

/// Machine-wide environment key under `HKEY_LOCAL_MACHINE`.
pub const MACHINE_ENVIRONMENT_PATH: &str = r"System\CurrentControlSet\Control\Session Manager\Environment";

/// Per-user environment subkey, relative to `HKEY_USERS\{sid}`.
pub const USER_ENVIRONMENT_SUBKEY: &str = "Environment";

/// Profile records keyed by SID under `HKEY_LOCAL_MACHINE`.
pub const PROFILE_LIST_PATH: &str = r"SOFTWARE\Microsoft\Windows NT\CurrentVersion\ProfileList";

/// Value under a profile record holding the profile directory.
pub const PROFILE_IMAGE_PATH_VALUE: &str = "ProfileImagePath";

/// File name of a user's detached registry hive inside the profile directory.
pub const USER_HIVE_FILE: &str = "NTUSER.DAT";

pub const DEFAULT_SEPARATOR: &str = ";";

pub const DEFAULT_BROADCAST_TIMEOUT_MS: u32 = 5000;

// Win32 error codes the store and hive backends report.
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_SHARING_VIOLATION: u32 = 32;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_PRIVILEGE_NOT_HELD: u32 = 1314;
