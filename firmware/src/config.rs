//! Device tunables with compiled-in defaults.

use shared::protocol::{DEFAULT_MTU, MAX_FRAME_LEN};

pub const DEFAULT_DEVICE_NAME: &str = "Fingerpass";

/// Hard ceiling on stored credentials, independent of configuration.
pub const MAX_USERS_LIMIT: usize = 16;
pub const DEFAULT_MAX_USERS: usize = 10;

pub const DEFAULT_UNLOCK_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_KEY_INTERVAL_MS: u32 = 10;
pub const DEFAULT_OS_UNLOCK_SETTLE_MS: u32 = 1_000;
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u32 = 5_000;
pub const DEFAULT_CLEAR_CONFIRM_TIMEOUT_MS: u32 = 8_000;
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 50;
pub const DEFAULT_ENROLL_CAPTURES: u8 = 5;

/// Smallest ATT MTU a BLE central may negotiate.
pub const MIN_MTU: usize = 23;

/// Runtime configuration shared by the vault, gate, biometric controller and transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_name: &'static str,
    pub max_users: usize,
    /// A window of zero keeps the gate unlocked until the next touch or disconnect.
    pub unlock_window_ms: u64,
    pub key_interval_ms: u32,
    pub os_unlock_settle_ms: u32,
    pub capture_timeout_ms: u32,
    pub search_timeout_ms: u32,
    pub clear_confirm_timeout_ms: u32,
    pub poll_interval_ms: u32,
    pub enroll_captures: u8,
    pub mtu: usize,
}

impl DeviceConfig {
    pub const fn new() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME,
            max_users: DEFAULT_MAX_USERS,
            unlock_window_ms: DEFAULT_UNLOCK_WINDOW_MS,
            key_interval_ms: DEFAULT_KEY_INTERVAL_MS,
            os_unlock_settle_ms: DEFAULT_OS_UNLOCK_SETTLE_MS,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
            clear_confirm_timeout_ms: DEFAULT_CLEAR_CONFIRM_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            enroll_captures: DEFAULT_ENROLL_CAPTURES,
            mtu: DEFAULT_MTU,
        }
    }

    pub const fn with_device_name(mut self, name: &'static str) -> Self {
        self.device_name = name;
        self
    }

    pub const fn with_max_users(mut self, max_users: usize) -> Self {
        self.max_users = max_users;
        self
    }

    pub const fn with_unlock_window_ms(mut self, window_ms: u64) -> Self {
        self.unlock_window_ms = window_ms;
        self
    }

    pub const fn with_key_interval_ms(mut self, interval_ms: u32) -> Self {
        self.key_interval_ms = interval_ms;
        self
    }

    pub const fn with_os_unlock_settle_ms(mut self, settle_ms: u32) -> Self {
        self.os_unlock_settle_ms = settle_ms;
        self
    }

    pub const fn with_capture_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.capture_timeout_ms = timeout_ms;
        self
    }

    pub const fn with_search_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.search_timeout_ms = timeout_ms;
        self
    }

    pub const fn with_clear_confirm_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.clear_confirm_timeout_ms = timeout_ms;
        self
    }

    pub const fn with_poll_interval_ms(mut self, interval_ms: u32) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub const fn with_enroll_captures(mut self, captures: u8) -> Self {
        self.enroll_captures = captures;
        self
    }

    pub const fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Clamp every field into the range the firmware can honor.
    pub fn validate(mut self) -> Self {
        self.max_users = self.max_users.clamp(1, MAX_USERS_LIMIT);
        self.mtu = self.mtu.clamp(MIN_MTU, MAX_FRAME_LEN);
        self.poll_interval_ms = self.poll_interval_ms.max(1);
        self.enroll_captures = self.enroll_captures.clamp(1, 6);
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}
