use alloc::string::String;

use std::sync::{Mutex, MutexGuard};

use embedded_hal_async::delay::DelayNs;
use futures::executor::block_on;
use sequential_storage::mock_flash::{MockFlashBase, WriteCountCheck};
use shared::protocol::{TransportScope, UserEntry};
use zeroize::Zeroizing;

use crate::crypto::{CbcZeroIvCipher, SoftwareKeySource};
use crate::hid::ble::HidError;
use crate::hid::core::{KeyboardReport, KeyboardSink};
use crate::storage::VaultStorage;
use crate::transport::TransportKind;
use crate::vault::CredentialVault;

pub(crate) type Flash = MockFlashBase<16, 4, 1024>;
pub(crate) type TestVault = CredentialVault<CbcZeroIvCipher, Flash>;

static CHANNEL_LOCK: Mutex<()> = Mutex::new(());

/// Serialize tests that share the global channels.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    CHANNEL_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delay that returns immediately and accumulates the requested time.
#[derive(Debug, Default)]
pub(crate) struct RecordingDelay {
    pub total_ms: u64,
    pub calls: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ms += u64::from(ns / 1_000_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
        self.calls.push(ms);
    }
}

/// Keyboard that records every report, optionally failing after `fail_after` reports.
#[derive(Debug)]
pub(crate) struct RecordingSink {
    pub kind: TransportKind,
    pub reports: Vec<KeyboardReport>,
    pub fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            reports: Vec::new(),
            fail_after: None,
        }
    }

    /// `(modifiers, keycode)` of every press, skipping releases.
    pub fn presses(&self) -> Vec<(u8, u8)> {
        self.reports
            .iter()
            .filter(|report| !report.is_empty())
            .map(|report| (report.modifiers, report.keys[0]))
            .collect()
    }
}

impl KeyboardSink for RecordingSink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send_report(&mut self, report: &KeyboardReport) -> Result<(), HidError> {
        if self.fail_after == Some(self.reports.len()) {
            return Err(HidError::NoActiveSession);
        }
        self.reports.push(report.clone());
        Ok(())
    }
}

pub(crate) const TEST_SECRET: &[u8] = b"fingerpass-test-secret";

pub(crate) fn fresh_flash() -> Flash {
    Flash::new(WriteCountCheck::Twice, None, false)
}

pub(crate) fn test_cipher() -> CbcZeroIvCipher {
    CbcZeroIvCipher::from_source(&mut SoftwareKeySource::new(TEST_SECRET)).unwrap()
}

pub(crate) fn test_storage(flash: Flash) -> VaultStorage<Flash> {
    VaultStorage::new(flash, Flash::FULL_FLASH_RANGE)
}

pub(crate) fn empty_vault(capacity: usize) -> TestVault {
    block_on(CredentialVault::open(
        test_cipher(),
        test_storage(fresh_flash()),
        capacity,
    ))
}

/// Reopen the vault on the same flash, as after a reboot.
pub(crate) fn reopen(vault: TestVault) -> TestVault {
    let capacity = vault.capacity();
    let storage = vault.into_storage();
    block_on(CredentialVault::open(test_cipher(), storage, capacity))
}

pub(crate) fn entry(label: &str, password: &[u8]) -> UserEntry {
    UserEntry {
        label: String::from(label),
        password: Zeroizing::new(password.to_vec()),
        requires_os_unlock: false,
        auto_bind: false,
        fingerprint_id: None,
        transport_scope: TransportScope::Either,
    }
}

pub(crate) fn vault_with(labels: &[&str]) -> TestVault {
    let mut vault = empty_vault(crate::config::DEFAULT_MAX_USERS);
    for label in labels {
        block_on(vault.add(&entry(label, label.as_bytes()))).unwrap();
    }
    vault
}
