//! State shared between the BLE, USB and biometric tasks.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use embedded_storage_async::nor_flash::NorFlash;
use shared::protocol::ResponseFrame;

use crate::auth::{AuthGate, Selection};
use crate::config::DeviceConfig;
use crate::crypto::CredentialCipher;
use crate::hid::core::KeyboardSink;
use crate::injection::{InjectionError, InjectionTrigger};
use crate::protocol::notifications;
use crate::status::{self, StatusEvent};
use crate::transport::TransportIndicators;
use crate::vault::CredentialVault;

/// Vault, gate and pending selection. Every mutation happens with the surrounding mutex held.
pub struct DeviceCore<C, F> {
    pub vault: CredentialVault<C, F>,
    pub gate: AuthGate,
    pub selection: Selection,
    pub config: DeviceConfig,
}

pub type SharedDevice<C, F> = Mutex<CriticalSectionRawMutex, DeviceCore<C, F>>;

impl<C, F> DeviceCore<C, F>
where
    C: CredentialCipher,
    F: NorFlash,
{
    pub fn new(vault: CredentialVault<C, F>, config: DeviceConfig) -> Self {
        Self {
            vault,
            gate: AuthGate::new(config.unlock_window_ms),
            selection: Selection::new(),
            config,
        }
    }

    /// A finger touched the sensor: drop any previous unlock.
    pub fn begin_touch(&mut self) {
        self.gate.begin_touch();
    }

    /// Feed a sensor match into the gate. Returns the user to inject, if any.
    pub fn on_match(&mut self, slot: u8, now_ms: u64) -> Option<usize> {
        let pending = self.selection.take();
        let auto_bound = self.vault.find_auto_bound(slot);
        let selected = self
            .gate
            .on_match(slot, now_ms, pending, auto_bound, self.vault.len());
        log::info!("fingerprint slot {slot} matched, selected {selected:?}");
        notifications::publish(ResponseFrame::auth_status(true));
        status::publish(StatusEvent::Unlocked { slot, selected });
        selected
    }

    /// The BLE peer went away.
    pub fn on_disconnect(&mut self) {
        self.lock();
    }

    pub fn lock(&mut self) {
        self.gate.lock();
        status::publish(StatusEvent::Locked);
    }

    /// Lock once the unlock window has passed.
    pub fn expire(&mut self, now_ms: u64) {
        if self.gate.expire(now_ms) {
            log::info!("unlock window elapsed");
            status::publish(StatusEvent::Locked);
        }
    }

    pub fn select_next(&mut self) -> Option<usize> {
        self.selection.next(self.vault.len())
    }

    pub fn select_prev(&mut self) -> Option<usize> {
        self.selection.prev(self.vault.len())
    }

    /// Match handling plus injection of the resolved user, all under one lock.
    pub async fn authenticate_and_inject<B, U, D>(
        &mut self,
        slot: u8,
        now_ms: u64,
        trigger: &mut InjectionTrigger<B, U, D>,
        indicators: &TransportIndicators,
    ) -> Option<Result<usize, InjectionError>>
    where
        B: KeyboardSink,
        U: KeyboardSink,
        D: DelayNs,
    {
        let selected = self.on_match(slot, now_ms)?;
        let result = trigger
            .run(&mut self.vault, Some(selected), indicators)
            .await;
        self.gate.consume_selection();
        Some(result)
    }
}
