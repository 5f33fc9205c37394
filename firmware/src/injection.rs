//! Typing a decrypted credential into the host as keyboard reports.

use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use embedded_storage_async::nor_flash::NorFlash;
use shared::keys::{self, KeyAction, KeyCodecError};
use shared::protocol::TransportScope;
use zeroize::Zeroizing;

use crate::crypto::CredentialCipher;
use crate::hid::ble::HidError;
use crate::hid::core::{KeyboardSink, RELEASE, press_report};
use crate::status::{self, StatusEvent};
use crate::transport::{TransportIndicators, TransportKind};
use crate::vault::{CredentialVault, VaultError};

#[derive(Debug, Clone, PartialEq)]
pub enum InjectionError {
    NoSelection,
    OutOfRange { index: usize },
    Vault(VaultError),
    Codec(KeyCodecError),
    TransportUnavailable(TransportScope),
    Hid(HidError),
}

impl From<VaultError> for InjectionError {
    fn from(error: VaultError) -> Self {
        match error {
            VaultError::OutOfRange { index, .. } => InjectionError::OutOfRange { index },
            other => InjectionError::Vault(other),
        }
    }
}

impl From<KeyCodecError> for InjectionError {
    fn from(error: KeyCodecError) -> Self {
        InjectionError::Codec(error)
    }
}

impl From<HidError> for InjectionError {
    fn from(error: HidError) -> Self {
        InjectionError::Hid(error)
    }
}

impl core::fmt::Display for InjectionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InjectionError::NoSelection => write!(f, "no user selected"),
            InjectionError::OutOfRange { index } => write!(f, "user {index} no longer exists"),
            InjectionError::Vault(err) => write!(f, "{err}"),
            InjectionError::Codec(err) => write!(f, "{err}"),
            InjectionError::TransportUnavailable(scope) => {
                write!(f, "no connected transport for {scope:?}")
            }
            InjectionError::Hid(err) => write!(f, "{err}"),
        }
    }
}

impl core::error::Error for InjectionError {}

/// Pick the link a record may be typed over.
pub fn select_transport(
    scope: TransportScope,
    indicators: &TransportIndicators,
) -> Result<TransportKind, InjectionError> {
    let usb = indicators.is_connected(TransportKind::Usb);
    let ble = indicators.is_connected(TransportKind::Ble);
    match scope {
        TransportScope::BluetoothOnly if ble => Ok(TransportKind::Ble),
        TransportScope::UsbOnly if usb => Ok(TransportKind::Usb),
        TransportScope::Either if usb => Ok(TransportKind::Usb),
        TransportScope::Either if ble => Ok(TransportKind::Ble),
        _ => Err(InjectionError::TransportUnavailable(scope)),
    }
}

/// Press and release each action, waiting `key_interval_ms` after both. Delay actions only wait.
pub async fn transmit<K, D>(
    sink: &mut K,
    delay: &mut D,
    actions: &[KeyAction],
    key_interval_ms: u32,
) -> Result<(), HidError>
where
    K: KeyboardSink + ?Sized,
    D: DelayNs,
{
    for action in actions {
        match press_report(action) {
            Some(report) => {
                sink.send_report(&report).await?;
                delay.delay_ms(key_interval_ms).await;
                sink.send_report(&RELEASE).await?;
                delay.delay_ms(key_interval_ms).await;
            }
            None => delay.delay_ms(u32::from(action.delay_ms)).await,
        }
    }
    Ok(())
}

/// Keyboard backends available to the trigger.
pub struct Keyboards<B, U> {
    pub ble: B,
    pub usb: U,
}

impl<B, U> Keyboards<B, U>
where
    B: KeyboardSink,
    U: KeyboardSink,
{
    pub fn new(ble: B, usb: U) -> Self {
        Self { ble, usb }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionTimings {
    pub key_interval_ms: u32,
    pub os_unlock_settle_ms: u32,
}

impl From<&crate::config::DeviceConfig> for InjectionTimings {
    fn from(config: &crate::config::DeviceConfig) -> Self {
        Self {
            key_interval_ms: config.key_interval_ms,
            os_unlock_settle_ms: config.os_unlock_settle_ms,
        }
    }
}

/// Resolves a selected record into keystrokes and counts the use.
pub struct InjectionTrigger<B, U, D> {
    keyboards: Keyboards<B, U>,
    delay: D,
    timings: InjectionTimings,
}

impl<B, U, D> InjectionTrigger<B, U, D>
where
    B: KeyboardSink,
    U: KeyboardSink,
    D: DelayNs,
{
    pub fn new(keyboards: Keyboards<B, U>, delay: D, timings: InjectionTimings) -> Self {
        Self {
            keyboards,
            delay,
            timings,
        }
    }

    pub fn keyboards(&mut self) -> &mut Keyboards<B, U> {
        &mut self.keyboards
    }

    pub fn delay(&mut self) -> &mut D {
        &mut self.delay
    }

    /// Type record `index` and bump its usage. Failures are reported and leave usage untouched.
    /// Returns the record's position after re-ranking.
    pub async fn run<C, F>(
        &mut self,
        vault: &mut CredentialVault<C, F>,
        index: Option<usize>,
        indicators: &TransportIndicators,
    ) -> Result<usize, InjectionError>
    where
        C: CredentialCipher,
        F: NorFlash,
    {
        match self.inject(vault, index, indicators).await {
            Ok((index, transport)) => {
                log::info!("user {index} typed over {}", transport.label());
                status::publish(StatusEvent::Injected { index, transport });
                vault.increment_usage(index).await.map_err(Into::into)
            }
            Err(err) => {
                log::warn!("injection failed: {err}");
                status::publish(StatusEvent::InjectionFailed(err.clone()));
                Err(err)
            }
        }
    }

    async fn inject<C, F>(
        &mut self,
        vault: &CredentialVault<C, F>,
        index: Option<usize>,
        indicators: &TransportIndicators,
    ) -> Result<(usize, TransportKind), InjectionError>
    where
        C: CredentialCipher,
        F: NorFlash,
    {
        let index = index.ok_or(InjectionError::NoSelection)?;
        let record = vault
            .get(index)
            .ok_or(InjectionError::OutOfRange { index })?;
        let transport = select_transport(record.transport_scope, indicators)?;
        let requires_os_unlock = record.requires_os_unlock;

        let plaintext = vault.get_plaintext(index)?;
        let actions: Zeroizing<Vec<KeyAction>> =
            Zeroizing::new(keys::actions_from_stored(&plaintext)?);
        drop(plaintext);

        let timings = self.timings;
        if requires_os_unlock {
            self.type_with(transport, &[keys::OS_UNLOCK]).await?;
            self.delay.delay_ms(timings.os_unlock_settle_ms).await;
        }
        self.type_with(transport, &actions).await?;
        Ok((index, transport))
    }

    async fn type_with(
        &mut self,
        transport: TransportKind,
        actions: &[KeyAction],
    ) -> Result<(), HidError> {
        let interval = self.timings.key_interval_ms;
        match transport {
            TransportKind::Ble => {
                transmit(&mut self.keyboards.ble, &mut self.delay, actions, interval).await
            }
            TransportKind::Usb => {
                transmit(&mut self.keyboards.usb, &mut self.delay, actions, interval).await
            }
        }
    }
}

#[cfg(test)]
#[path = "injection_tests.rs"]
mod injection_tests;
