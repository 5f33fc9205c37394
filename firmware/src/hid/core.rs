//! Shared HID primitives used by both BLE and USB transports.

use shared::keys::KeyAction;

use crate::transport::TransportKind;

pub use self::actions::{HID_REPORT_SIZE, KEYBOARD_ROLLOVER, KeyboardReport};
use super::ble::HidError;

/// Destination for keyboard reports produced by an injection.
#[allow(async_fn_in_trait)]
pub trait KeyboardSink {
    fn kind(&self) -> TransportKind;

    async fn send_report(&mut self, report: &KeyboardReport) -> Result<(), HidError>;
}

pub mod actions {
    use crate::transport::{self, TransportState};
    #[cfg(test)]
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU32, Ordering};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::{Channel, Receiver, Sender};
    use embassy_time::{Duration, with_timeout};
    use shared::keys::KeyAction;

    use super::KeyboardSink;
    use crate::hid::ble::HidError;
    use crate::transport::TransportKind;

    type QueueMutex = CriticalSectionRawMutex;

    pub const ACTION_QUEUE_DEPTH: usize = 8;
    /// Longest a report may wait for room in the queue before the injection gives up.
    pub const REPORT_TIMEOUT_MS: u64 = 250;
    pub const KEYBOARD_ROLLOVER: usize = 6;
    pub const HID_REPORT_SIZE: usize = KEYBOARD_ROLLOVER + 2;

    /// Session id of the connected BLE peer, `0` while idle.
    static ACTIVE_SESSION: AtomicU32 = AtomicU32::new(0);

    static ACTION_CHANNEL: Channel<QueueMutex, DeviceAction, ACTION_QUEUE_DEPTH> = Channel::new();

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DeviceAction {
        StartSession {
            session_id: u32,
        },
        EndSession,
        SendReport {
            session_id: u32,
            report: KeyboardReport,
        },
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct KeyboardReport {
        pub modifiers: u8,
        pub keys: [u8; KEYBOARD_ROLLOVER],
    }

    impl KeyboardReport {
        pub const fn empty() -> Self {
            Self {
                modifiers: 0,
                keys: [0; KEYBOARD_ROLLOVER],
            }
        }

        pub fn to_bytes(&self) -> [u8; HID_REPORT_SIZE] {
            let mut data = [0u8; HID_REPORT_SIZE];
            data[0] = self.modifiers;
            data[2..].copy_from_slice(&self.keys);
            data
        }

        pub fn from_keys(modifiers: u8, pressed: &[u8]) -> Self {
            let mut report = Self::empty();
            report.modifiers = modifiers;
            for (idx, key) in pressed.iter().copied().enumerate() {
                if idx >= KEYBOARD_ROLLOVER {
                    break;
                }
                report.keys[idx] = key;
            }
            report
        }

        /// Press report for a single action; only `keys[0]` is used.
        pub fn press(action: &KeyAction) -> Self {
            Self::from_keys(action.modifiers, &[action.keycode])
        }

        pub fn is_empty(&self) -> bool {
            self.modifiers == 0 && self.keys.iter().all(|&key| key == 0)
        }
    }

    pub type ActionSender = Sender<'static, QueueMutex, DeviceAction, ACTION_QUEUE_DEPTH>;
    pub type ActionReceiver = Receiver<'static, QueueMutex, DeviceAction, ACTION_QUEUE_DEPTH>;

    pub fn action_sender() -> ActionSender {
        ACTION_CHANNEL.sender()
    }

    pub fn action_receiver() -> ActionReceiver {
        ACTION_CHANNEL.receiver()
    }

    pub fn active_session() -> Option<u32> {
        match ACTIVE_SESSION.load(Ordering::Acquire) {
            0 => None,
            session => Some(session),
        }
    }

    fn track_session(action: &DeviceAction) {
        match action {
            DeviceAction::StartSession { session_id } => {
                ACTIVE_SESSION.store(*session_id, Ordering::Release);
                transport::set_ble_state(TransportState::Connecting);
            }
            DeviceAction::EndSession => {
                ACTIVE_SESSION.store(0, Ordering::Release);
                transport::set_ble_state(TransportState::Waiting);
            }
            DeviceAction::SendReport { .. } => {}
        }
    }

    /// Queue an action without waiting; dropped when the BLE task is behind.
    pub fn publish(action: DeviceAction) {
        track_session(&action);
        if action_sender().try_send(action).is_err() {
            log::warn!("HID action queue full, action dropped");
        }
    }

    /// Queue an action, waiting for room. Used for report streams that must not lose events.
    pub async fn send(action: DeviceAction) {
        track_session(&action);
        action_sender().send(action).await;
    }

    /// Keyboard sink that forwards reports to the BLE task through the action queue.
    #[derive(Debug, Default)]
    pub struct BleKeyboard;

    impl KeyboardSink for BleKeyboard {
        fn kind(&self) -> TransportKind {
            TransportKind::Ble
        }

        async fn send_report(&mut self, report: &KeyboardReport) -> Result<(), HidError> {
            let session_id = active_session().ok_or(HidError::NoActiveSession)?;
            let action = DeviceAction::SendReport {
                session_id,
                report: report.clone(),
            };
            // The caller usually holds the device lock, so a stalled BLE task must not park it.
            with_timeout(Duration::from_millis(REPORT_TIMEOUT_MS), send(action))
                .await
                .map_err(|_| HidError::ReportTimeout)
        }
    }

    #[cfg(test)]
    pub fn clear() {
        ACTION_CHANNEL.clear();
        ACTIVE_SESSION.store(0, Ordering::Release);
    }

    #[cfg(test)]
    pub fn drain() -> Vec<DeviceAction> {
        let receiver = action_receiver();
        let mut collected = Vec::new();
        while let Ok(action) = receiver.try_receive() {
            collected.push(action);
        }
        collected
    }
}

/// Release report sent after every press.
pub const RELEASE: KeyboardReport = KeyboardReport::empty();

/// Press report for `action`, `None` for a pure delay.
pub fn press_report(action: &KeyAction) -> Option<KeyboardReport> {
    (!action.is_delay()).then(|| KeyboardReport::press(action))
}
