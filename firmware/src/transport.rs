//! Connectivity of the two HID transports, published through a `Watch`.
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::watch::{Receiver, Sender, Watch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Usb,
    Ble,
}

impl TransportKind {
    pub fn label(self) -> &'static str {
        match self {
            TransportKind::Usb => "USB",
            TransportKind::Ble => "BLE",
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Offline = 0,
    Waiting = 1,
    Connecting = 2,
    Connected = 3,
    Error = 4,
}

impl TransportState {
    pub fn is_connected(self) -> bool {
        self == TransportState::Connected
    }
}

/// Snapshot of both links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TransportIndicators {
    pub usb: TransportState,
    pub ble: TransportState,
}

impl TransportIndicators {
    pub const fn new(usb: TransportState, ble: TransportState) -> Self {
        Self { usb, ble }
    }

    pub fn is_connected(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Usb => self.usb.is_connected(),
            TransportKind::Ble => self.ble.is_connected(),
        }
    }
}

type WatchMutex = CriticalSectionRawMutex;

const TRANSPORT_RECEIVER_LIMIT: usize = 4;

static TRANSPORT_WATCH: Watch<WatchMutex, TransportIndicators, TRANSPORT_RECEIVER_LIMIT> =
    Watch::new();

pub type TransportReceiver =
    Receiver<'static, WatchMutex, TransportIndicators, TRANSPORT_RECEIVER_LIMIT>;
pub type TransportSender =
    Sender<'static, WatchMutex, TransportIndicators, TRANSPORT_RECEIVER_LIMIT>;

pub fn set_usb_state(state: TransportState) {
    modify_transport(|indicators| indicators.usb = state);
}

pub fn set_ble_state(state: TransportState) {
    modify_transport(|indicators| indicators.ble = state);
}

pub fn snapshot() -> TransportIndicators {
    TRANSPORT_WATCH.try_get().unwrap_or_default()
}

pub fn receiver() -> Option<TransportReceiver> {
    TRANSPORT_WATCH.receiver()
}

fn sender() -> TransportSender {
    TRANSPORT_WATCH.sender()
}

fn modify_transport(update: impl Fn(&mut TransportIndicators)) {
    sender().send_if_modified(|state| {
        let mut indicators = state.unwrap_or_default();
        let before = indicators;
        update(&mut indicators);
        *state = Some(indicators);
        indicators != before
    });
}

#[cfg(test)]
pub fn reset() {
    sender().send(TransportIndicators::default());
}
