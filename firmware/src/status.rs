//! Device status events consumed by the status task (log + companion messages).

use alloc::format;
#[cfg(test)]
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use shared::protocol::{MessageLevel, ResponseFrame};

use crate::biometric::SensorError;
use crate::injection::InjectionError;
use crate::transport::TransportKind;

type QueueMutex = CriticalSectionRawMutex;

const STATUS_QUEUE_DEPTH: usize = 8;

static STATUS_CHANNEL: Channel<QueueMutex, StatusEvent, STATUS_QUEUE_DEPTH> = Channel::new();

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Unlocked { slot: u8, selected: Option<usize> },
    Locked,
    Injected { index: usize, transport: TransportKind },
    InjectionFailed(InjectionError),
    EnrollStep { step: u8, total: u8 },
    Enrolled { slot: u16 },
    EnrollFailed(SensorError),
    LibraryCleared,
    ClearFailed(SensorError),
    SaveFailed,
}

impl StatusEvent {
    /// Message forwarded to the companion, if the event is worth one.
    pub fn as_message(&self) -> Option<ResponseFrame> {
        let (level, text) = match self {
            StatusEvent::Unlocked { .. } | StatusEvent::Locked => return None,
            StatusEvent::Injected { index, transport } => {
                (MessageLevel::Info, format!("User {index} typed over {transport:?}"))
            }
            StatusEvent::InjectionFailed(err) => {
                (MessageLevel::Error, format!("Injection failed: {err}"))
            }
            StatusEvent::EnrollStep { step, total } => (
                MessageLevel::Info,
                format!("Capture {step}/{total} ok, lift finger"),
            ),
            StatusEvent::Enrolled { slot } => {
                (MessageLevel::Info, format!("Fingerprint stored in slot {slot}"))
            }
            StatusEvent::EnrollFailed(err) => {
                (MessageLevel::Error, format!("Enrollment failed: {err}"))
            }
            StatusEvent::LibraryCleared => {
                (MessageLevel::Info, "Fingerprint library cleared".into())
            }
            StatusEvent::ClearFailed(err) => (
                MessageLevel::Error,
                format!("Fingerprint library not cleared: {err}"),
            ),
            StatusEvent::SaveFailed => (MessageLevel::Warning, "Flash write failed".into()),
        };
        Some(ResponseFrame::message(level, &text))
    }
}

pub type StatusSender = Sender<'static, QueueMutex, StatusEvent, STATUS_QUEUE_DEPTH>;
pub type StatusReceiver = Receiver<'static, QueueMutex, StatusEvent, STATUS_QUEUE_DEPTH>;

pub fn status_sender() -> StatusSender {
    STATUS_CHANNEL.sender()
}

pub fn status_receiver() -> StatusReceiver {
    STATUS_CHANNEL.receiver()
}

/// Queue an event, dropping it when the status task is behind.
pub fn publish(event: StatusEvent) {
    if status_sender().try_send(event).is_err() {
        log::warn!("status queue full, event dropped");
    }
}

#[cfg(test)]
pub fn clear() {
    STATUS_CHANNEL.clear();
}

#[cfg(test)]
pub fn drain() -> Vec<StatusEvent> {
    let receiver = status_receiver();
    let mut collected = Vec::new();
    while let Ok(event) = receiver.try_receive() {
        collected.push(event);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::ResponseTag;

    #[test]
    fn gate_transitions_stay_local() {
        assert!(
            StatusEvent::Unlocked {
                slot: 1,
                selected: None
            }
            .as_message()
            .is_none()
        );
        assert!(StatusEvent::Locked.as_message().is_none());
    }

    #[test]
    fn failures_map_to_error_messages() {
        let frame = StatusEvent::EnrollFailed(SensorError::Timeout)
            .as_message()
            .unwrap();
        assert_eq!(frame.tag, ResponseTag::Message);
        assert_eq!(frame.payload[0], MessageLevel::Error as u8);
    }
}
