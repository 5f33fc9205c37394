//! Command handling for the companion channel (BLE characteristic or USB link).
//!
//! Every frame passes the gate first. A locked gate answers with an auth-status push and leaves
//! the vault untouched; malformed frames answer with an error message.

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage_async::nor_flash::NorFlash;
use shared::protocol::{Command, FrameError, MessageLevel, ResponseFrame};
use zeroize::{Zeroize, Zeroizing};

use crate::auth::AuthError;
use crate::biometric::requests::{self, BiometricRequest};
use crate::crypto::CredentialCipher;
use crate::device::{DeviceCore, SharedDevice};
use crate::vault::VaultError;

pub const USER_ADDED: &str = "User added";
pub const USER_UPDATED: &str = "User updated";
pub const USER_REMOVED: &str = "User removed";
pub const ENROLL_STARTED: &str = "Place finger on sensor";
pub const CLEAR_STARTED: &str = "Touch sensor to confirm";
pub const DEVICE_BUSY: &str = "Device busy, retry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Frame(FrameError),
    Auth(AuthError),
    Vault(VaultError),
    /// The biometric task already has a job queued.
    Busy,
}

impl From<FrameError> for ProtocolError {
    fn from(error: FrameError) -> Self {
        ProtocolError::Frame(error)
    }
}

impl From<AuthError> for ProtocolError {
    fn from(error: AuthError) -> Self {
        ProtocolError::Auth(error)
    }
}

impl From<VaultError> for ProtocolError {
    fn from(error: VaultError) -> Self {
        ProtocolError::Vault(error)
    }
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::Frame(err) => write!(f, "Bad frame: {err}"),
            ProtocolError::Auth(err) => write!(f, "{err}"),
            ProtocolError::Vault(err) => write!(f, "{err}"),
            ProtocolError::Busy => write!(f, "Sensor busy"),
        }
    }
}

impl core::error::Error for ProtocolError {}

impl ProtocolError {
    /// Response sent back for this error.
    pub fn as_response(&self) -> ResponseFrame {
        match self {
            ProtocolError::Auth(_) => ResponseFrame::auth_status(false),
            other => ResponseFrame::message(MessageLevel::Error, &alloc::format!("{other}")),
        }
    }
}

/// Run one inbound frame against the device. Always yields at least one response.
pub async fn handle_frame<C, F>(
    core: &mut DeviceCore<C, F>,
    frame: &mut [u8],
    now_ms: u64,
) -> Vec<ResponseFrame>
where
    C: CredentialCipher,
    F: NorFlash,
{
    let result = dispatch(core, frame, now_ms).await;
    frame.zeroize();
    match result {
        Ok(responses) => responses,
        Err(err) => {
            log::warn!("command rejected: {err}");
            vec![err.as_response()]
        }
    }
}

async fn dispatch<C, F>(
    core: &mut DeviceCore<C, F>,
    frame: &[u8],
    now_ms: u64,
) -> Result<Vec<ResponseFrame>, ProtocolError>
where
    C: CredentialCipher,
    F: NorFlash,
{
    core.gate.ensure_unlocked(now_ms)?;
    let command = Command::parse(frame)?;
    log::debug!("command {:?}", command.opcode());

    let responses = match command {
        Command::ResetAll | Command::ClearDb => {
            core.vault.clear_all().await;
            core.selection.clear();
            vec![ResponseFrame::db_cleared()]
        }
        Command::AddUser(entry) => {
            let index = core.vault.add(&entry).await?;
            let pushed = core.vault.entry(index)?;
            vec![
                info(USER_ADDED),
                ResponseFrame::user_entry(wire_index(index), &pushed)?,
            ]
        }
        Command::EditUser { index, entry } => {
            core.vault.edit(usize::from(index), &entry).await?;
            vec![info(USER_UPDATED)]
        }
        Command::RemoveUser { index } => {
            core.vault.remove(usize::from(index)).await?;
            core.selection.clear();
            vec![info(USER_REMOVED)]
        }
        Command::GetUserEntry { index } => {
            if usize::from(index) >= core.vault.len() {
                vec![ResponseFrame::end_of_list(index)]
            } else {
                let entry = core.vault.entry(usize::from(index))?;
                vec![ResponseFrame::user_entry(index, &entry)?]
            }
        }
        Command::EnrollFingerprint => {
            queue(BiometricRequest::Enroll)?;
            vec![info(ENROLL_STARTED)]
        }
        Command::ClearFingerprintLibrary => {
            queue(BiometricRequest::ClearLibrary)?;
            vec![info(CLEAR_STARTED)]
        }
    };
    Ok(responses)
}

/// Handle a frame taken from the inbound queue.
///
/// The device lock is released before the responses are queued for the BLE task, so a full
/// notification queue never blocks the biometric task.
pub async fn serve_inbound<C, F>(
    device: &SharedDevice<C, F>,
    mut frame: Zeroizing<Vec<u8>>,
    now_ms: u64,
) where
    C: CredentialCipher,
    F: NorFlash,
{
    let responses = {
        let mut core = device.lock().await;
        handle_frame(&mut core, &mut frame, now_ms).await
    };
    for response in responses {
        notifications::send(response).await;
    }
}

fn queue(request: BiometricRequest) -> Result<(), ProtocolError> {
    requests::publish(request).map_err(|_| ProtocolError::Busy)
}

fn info(text: &str) -> ResponseFrame {
    ResponseFrame::message(MessageLevel::Info, text)
}

fn wire_index(index: usize) -> u8 {
    u8::try_from(index).unwrap_or(u8::MAX)
}

/// Frames pushed to the BLE client outside of a request/response exchange.
pub mod notifications {
    #[cfg(test)]
    use alloc::vec::Vec;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::{Channel, Receiver, Sender};
    use shared::protocol::ResponseFrame;

    const NOTIFICATION_QUEUE_DEPTH: usize = 8;

    static NOTIFICATION_CHANNEL: Channel<
        CriticalSectionRawMutex,
        ResponseFrame,
        NOTIFICATION_QUEUE_DEPTH,
    > = Channel::new();

    pub type NotificationSender =
        Sender<'static, CriticalSectionRawMutex, ResponseFrame, NOTIFICATION_QUEUE_DEPTH>;
    pub type NotificationReceiver =
        Receiver<'static, CriticalSectionRawMutex, ResponseFrame, NOTIFICATION_QUEUE_DEPTH>;

    pub fn notification_sender() -> NotificationSender {
        NOTIFICATION_CHANNEL.sender()
    }

    pub fn notification_receiver() -> NotificationReceiver {
        NOTIFICATION_CHANNEL.receiver()
    }

    pub fn publish(frame: ResponseFrame) {
        if notification_sender().try_send(frame).is_err() {
            log::warn!("notification queue full, frame dropped");
        }
    }

    /// Queue a frame, waiting for room.
    pub async fn send(frame: ResponseFrame) {
        notification_sender().send(frame).await;
    }

    #[cfg(test)]
    pub fn clear() {
        NOTIFICATION_CHANNEL.clear();
    }

    #[cfg(test)]
    pub fn drain() -> Vec<ResponseFrame> {
        let receiver = notification_receiver();
        let mut collected = Vec::new();
        while let Ok(frame) = receiver.try_receive() {
            collected.push(frame);
        }
        collected
    }
}

/// Request frames written by the BLE client, waiting for the frame task.
pub mod inbound {
    use alloc::vec::Vec;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::{Channel, Receiver};
    use zeroize::Zeroizing;

    pub const INBOUND_QUEUE_DEPTH: usize = 4;

    pub type InboundFrame = Zeroizing<Vec<u8>>;

    static INBOUND_CHANNEL: Channel<CriticalSectionRawMutex, InboundFrame, INBOUND_QUEUE_DEPTH> =
        Channel::new();

    pub type InboundReceiver =
        Receiver<'static, CriticalSectionRawMutex, InboundFrame, INBOUND_QUEUE_DEPTH>;

    pub fn inbound_receiver() -> InboundReceiver {
        INBOUND_CHANNEL.receiver()
    }

    /// Queue a frame without waiting. Hands the frame back when the queue is full.
    pub fn publish(frame: InboundFrame) -> Result<(), InboundFrame> {
        INBOUND_CHANNEL.try_send(frame).map_err(|error| match error {
            embassy_sync::channel::TrySendError::Full(frame) => frame,
        })
    }

    #[cfg(test)]
    pub fn clear() {
        INBOUND_CHANNEL.clear();
    }

    #[cfg(test)]
    pub fn drain() -> Vec<InboundFrame> {
        let receiver = inbound_receiver();
        let mut collected = Vec::new();
        while let Ok(frame) = receiver.try_receive() {
            collected.push(frame);
        }
        collected
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod protocol_tests;
