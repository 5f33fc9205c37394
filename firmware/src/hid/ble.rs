use core::cell::Cell;

use super::actions::{DeviceAction, HID_REPORT_SIZE};

/// ATT header bytes taken out of every notification.
const ATT_NOTIFY_OVERHEAD: usize = 3;

/// State transition produced by applying a `DeviceAction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidResponse {
    /// BLE link moved into an active session.
    Connected { session_id: u32 },
    /// Session closed after a disconnect.
    Closed { session_id: u32 },
    /// A keyboard report is ready to be notified to the peer.
    Report([u8; HID_REPORT_SIZE]),
}

/// Errors returned while delivering keyboard reports.
#[derive(Debug, Clone, PartialEq)]
pub enum HidError {
    /// A command that requires an active session was triggered while idle.
    NoActiveSession,
    /// The provided session identifier does not match the active connection.
    SessionMismatch { active_session: u32, provided: u32 },
    /// The BLE task did not take the report in time.
    ReportTimeout,
    /// The USB HID endpoint refused the report.
    Usb,
    /// The Trouble HID profile rejected the request.
    Profile(profile::ProfileError),
}

impl From<profile::ProfileError> for HidError {
    fn from(value: profile::ProfileError) -> Self {
        HidError::Profile(value)
    }
}

impl core::fmt::Display for HidError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HidError::NoActiveSession => write!(f, "no active HID session"),
            HidError::SessionMismatch {
                active_session,
                provided,
            } => write!(f, "session {provided} does not match {active_session}"),
            HidError::ReportTimeout => write!(f, "BLE report not accepted in time"),
            HidError::Usb => write!(f, "USB HID write failed"),
            HidError::Profile(err) => write!(f, "BLE profile error: {err:?}"),
        }
    }
}

impl core::error::Error for HidError {}

/// Largest response frame that fits one notification on a link with `att_mtu`.
pub fn frame_limit(att_mtu: u16, configured: usize) -> usize {
    usize::from(att_mtu)
        .saturating_sub(ATT_NOTIFY_OVERHEAD)
        .min(configured)
}

/// BLE HID keyboard built on top of `trouble-host`.
#[derive(Debug)]
pub struct BleHid {
    session: Cell<Option<u32>>,
    profile: profile::TroubleProfile,
}

impl BleHid {
    pub fn new(profile: profile::TroubleProfile) -> Self {
        Self {
            session: Cell::new(None),
            profile,
        }
    }

    pub fn profile(&self) -> &profile::TroubleProfile {
        &self.profile
    }

    pub fn active_session(&self) -> Option<u32> {
        self.session.get()
    }

    /// Apply one action pulled from the queue.
    ///
    /// A new session always replaces the previous one: the peer may have vanished without the
    /// matching `EndSession` ever reaching us.
    pub fn apply(&self, action: DeviceAction) -> Result<HidResponse, HidError> {
        match action {
            DeviceAction::StartSession { session_id } => {
                self.session.set(Some(session_id));
                self.profile.release()?;
                Ok(HidResponse::Connected { session_id })
            }
            DeviceAction::EndSession => {
                let session_id = self.session.take().ok_or(HidError::NoActiveSession)?;
                self.profile.release()?;
                Ok(HidResponse::Closed { session_id })
            }
            DeviceAction::SendReport { session_id, report } => {
                match self.session.get() {
                    None => return Err(HidError::NoActiveSession),
                    Some(active) if active != session_id => {
                        return Err(HidError::SessionMismatch {
                            active_session: active,
                            provided: session_id,
                        });
                    }
                    Some(_) => {}
                }
                Ok(HidResponse::Report(self.profile.store_report(&report)?))
            }
        }
    }
}

pub mod profile {
    use core::{
        fmt,
        hint::spin_loop,
        sync::atomic::{AtomicBool, Ordering},
    };
    use crate::hid::actions::{HID_REPORT_SIZE, KeyboardReport};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
    use shared::protocol::MAX_FRAME_LEN;
    use trouble_host::Error as TroubleError;
    use trouble_host::advertise::{AdStructure, BR_EDR_NOT_SUPPORTED, LE_GENERAL_DISCOVERABLE};
    use trouble_host::prelude::{
        FromGatt, GapConfig, PeripheralConfig, Uuid, appearance, characteristic, descriptors, gatt_server,
        gatt_service, service,
    };

    pub const REPORT_DESCRIPTOR_LEN: usize = 63;
    pub const REPORT_DESCRIPTOR: [u8; REPORT_DESCRIPTOR_LEN] = [
        0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15, 0x00, 0x25,
        0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x01, 0x75, 0x08, 0x81, 0x01, 0x95, 0x05,
        0x75, 0x01, 0x05, 0x08, 0x19, 0x01, 0x29, 0x05, 0x91, 0x02, 0x95, 0x01, 0x75, 0x03, 0x91,
        0x01, 0x95, 0x06, 0x75, 0x08, 0x15, 0x00, 0x25, 0x65, 0x05, 0x07, 0x19, 0x00, 0x29, 0x65,
        0x81, 0x00, 0xC0,
    ];
    const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x02];
    const REPORT_REFERENCE: [u8; 2] = [0x01, 0x01];
    const USER_SERVICE_UUID: Uuid = Uuid::new_short(0xFFF0);
    const USER_FRAME_UUID: Uuid = Uuid::new_short(0xFFF1);
    const ADV_BUFFER_LEN: usize = 31;
    const ATTRIBUTE_TABLE_SIZE: usize = 96;
    const CCCD_TABLE_SIZE: usize = 4;
    pub const CONNECTIONS_MAX: usize = 1;

    /// Value type of the user-management characteristic.
    pub type FrameValue = heapless::Vec<u8, MAX_FRAME_LEN>;

    static SERVER_POOL: Mutex<CriticalSectionRawMutex, Option<FingerpassServer<'static>>> =
        Mutex::new(None);
    static SERVER_INITIALIZED: AtomicBool = AtomicBool::new(false);

    #[gatt_service(uuid = service::HUMAN_INTERFACE_DEVICE)]
    pub struct HidService {
        #[characteristic(uuid = characteristic::HID_INFORMATION, read, value = HID_INFORMATION)]
        information: [u8; 4],
        #[characteristic(uuid = characteristic::REPORT_MAP, read, value = REPORT_DESCRIPTOR)]
        report_map: [u8; REPORT_DESCRIPTOR_LEN],
        #[descriptor(uuid = descriptors::REPORT_REFERENCE, read, value = REPORT_REFERENCE)]
        #[characteristic(uuid = characteristic::REPORT, read, notify, value = [0u8; HID_REPORT_SIZE])]
        pub input_report: [u8; HID_REPORT_SIZE],
        #[characteristic(uuid = characteristic::HID_CONTROL_POINT, write_without_response, value = 0u8)]
        control_point: u8,
        #[characteristic(uuid = characteristic::PROTOCOL_MODE, read, write_without_response, value = 1u8)]
        protocol_mode: u8,
    }

    /// Companion command channel: writes carry request frames, notifications carry responses.
    #[gatt_service(uuid = USER_SERVICE_UUID)]
    pub struct UserMgmtService {
        #[characteristic(uuid = USER_FRAME_UUID, read, write, notify)]
        pub frame: FrameValue,
    }

    #[gatt_server(
        connections_max = CONNECTIONS_MAX,
        mutex_type = NoopRawMutex,
        attribute_table_size = ATTRIBUTE_TABLE_SIZE,
        cccd_table_size = CCCD_TABLE_SIZE
    )]
    pub struct FingerpassServer {
        pub hid: HidService,
        pub user: UserMgmtService,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum ProfileError {
        InvalidConfig(&'static str),
        AdvertisementTooLong,
        ServerUnavailable,
        FrameTooLong(usize),
        Attribute(TroubleError),
    }

    impl From<TroubleError> for ProfileError {
        fn from(value: TroubleError) -> Self {
            ProfileError::Attribute(value)
        }
    }

    pub struct TroubleProfile {
        pub name: &'static str,
        server: Option<FingerpassServer<'static>>,
        adv_data: [u8; ADV_BUFFER_LEN],
        adv_len: usize,
        scan_data: [u8; ADV_BUFFER_LEN],
        scan_len: usize,
    }

    impl TroubleProfile {
        pub fn new(name: &'static str) -> Result<Self, ProfileError> {
            let server = acquire_server(name)?;
            let (adv_data, adv_len) = encode_name_advertisement(name)?;
            let (scan_data, scan_len) = encode_scan_response(name)?;
            Ok(Self {
                name,
                server: Some(server),
                adv_data,
                adv_len,
                scan_data,
                scan_len,
            })
        }

        pub fn advertisement(&self) -> (&[u8], &[u8]) {
            (
                &self.adv_data[..self.adv_len],
                &self.scan_data[..self.scan_len],
            )
        }

        pub fn server(&self) -> Result<&FingerpassServer<'static>, ProfileError> {
            self.server.as_ref().ok_or(ProfileError::ServerUnavailable)
        }

        /// Store the report in the input characteristic and return the bytes to notify.
        pub fn store_report(
            &self,
            report: &KeyboardReport,
        ) -> Result<[u8; HID_REPORT_SIZE], ProfileError> {
            let bytes = report.to_bytes();
            let server = self.server()?;
            server.set(&server.hid.input_report, &bytes)?;
            Ok(bytes)
        }

        /// Reset the input characteristic to "no keys pressed".
        pub fn release(&self) -> Result<(), ProfileError> {
            self.store_report(&KeyboardReport::empty()).map(|_| ())
        }

        /// Current value of the input characteristic.
        pub fn input_report(&self) -> Result<[u8; HID_REPORT_SIZE], ProfileError> {
            let server = self.server()?;
            Ok(server.get(&server.hid.input_report)?)
        }

        /// Store a response frame in the user characteristic and return the value to notify.
        pub fn publish_user_frame(&self, frame: &[u8]) -> Result<FrameValue, ProfileError> {
            let value =
                FrameValue::from_slice(frame).map_err(|_| ProfileError::FrameTooLong(frame.len()))?;
            let server = self.server()?;
            server.set(&server.user.frame, &value)?;
            Ok(value)
        }

    }

    impl fmt::Debug for TroubleProfile {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TroubleProfile")
                .field("name", &self.name)
                .finish()
        }
    }

    impl Drop for TroubleProfile {
        fn drop(&mut self) {
            if let Some(server) = self.server.take() {
                unsafe {
                    SERVER_POOL.lock_mut(|pool| {
                        if pool.is_none() {
                            *pool = Some(server);
                        }
                    });
                }
            }
        }
    }

    fn encode_name_advertisement(
        name: &'static str,
    ) -> Result<([u8; ADV_BUFFER_LEN], usize), ProfileError> {
        let mut buffer = [0u8; ADV_BUFFER_LEN];
        let len = AdStructure::encode_slice(
            &[
                AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                AdStructure::ServiceUuids16(&[[0x12, 0x18]]),
                AdStructure::CompleteLocalName(name.as_bytes()),
            ],
            &mut buffer,
        )
        .map_err(|_| ProfileError::AdvertisementTooLong)?;
        Ok((buffer, len))
    }

    fn encode_scan_response(
        name: &'static str,
    ) -> Result<([u8; ADV_BUFFER_LEN], usize), ProfileError> {
        let mut buffer = [0u8; ADV_BUFFER_LEN];
        let len = AdStructure::encode_slice(
            &[AdStructure::ShortenedLocalName(name.as_bytes())],
            &mut buffer,
        )
        .map_err(|_| ProfileError::AdvertisementTooLong)?;
        Ok((buffer, len))
    }

    fn acquire_server(name: &'static str) -> Result<FingerpassServer<'static>, ProfileError> {
        loop {
            if let Some(server) = unsafe { SERVER_POOL.lock_mut(|pool| pool.take()) } {
                return Ok(server);
            }

            if SERVER_INITIALIZED
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let gap_config = GapConfig::Peripheral(PeripheralConfig {
                    name,
                    appearance: &appearance::human_interface_device::KEYBOARD,
                });
                return FingerpassServer::new_with_config(gap_config)
                    .map_err(ProfileError::InvalidConfig);
            }

            spin_loop();
        }
    }
}
