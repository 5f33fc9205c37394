#![cfg(target_arch = "xtensa")]

use crate::crypto::CbcZeroIvCipher;
use crate::device::SharedDevice;
use crate::storage::BootFlash;

type Device = SharedDevice<CbcZeroIvCipher, BootFlash<'static>>;
type UsbDriver = esp_hal::otg_fs::asynch::Driver<'static>;
type SensorUart = esp_hal::uart::Uart<'static, esp_hal::Async>;
type BleController = bt_hci::controller::ExternalController<esp_wifi::ble::controller::BleConnector<'static>, 20>;

const USB_MAX_PACKET_SIZE: u16 = 64;

fn now_ms() -> u64 {
    embassy_time::Instant::now().as_millis()
}

mod tasks {
    use super::usb::UsbKeyboard;
    use super::{BleController, Device, SensorUart, USB_MAX_PACKET_SIZE, UsbDriver, now_ms};
    use crate::biometric::requests::{self, BiometricRequest};
    use crate::biometric::{BiometricController, BiometricTimings, SensorError};
    use crate::hid::ble::profile::{CONNECTIONS_MAX, FingerpassServer, TroubleProfile};
    use crate::hid::ble::{BleHid, HidResponse, frame_limit};
    use crate::hid::core::actions::{self, BleKeyboard, DeviceAction};
    use crate::injection::{InjectionTimings, InjectionTrigger, Keyboards};
    use crate::protocol::{DEVICE_BUSY, handle_frame, inbound, notifications, serve_inbound};
    use crate::sensor::UartSensor;
    use crate::status::{self, StatusEvent};
    use crate::transport::{self, TransportState};
    use alloc::format;
    use embassy_executor::task;
    use embassy_futures::join::join;
    use embassy_futures::select::{Either3, select3};
    use embassy_time::{Delay, Timer};
    use embassy_usb::{
        UsbDevice,
        class::cdc_acm::{Receiver as CdcReceiver, Sender as CdcSender},
        driver::EndpointError,
    };
    use shared::link::{LinkAssembler, LinkError, encode_link_frame};
    use shared::protocol::{MAX_FRAME_LEN, MessageLevel, ResponseFrame};
    use trouble_host::prelude::*;
    use zeroize::Zeroizing;

    const L2CAP_CHANNELS_MAX: usize = 2;
    const BLE_ADDRESS: [u8; 6] = [0xF1, 0x9E, 0x2A, 0x05, 0xE4, 0xC3];

    #[task]
    pub async fn usb_device(mut device: UsbDevice<'static, UsbDriver>) {
        device.run().await;
    }

    /// Companion link over CDC-ACM. Frames are wrapped in the serial link envelope.
    #[task]
    pub async fn usb_link(
        mut receiver: CdcReceiver<'static, UsbDriver>,
        mut sender: CdcSender<'static, UsbDriver>,
        device: &'static Device,
    ) {
        let mut packet = [0u8; USB_MAX_PACKET_SIZE as usize];
        loop {
            receiver.wait_connection().await;
            log::info!("usb link opened");
            let mut assembler = LinkAssembler::new();

            loop {
                let len = match receiver.read_packet(&mut packet).await {
                    Ok(len) => len,
                    Err(EndpointError::Disabled) => break,
                    Err(error) => {
                        log::warn!("usb link read failed: {error:?}");
                        break;
                    }
                };

                for &byte in &packet[..len] {
                    let responses = match assembler.push(byte) {
                        None => continue,
                        Some(Ok(frame)) => {
                            let mut frame = Zeroizing::new(frame);
                            let mut core = device.lock().await;
                            handle_frame(&mut core, &mut frame, now_ms()).await
                        }
                        Some(Err(LinkError::BadMagic(_))) => continue,
                        Some(Err(error)) => {
                            log::warn!("usb link frame dropped: {error}");
                            alloc::vec![ResponseFrame::message(
                                MessageLevel::Error,
                                &format!("Bad link frame: {error}"),
                            )]
                        }
                    };

                    for response in responses {
                        if send_link(&mut sender, &response.to_bytes(MAX_FRAME_LEN))
                            .await
                            .is_err()
                        {
                            log::warn!("usb link closed while sending response");
                        }
                    }
                }
            }
            log::info!("usb link closed");
        }
    }

    async fn send_link(
        sender: &mut CdcSender<'static, UsbDriver>,
        frame: &[u8],
    ) -> Result<(), EndpointError> {
        let Ok(data) = encode_link_frame(frame).map(Zeroizing::new) else {
            return Ok(());
        };
        let packet_size = USB_MAX_PACKET_SIZE as usize;
        for chunk in data.chunks(packet_size) {
            sender.write_packet(chunk).await?;
        }
        if data.len() % packet_size == 0 {
            sender.write_packet(&[]).await?;
        }
        Ok(())
    }

    /// BLE peripheral: HID keyboard plus the user-management characteristic.
    #[task]
    pub async fn ble_task(controller: BleController, device: &'static Device) {
        let name = device.lock().await.config.device_name;
        let mtu = device.lock().await.config.mtu;

        let profile = match TroubleProfile::new(name) {
            Ok(profile) => profile,
            Err(error) => {
                transport::set_ble_state(TransportState::Error);
                log::error!("Failed to initialize BLE profile: {error:?}");
                return;
            }
        };
        let hid = BleHid::new(profile);

        let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
            HostResources::new();
        let stack = trouble_host::new(controller, &mut resources)
            .set_random_address(Address::random(BLE_ADDRESS));
        let Host {
            mut peripheral,
            mut runner,
            ..
        } = stack.build();

        let _ = join(
            async {
                if let Err(error) = runner.run().await {
                    log::error!("BLE host stopped: {error:?}");
                }
            },
            async {
                let mut session_id = 0u32;
                loop {
                    transport::set_ble_state(TransportState::Waiting);
                    let Ok(server) = hid.profile().server() else {
                        transport::set_ble_state(TransportState::Error);
                        return;
                    };
                    let (adv_data, scan_data) = hid.profile().advertisement();
                    let advertiser = match peripheral
                        .advertise(
                            &AdvertisementParameters::default(),
                            Advertisement::ConnectableScannableUndirected {
                                adv_data,
                                scan_data,
                            },
                        )
                        .await
                    {
                        Ok(advertiser) => advertiser,
                        Err(error) => {
                            log::error!("BLE advertising failed: {error:?}");
                            Timer::after_millis(1_000).await;
                            continue;
                        }
                    };

                    let connection = match advertiser.accept().await {
                        Ok(conn) => conn.with_attribute_server(server),
                        Err(error) => Err(error),
                    };
                    let Ok(conn) = connection else {
                        log::warn!("BLE connection setup failed");
                        continue;
                    };

                    session_id = session_id.wrapping_add(1).max(1);
                    actions::publish(DeviceAction::StartSession { session_id });
                    serve_connection(&conn, server, &hid, mtu).await;
                    actions::publish(DeviceAction::EndSession);
                    device.lock().await.on_disconnect();
                }
            },
        )
        .await;
    }

    async fn serve_connection<P: PacketPool>(
        conn: &GattConnection<'_, '_, P>,
        server: &FingerpassServer<'static>,
        hid: &BleHid,
        mtu: usize,
    ) {
        let actions = actions::action_receiver();
        let notifications = notifications::notification_receiver();

        loop {
            match select3(conn.next(), actions.receive(), notifications.receive()).await {
                Either3::First(GattConnectionEvent::Disconnected { reason }) => {
                    log::info!("BLE peer disconnected: {reason:?}");
                    return;
                }
                Either3::First(GattConnectionEvent::Gatt { event }) => {
                    let frame = match &event {
                        GattEvent::Write(write) if write.handle() == server.user.frame.handle => {
                            Some(Zeroizing::new(write.data().to_vec()))
                        }
                        _ => None,
                    };
                    match event.accept() {
                        Ok(reply) => reply.send().await,
                        Err(error) => log::warn!("GATT reply failed: {error:?}"),
                    }

                    // The frame task owns the device lock; this loop only moves bytes.
                    if let Some(frame) = frame
                        && inbound::publish(frame).is_err()
                    {
                        log::warn!("inbound frame queue full, frame rejected");
                        let busy = ResponseFrame::message(MessageLevel::Error, DEVICE_BUSY);
                        notify_frame(conn, server, hid, &busy, mtu).await;
                    }
                }
                Either3::First(_) => {}
                Either3::Second(action) => match hid.apply(action) {
                    Ok(HidResponse::Connected { session_id }) => {
                        log::info!("BLE HID session {session_id} active");
                        transport::set_ble_state(TransportState::Connected);
                    }
                    Ok(HidResponse::Report(report)) => {
                        if server.hid.input_report.notify(conn, &report).await.is_err() {
                            log::warn!("HID report notification failed");
                        }
                    }
                    Ok(HidResponse::Closed { session_id }) => {
                        log::info!("BLE HID session {session_id} closed");
                    }
                    Err(error) => log::warn!("BLE HID action rejected: {error}"),
                },
                Either3::Third(frame) => {
                    notify_frame(conn, server, hid, &frame, mtu).await;
                }
            }
        }
    }

    /// Serves companion frames written over BLE, one at a time, under the device lock.
    #[task]
    pub async fn frame_task(device: &'static Device) {
        let frames = inbound::inbound_receiver();
        loop {
            let frame = frames.receive().await;
            serve_inbound(device, frame, now_ms()).await;
        }
    }

    async fn notify_frame<P: PacketPool>(
        conn: &GattConnection<'_, '_, P>,
        server: &FingerpassServer<'static>,
        hid: &BleHid,
        frame: &ResponseFrame,
        mtu: usize,
    ) {
        let limit = frame_limit(conn.raw().att_mtu(), mtu);
        let bytes = frame.to_bytes(limit);
        match hid.profile().publish_user_frame(&bytes) {
            Ok(value) => {
                if server.user.frame.notify(conn, &value).await.is_err() {
                    log::warn!("user frame notification failed");
                }
            }
            Err(error) => log::warn!("user frame not published: {error:?}"),
        }
    }

    /// Identification loop plus queued enroll and clear jobs.
    #[task]
    pub async fn biometric_task(uart: SensorUart, keyboard: UsbKeyboard, device: &'static Device) {
        let config = device.lock().await.config.clone();
        let mut controller = BiometricController::new(
            UartSensor::new(uart),
            Delay,
            BiometricTimings::from(&config),
        );
        let mut trigger = InjectionTrigger::new(
            Keyboards::new(BleKeyboard, keyboard),
            Delay,
            InjectionTimings::from(&config),
        );
        let jobs = requests::request_receiver();

        match controller.sensor().template_count().await {
            Ok(count) => log::info!("fingerprint sensor ready, {count} templates"),
            Err(error) => log::error!("fingerprint sensor not responding: {error}"),
        }

        loop {
            if let Ok(request) = jobs.try_receive() {
                run_request(&mut controller, request).await;
                continue;
            }

            match controller.identify().await {
                Ok(None) => {}
                Ok(Some(found)) => {
                    let mut core = device.lock().await;
                    core.begin_touch();
                    match u8::try_from(found.slot) {
                        Ok(slot) => {
                            let indicators = transport::snapshot();
                            if let Some(Err(error)) = core
                                .authenticate_and_inject(slot, now_ms(), &mut trigger, &indicators)
                                .await
                            {
                                log::warn!("injection failed: {error}");
                            }
                        }
                        Err(_) => log::warn!("slot {} outside the gate range", found.slot),
                    }
                    drop(core);
                    if let Err(error) = controller.wait_for_lift().await {
                        log::warn!("finger lift wait failed: {error}");
                    }
                }
                Err(SensorError::NoMatch) => {
                    log::info!("unknown finger");
                    device.lock().await.begin_touch();
                    if let Err(error) = controller.wait_for_lift().await {
                        log::warn!("finger lift wait failed: {error}");
                    }
                }
                Err(error) => log::warn!("identify failed: {error}"),
            }

            device.lock().await.expire(now_ms());
            Timer::after_millis(u64::from(config.poll_interval_ms)).await;
        }
    }

    async fn run_request(
        controller: &mut BiometricController<UartSensor<SensorUart>, Delay>,
        request: BiometricRequest,
    ) {
        match request {
            BiometricRequest::Enroll => {
                let result = controller
                    .enroll(|step, total| status::publish(StatusEvent::EnrollStep { step, total }))
                    .await;
                status::publish(match result {
                    Ok(slot) => StatusEvent::Enrolled { slot },
                    Err(error) => StatusEvent::EnrollFailed(error),
                });
            }
            BiometricRequest::ClearLibrary => {
                status::publish(match controller.clear_library().await {
                    Ok(()) => StatusEvent::LibraryCleared,
                    Err(error) => StatusEvent::ClearFailed(error),
                });
            }
        }
    }

    /// Log status events and forward the interesting ones to the companion.
    #[task]
    pub async fn status_task() {
        let events = status::status_receiver();
        loop {
            let event = events.receive().await;
            log::info!("status: {event:?}");
            if let Some(frame) = event.as_message() {
                notifications::publish(frame);
            }
        }
    }
}

pub mod runtime {
    use super::{Device, USB_MAX_PACKET_SIZE, tasks, usb};
    use crate::config::DeviceConfig;
    use crate::crypto::{CbcZeroIvCipher, HardwareKeySource};
    use crate::device::DeviceCore;
    use crate::hid::ble::profile::REPORT_DESCRIPTOR;
    use crate::hid::core::HID_REPORT_SIZE;
    use crate::storage::{BootFlash, VaultStorage};
    use crate::vault::CredentialVault;
    use embassy_executor::SpawnError;
    use embassy_sync::mutex::Mutex;
    use embassy_usb::{
        Builder as UsbBuilder,
        class::{cdc_acm, hid},
    };
    use esp_alloc::{EspHeap, HeapRegion, MemoryCapability};
    use esp_hal::{
        Config,
        clock::CpuClock,
        hmac::Hmac,
        otg_fs::{
            Usb,
            asynch::{Config as UsbDriverConfig, Driver as UsbDriver},
        },
        rng::Rng,
        timer::timg::TimerGroup,
        uart::{Config as UartConfig, Uart},
    };
    use esp_hal_embassy::Executor;
    use esp_storage::FlashStorage;
    use esp_wifi::{EspWifiController, ble::controller::BleConnector};
    use static_cell::StaticCell;

    #[global_allocator]
    static ALLOCATOR: EspHeap = EspHeap::empty();

    fn init_allocator() {
        const HEAP_SIZE: usize = 96 * 1024;
        static mut HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];
        unsafe {
            ALLOCATOR.add_region(HeapRegion::new(
                core::ptr::addr_of_mut!(HEAP).cast(),
                HEAP_SIZE,
                MemoryCapability::Internal.into(),
            ));
        };
    }

    static EXECUTOR: StaticCell<Executor> = StaticCell::new();
    static DEVICE: StaticCell<Device> = StaticCell::new();
    static RADIO: StaticCell<EspWifiController<'static>> = StaticCell::new();
    static USB_CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static USB_BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static USB_MSOS_DESCRIPTOR: StaticCell<[u8; 0]> = StaticCell::new();
    static USB_CONTROL_BUF: StaticCell<[u8; 256]> = StaticCell::new();
    static USB_CDC_STATE: StaticCell<cdc_acm::State<'static>> = StaticCell::new();
    static USB_HID_STATE: StaticCell<hid::State<'static>> = StaticCell::new();
    static USB_EVENT_HANDLER: StaticCell<usb::UsbEventHandler> = StaticCell::new();
    static USB_EP_OUT_BUFFER: StaticCell<[u8; 1024]> = StaticCell::new();

    const USB_VID: u16 = 0x303A;
    const USB_PID: u16 = 0x4002;
    const SENSOR_BAUDRATE: u32 = 57_600;

    fn halt(reason: &str) -> ! {
        log::error!("{reason}");
        panic!("{reason}");
    }

    fn spawn_or_log(name: &str, result: Result<(), SpawnError>) {
        if let Err(error) = result {
            log::error!("Failed to spawn {name}: {error:?}");
            panic!("failed to spawn {name}: {error:?}");
        }
    }

    pub fn main() -> ! {
        init_allocator();
        esp_println::logger::init_logger(log::LevelFilter::Info);

        let peripherals = esp_hal::init(Config::default().with_cpu_clock(CpuClock::max()));
        let timg0 = TimerGroup::new(peripherals.TIMG0);
        esp_hal_embassy::init(timg0.timer0);

        let config = DeviceConfig::default().validate();

        let mut key_source = HardwareKeySource::new(Hmac::new(peripherals.HMAC));
        let cipher = match CbcZeroIvCipher::from_source(&mut key_source) {
            Ok(cipher) => cipher,
            Err(error) => halt(&alloc::format!("device key unavailable: {error}")),
        };

        let mut flash = BootFlash::new(FlashStorage::new(peripherals.FLASH));
        let Some(range) = embassy_futures::block_on(flash.vault_range()) else {
            halt("vault partition not found");
        };
        let vault = embassy_futures::block_on(CredentialVault::open(
            cipher,
            VaultStorage::new(flash, range),
            config.max_users,
        ));
        log::info!("vault loaded with {} users", vault.len());
        let device: &'static Device = DEVICE.init(Mutex::new(DeviceCore::new(vault, config)));

        let timg1 = TimerGroup::new(peripherals.TIMG1);
        let radio = match esp_wifi::init(timg1.timer0, Rng::new(peripherals.RNG), peripherals.RADIO_CLK) {
            Ok(radio) => RADIO.init(radio),
            Err(error) => halt(&alloc::format!("radio init failed: {error:?}")),
        };
        let ble_controller = super::BleController::new(BleConnector::new(radio, peripherals.BT));

        let sensor_uart = match Uart::new(
            peripherals.UART1,
            UartConfig::default().with_baudrate(SENSOR_BAUDRATE),
        ) {
            Ok(uart) => uart
                .with_rx(peripherals.GPIO1)
                .with_tx(peripherals.GPIO2)
                .into_async(),
            Err(error) => halt(&alloc::format!("sensor UART init failed: {error:?}")),
        };

        let usb = Usb::new(peripherals.USB0, peripherals.GPIO20, peripherals.GPIO19);
        let driver = UsbDriver::new(
            usb,
            USB_EP_OUT_BUFFER.init([0; 1024]),
            UsbDriverConfig::default(),
        );

        let mut usb_config = embassy_usb::Config::new(USB_VID, USB_PID);
        usb_config.manufacturer = Some("Fingerpass");
        usb_config.product = Some("Fingerpass Keyboard");
        usb_config.serial_number = Some("0001");
        usb_config.device_class = 0xEF;
        usb_config.device_sub_class = 0x02;
        usb_config.device_protocol = 0x01;
        usb_config.composite_with_iads = true;

        let mut builder = UsbBuilder::new(
            driver,
            usb_config,
            USB_CONFIG_DESCRIPTOR.init([0; 256]),
            USB_BOS_DESCRIPTOR.init([0; 256]),
            USB_MSOS_DESCRIPTOR.init([]),
            USB_CONTROL_BUF.init([0; 256]),
        );
        builder.handler(USB_EVENT_HANDLER.init(usb::UsbEventHandler::new()));

        let keyboard = hid::HidWriter::<_, HID_REPORT_SIZE>::new(
            &mut builder,
            USB_HID_STATE.init(hid::State::new()),
            hid::Config {
                report_descriptor: &REPORT_DESCRIPTOR,
                request_handler: None,
                poll_ms: 10,
                max_packet_size: HID_REPORT_SIZE as u16,
            },
        );
        let cdc = cdc_acm::CdcAcmClass::new(
            &mut builder,
            USB_CDC_STATE.init(cdc_acm::State::new()),
            USB_MAX_PACKET_SIZE,
        );
        let usb_device = builder.build();
        let (cdc_sender, cdc_receiver) = cdc.split();

        let executor = EXECUTOR.init(Executor::new());
        executor.run(move |spawner| {
            spawn_or_log("USB device task", spawner.spawn(tasks::usb_device(usb_device)));
            spawn_or_log(
                "USB link task",
                spawner.spawn(tasks::usb_link(cdc_receiver, cdc_sender, device)),
            );
            spawn_or_log("BLE task", spawner.spawn(tasks::ble_task(ble_controller, device)));
            spawn_or_log("frame task", spawner.spawn(tasks::frame_task(device)));
            spawn_or_log(
                "biometric task",
                spawner.spawn(tasks::biometric_task(
                    sensor_uart,
                    usb::UsbKeyboard::new(keyboard),
                    device,
                )),
            );
            spawn_or_log("status task", spawner.spawn(tasks::status_task()));
        })
    }
}

pub mod usb {
    use super::UsbDriver;
    use crate::hid::ble::HidError;
    use crate::hid::core::{HID_REPORT_SIZE, KeyboardReport, KeyboardSink};
    use crate::transport::{self, TransportKind, TransportState};
    use embassy_usb::Handler;
    use embassy_usb::class::hid::HidWriter;

    /// Boot keyboard interface on the USB OTG port.
    pub struct UsbKeyboard {
        writer: HidWriter<'static, UsbDriver, HID_REPORT_SIZE>,
    }

    impl UsbKeyboard {
        pub fn new(writer: HidWriter<'static, UsbDriver, HID_REPORT_SIZE>) -> Self {
            Self { writer }
        }
    }

    impl KeyboardSink for UsbKeyboard {
        fn kind(&self) -> TransportKind {
            TransportKind::Usb
        }

        async fn send_report(&mut self, report: &KeyboardReport) -> Result<(), HidError> {
            self.writer.write(&report.to_bytes()).await.map_err(|error| {
                log::warn!("USB HID write failed: {error:?}");
                HidError::Usb
            })
        }
    }

    /// Mirrors the USB device state into the transport indicators.
    pub struct UsbEventHandler;

    impl UsbEventHandler {
        pub fn new() -> Self {
            transport::set_usb_state(TransportState::Waiting);
            Self
        }
    }

    impl Handler for UsbEventHandler {
        fn enabled(&mut self, enabled: bool) {
            if !enabled {
                transport::set_usb_state(TransportState::Offline);
            }
        }

        fn reset(&mut self) {
            transport::set_usb_state(TransportState::Connecting);
        }

        fn configured(&mut self, configured: bool) {
            log::info!("usb configured: {configured}");
            transport::set_usb_state(if configured {
                TransportState::Connected
            } else {
                TransportState::Waiting
            });
        }

        fn suspended(&mut self, suspended: bool) {
            transport::set_usb_state(if suspended {
                TransportState::Waiting
            } else {
                TransportState::Connected
            });
        }
    }
}
