use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use shared::error::SharedError;
use shared::link::{LinkAssembler, LinkError, encode_link_frame};
use shared::protocol::{Command, DeviceEvent, MessageLevel, ResponseFrame};
use zeroize::Zeroizing;

use crate::constants::{
    DEFAULT_TIMEOUT_SECS, FINGERPASS_IDENTITY_KEYWORDS, FINGERPASS_USB_PID, FINGERPASS_USB_VID,
    SERIAL_BAUD_RATE,
};

#[cfg(test)]
pub mod memory;

pub trait DeviceTransport {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SharedError>;

    fn read_frame(&mut self) -> Result<Vec<u8>, SharedError>;

    fn send_command(&mut self, command: &Command) -> Result<(), SharedError> {
        let frame = command.encode()?;
        self.write_frame(&frame)
    }

    fn read_event(&mut self) -> Result<DeviceEvent, SharedError> {
        let frame = Zeroizing::new(self.read_frame()?);
        let response = ResponseFrame::decode(&frame)?;
        Ok(response.event()?)
    }
}

impl<T> DeviceTransport for T
where
    T: Read + Write + ?Sized,
{
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SharedError> {
        let encoded = Zeroizing::new(encode_link_frame(frame)?);
        self.write_all(&encoded)
            .map_err(|err| map_io_error("Failed to write frame", err))?;
        self.flush()
            .map_err(|err| map_io_error("Failed to flush transport", err))
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, SharedError> {
        let mut assembler = LinkAssembler::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte) {
                Ok(0) => {
                    return Err(SharedError::Transport(
                        "Device closed the connection".into(),
                    ));
                }
                Ok(_) => match assembler.push(byte[0]) {
                    None | Some(Err(LinkError::BadMagic(_))) => {}
                    Some(result) => return Ok(result?),
                },
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(map_io_error("Failed to read frame", err)),
            }
        }
    }
}

/// Send `command` and collect every response the device produces for it.
///
/// USB replies are synchronous: a successful add answers with a message and the stored entry,
/// everything else with a single frame.
pub fn exchange<T>(transport: &mut T, command: &Command) -> Result<Vec<DeviceEvent>, SharedError>
where
    T: DeviceTransport + ?Sized,
{
    transport.send_command(command)?;
    let first = transport.read_event()?;
    let expects_entry = matches!(command, Command::AddUser(_))
        && matches!(
            first,
            DeviceEvent::Message {
                level: MessageLevel::Info,
                ..
            }
        );

    let mut events = vec![first];
    if expects_entry {
        events.push(transport.read_event()?);
    }
    Ok(events)
}

pub fn open_serial_port(port_path: &str) -> Result<Box<dyn SerialPort>, SharedError> {
    serialport::new(port_path, SERIAL_BAUD_RATE)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .open()
        .map_err(|err| SharedError::Transport(format!("Failed to open {port_path}: {err}")))
}

pub fn detect_first_serial_port(allow_any_port: bool) -> Result<String, SharedError> {
    let ports = serialport::available_ports()
        .map_err(|err| SharedError::Transport(format!("Failed to enumerate ports: {err}")))?;
    select_serial_port(&ports, allow_any_port)
}

pub fn select_serial_port(
    ports: &[SerialPortInfo],
    allow_any_port: bool,
) -> Result<String, SharedError> {
    if let Some(port) = ports.iter().find(|port| matches_fingerpass_vid_pid(port)) {
        return Ok(port.port_name.clone());
    }

    if let Some(port) = ports.iter().find(|port| matches_fingerpass_identity(port)) {
        return Ok(port.port_name.clone());
    }

    if allow_any_port {
        if let Some(port) = ports
            .iter()
            .find(|port| matches!(port.port_type, SerialPortType::UsbPort(_)))
        {
            return Ok(port.port_name.clone());
        }
    }

    Err(missing_fingerpass_error())
}

fn matches_fingerpass_vid_pid(port: &SerialPortInfo) -> bool {
    match &port.port_type {
        SerialPortType::UsbPort(info) => {
            info.vid == FINGERPASS_USB_VID && info.pid == FINGERPASS_USB_PID
        }
        _ => false,
    }
}

fn matches_fingerpass_identity(port: &SerialPortInfo) -> bool {
    match &port.port_type {
        SerialPortType::UsbPort(info) => {
            let fields = [&info.manufacturer, &info.product, &info.serial_number];
            fields.iter().any(|field| {
                field.as_deref().is_some_and(|value| {
                    let value = value.to_ascii_lowercase();
                    FINGERPASS_IDENTITY_KEYWORDS
                        .iter()
                        .any(|keyword| value.contains(keyword))
                })
            })
        }
        _ => false,
    }
}

fn missing_fingerpass_error() -> SharedError {
    SharedError::Transport(
        "No Fingerpass serial port found. Pass --port or use --any-port to pick the first USB serial device."
            .into(),
    )
}

pub fn map_io_error(context: &str, err: io::Error) -> SharedError {
    if err.kind() == ErrorKind::TimedOut {
        SharedError::Transport(format!("{context}: timed out waiting for the device"))
    } else {
        SharedError::Transport(format!("{context}: {err}"))
    }
}
