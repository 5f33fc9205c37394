use std::io::{self, Cursor, Read, Write};

use shared::link::encode_link_frame;
use shared::protocol::{
    Command, DEFAULT_MTU, DeviceEvent, MessageLevel, ResponseFrame, TransportScope, UserEntry,
};
use zeroize::Zeroizing;

use crate::commands::send::collect_users;
use crate::transport::memory::MemoryDeviceTransport;
use crate::transport::{DeviceTransport, exchange};

/// Serial double: reads come from a prepared buffer, writes are captured.
struct LoopbackPort {
    rx: Cursor<Vec<u8>>,
    tx: Vec<u8>,
}

impl Read for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rx.read(buf)
    }
}

impl Write for LoopbackPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn entry(label: &str) -> UserEntry {
    UserEntry {
        label: label.into(),
        password: Zeroizing::new(b"pw".to_vec()),
        requires_os_unlock: false,
        auto_bind: false,
        fingerprint_id: None,
        transport_scope: TransportScope::Either,
    }
}

#[test]
fn serial_transport_wraps_commands_in_link_frames() {
    let mut port = LoopbackPort {
        rx: Cursor::new(Vec::new()),
        tx: Vec::new(),
    };
    port.send_command(&Command::GetUserEntry { index: 3 })
        .expect("send");

    let expected = encode_link_frame(&[0x04, 0x03]).expect("link frame");
    assert_eq!(port.tx, expected);
}

#[test]
fn serial_transport_skips_noise_before_a_frame() {
    let response = ResponseFrame::auth_status(true).to_bytes(DEFAULT_MTU);
    let mut rx = b"boot log\r\n".to_vec();
    rx.extend(encode_link_frame(&response).expect("link frame"));
    let mut port = LoopbackPort {
        rx: Cursor::new(rx),
        tx: Vec::new(),
    };

    assert_eq!(port.read_event().expect("event"), DeviceEvent::AuthStatus(true));
}

#[test]
fn corrupted_link_frame_is_an_error() {
    let response = ResponseFrame::db_cleared().to_bytes(DEFAULT_MTU);
    let mut rx = encode_link_frame(&response).expect("link frame");
    let last = rx.len() - 1;
    rx[last] ^= 0xFF;
    let mut port = LoopbackPort {
        rx: Cursor::new(rx),
        tx: Vec::new(),
    };

    let err = port.read_frame().expect_err("checksum mismatch");
    assert!(err.to_string().contains("checksum"));
}

#[test]
fn closed_port_reports_transport_error() {
    let mut port = LoopbackPort {
        rx: Cursor::new(Vec::new()),
        tx: Vec::new(),
    };
    assert!(port.read_frame().is_err());
}

#[test]
fn successful_add_reads_the_pushed_entry() {
    let mut transport = MemoryDeviceTransport::new();
    transport.queue_response(ResponseFrame::message(MessageLevel::Info, "User added"));
    transport.queue_response(ResponseFrame::user_entry(0, &entry("mail")).expect("entry"));

    let events = exchange(&mut transport, &Command::AddUser(entry("mail"))).expect("exchange");

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[1], DeviceEvent::UserEntry { index: 0, entry } if entry.label == "mail"));
    assert_eq!(transport.pending_responses(), 0);
}

#[test]
fn rejected_add_reads_a_single_reply() {
    let mut transport = MemoryDeviceTransport::new();
    transport.queue_response(ResponseFrame::message(MessageLevel::Error, "Database full"));
    transport.queue_response(ResponseFrame::auth_status(true));

    let events = exchange(&mut transport, &Command::AddUser(entry("mail"))).expect("exchange");

    assert_eq!(events.len(), 1);
    assert_eq!(transport.pending_responses(), 1);
}

#[test]
fn listing_stops_at_end_of_list() {
    let mut transport = MemoryDeviceTransport::new();
    transport.queue_response(ResponseFrame::user_entry(0, &entry("mail")).expect("entry"));
    transport.queue_response(ResponseFrame::user_entry(1, &entry("bank")).expect("entry"));
    transport.queue_response(ResponseFrame::end_of_list(2));

    let users = collect_users(&mut transport).expect("list");

    assert_eq!(users.len(), 2);
    assert_eq!(
        transport.sent_commands(),
        [
            Command::GetUserEntry { index: 0 },
            Command::GetUserEntry { index: 1 },
            Command::GetUserEntry { index: 2 },
        ]
    );
}

#[test]
fn listing_a_locked_device_fails() {
    let mut transport = MemoryDeviceTransport::new();
    transport.queue_response(ResponseFrame::auth_status(false));

    let err = collect_users(&mut transport).expect_err("locked");
    assert!(err.to_string().contains("locked"));
}
