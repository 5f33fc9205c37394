use std::fs;

use shared::protocol::{Command, MessageLevel, ResponseFrame, TransportScope};
use tempfile::tempdir;

use crate::commands::batch::{BatchFile, BatchReport, apply};
use crate::transport::memory::MemoryDeviceTransport;

const SAMPLE: &str = r#"{
    "clear_first": true,
    "users": [
        { "label": "mail", "password": "hunter2{ENTER}" },
        {
            "label": "laptop",
            "password": "pin",
            "os_unlock": true,
            "auto_bind": true,
            "fingerprint": 2,
            "transport": "UsbOnly"
        }
    ]
}"#;

#[test]
fn batch_file_loads_from_disk() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("users.json");
    fs::write(&path, SAMPLE).expect("write batch");

    let batch = BatchFile::load(&path).expect("load batch");

    assert!(batch.clear_first);
    assert_eq!(batch.users.len(), 2);
    assert_eq!(batch.users[0].transport, TransportScope::Either);
    assert_eq!(batch.users[1].transport, TransportScope::UsbOnly);
}

#[test]
fn missing_batch_file_is_a_config_error() {
    let dir = tempdir().expect("tempdir");
    let err = BatchFile::load(&dir.path().join("absent.json")).expect_err("missing file");
    assert!(err.to_string().contains("configuration error"));
}

#[test]
fn commands_start_with_clear_when_requested() {
    let batch = BatchFile::parse(SAMPLE).expect("parse");
    let commands = batch.commands().expect("commands");

    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0], Command::ClearDb);
    let Command::AddUser(entry) = &commands[1] else {
        panic!("expected add-user");
    };
    assert_eq!(entry.password.as_slice(), b"hunter2\x80");
}

#[test]
fn auto_bind_without_fingerprint_is_rejected() {
    let batch = BatchFile::parse(
        r#"{ "users": [ { "label": "mail", "password": "x", "auto_bind": true } ] }"#,
    )
    .expect("parse");

    let err = batch.commands().expect_err("invalid user");
    assert!(err.to_string().contains("mail"));
}

#[test]
fn overlong_label_is_rejected_before_sending() {
    let label = "l".repeat(40);
    let json = format!(r#"{{ "users": [ {{ "label": "{label}", "password": "x" }} ] }}"#);
    let batch = BatchFile::parse(&json).expect("parse");

    assert!(batch.commands().is_err());
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(BatchFile::parse(r#"{ "users": [], "colour": "red" }"#).is_err());
}

#[test]
fn apply_counts_rejected_entries_and_keeps_going() {
    let batch = BatchFile::parse(SAMPLE).expect("parse");
    let commands = batch.commands().expect("commands");
    let mut transport = MemoryDeviceTransport::new();
    transport.queue_response(ResponseFrame::db_cleared());
    transport.queue_response(ResponseFrame::message(MessageLevel::Error, "Database full"));
    transport.queue_response(ResponseFrame::message(MessageLevel::Error, "Database full"));

    let report = apply(&mut transport, &commands).expect("apply");

    assert_eq!(
        report,
        BatchReport {
            succeeded: 1,
            failed: 2
        }
    );
    assert_eq!(transport.sent_frames.len(), 3);
}

#[test]
fn apply_aborts_on_a_locked_device() {
    let batch = BatchFile::parse(SAMPLE).expect("parse");
    let commands = batch.commands().expect("commands");
    let mut transport = MemoryDeviceTransport::new();
    transport.queue_response(ResponseFrame::auth_status(false));

    assert!(apply(&mut transport, &commands).is_err());
    assert_eq!(transport.sent_frames.len(), 1);
}
