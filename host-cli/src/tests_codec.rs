use clap::Parser;
use shared::protocol::{Command as DeviceCommand, TransportScope};

use crate::commands::codec::{preview_actions, render_actions};
use crate::commands::frame::build;
use crate::commands::{describe, parse_hex, user_entry};
use crate::{Cli, Command, PreviewArgs, Request, ScopeArg, UserArgs};

fn user_args(password: &str) -> UserArgs {
    UserArgs {
        label: "mail".into(),
        password: password.into(),
        os_unlock: false,
        auto_bind: false,
        fingerprint: None,
        transport: ScopeArg::Either,
    }
}

#[test]
fn add_user_flags_parse_into_a_request() {
    let cli = Cli::try_parse_from([
        "fingerpass",
        "frame",
        "add-user",
        "--label",
        "bank",
        "--password",
        "pin{ENTER}",
        "--auto-bind",
        "--fingerprint",
        "3",
        "--transport",
        "usb",
    ])
    .expect("parse cli");

    let Command::Frame {
        request: Request::AddUser(user),
    } = cli.command
    else {
        panic!("expected frame add-user");
    };
    assert_eq!(user.label, "bank");
    assert!(user.auto_bind);
    assert_eq!(user.fingerprint, Some(3));
    assert_eq!(user.transport, ScopeArg::Usb);
}

#[test]
fn auto_bind_without_fingerprint_is_rejected() {
    let result = Cli::try_parse_from([
        "fingerpass",
        "send",
        "add-user",
        "--label",
        "bank",
        "--password",
        "pin",
        "--auto-bind",
    ]);
    assert!(result.is_err());
}

#[test]
fn port_flag_is_accepted_after_the_subcommand() {
    let cli = Cli::try_parse_from(["fingerpass", "list", "--port", "/dev/ttyACM0"])
        .expect("parse cli");
    assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
    assert!(cli.command.needs_device());
}

#[test]
fn offline_commands_do_not_need_a_device() {
    let cli = Cli::try_parse_from(["fingerpass", "encode", "abc"]).expect("parse cli");
    assert!(!cli.command.needs_device());

    let cli = Cli::try_parse_from(["fingerpass", "batch", "--file", "users.json", "--dry-run"])
        .expect("parse cli");
    assert!(!cli.command.needs_device());
}

#[test]
fn user_entry_stores_placeholders_as_bytes() {
    let mut args = user_args("ab{ENTER}");
    args.transport = ScopeArg::Ble;
    let entry = user_entry(&args).expect("entry");

    assert_eq!(entry.password.as_slice(), &[b'a', b'b', 0x80]);
    assert_eq!(entry.transport_scope, TransportScope::BluetoothOnly);
}

#[test]
fn unknown_placeholder_is_reported() {
    let err = user_entry(&user_args("pin{F13}")).expect_err("unstorable token");
    assert!(err.to_string().contains("F13"));
}

#[test]
fn requests_map_to_device_commands() {
    assert_eq!(
        build(&Request::RemoveUser { index: 2 }).expect("build"),
        DeviceCommand::RemoveUser { index: 2 }
    );
    assert_eq!(
        build(&Request::GetUser { index: 0 }).expect("build"),
        DeviceCommand::GetUserEntry { index: 0 }
    );
    assert_eq!(
        build(&Request::Enroll).expect("build"),
        DeviceCommand::EnrollFingerprint
    );

    let edit = build(&Request::EditUser {
        index: 1,
        user: user_args("x"),
    })
    .expect("build");
    let frame = edit.encode().expect("encode");
    assert_eq!(&frame[..2], &[0x02, 0x01]);
}

#[test]
fn preview_renders_delays_and_keys() {
    let actions = preview_actions(&PreviewArgs {
        text: "a{DELAY:500}".into(),
        stored: false,
    })
    .expect("preview");
    let lines = render_actions(&actions);

    assert_eq!(lines, ["key 0x04 modifiers 0x00", "wait 500 ms"]);
}

#[test]
fn stored_preview_reads_hex_bytes() {
    let actions = preview_actions(&PreviewArgs {
        text: "61 80".into(),
        stored: true,
    })
    .expect("preview");
    let lines = render_actions(&actions);

    assert_eq!(lines, ["key 0x04 modifiers 0x00", "key 0x28 modifiers 0x00"]);
}

#[test]
fn hex_input_tolerates_spaces_and_rejects_garbage() {
    assert_eq!(parse_hex("de ad").expect("hex").as_slice(), &[0xDE, 0xAD]);
    assert!(parse_hex("zz").is_err());
}

#[test]
fn masked_entries_hide_the_password() {
    let entry = user_entry(&UserArgs {
        os_unlock: true,
        ..user_args("secret")
    })
    .expect("entry");
    let event = shared::protocol::DeviceEvent::UserEntry { index: 0, entry };

    let masked = describe(&event, false);
    assert!(masked.contains("password=******"));
    assert!(masked.contains("os-unlock"));
    assert!(describe(&event, true).contains("password=secret"));
}
