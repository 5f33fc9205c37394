use shared::error::SharedError;
use shared::placeholder;
use shared::protocol::{DeviceEvent, MessageLevel, UserEntry};
use zeroize::Zeroizing;

use crate::transport::DeviceTransport;
use crate::{Command, UserArgs};

pub mod batch;
pub mod codec;
pub mod frame;
pub mod send;

pub trait TransportProvider {
    type Transport: DeviceTransport + ?Sized;

    fn connect(&self, port_path: &str) -> Result<Box<Self::Transport>, SharedError>;
}

/// Commands that never touch the device.
pub fn run_offline(command: Command) -> Result<(), SharedError> {
    match command {
        Command::Encode { text } => codec::encode(&text),
        Command::Decode { hex } => codec::decode(&hex),
        Command::Preview(args) => codec::preview(&args),
        Command::Frame { request } => frame::print(&request),
        Command::Inspect { hex } => frame::inspect(&hex),
        Command::Batch(args) => batch::dry_run(&args),
        Command::Send { .. } | Command::List(_) => Err(SharedError::Config(
            "this command needs a connected device".into(),
        )),
    }
}

pub fn run<T>(command: Command, transport: &mut T) -> Result<(), SharedError>
where
    T: DeviceTransport + ?Sized,
{
    match command {
        Command::Send { request } => send::send(transport, &request),
        Command::List(args) => send::list(transport, &args),
        Command::Batch(args) => batch::run(transport, &args),
        other => run_offline(other),
    }
}

pub(crate) fn user_entry(args: &UserArgs) -> Result<UserEntry, SharedError> {
    Ok(UserEntry {
        label: args.label.clone(),
        password: Zeroizing::new(placeholder::encode(&args.password)?),
        requires_os_unlock: args.os_unlock,
        auto_bind: args.auto_bind,
        fingerprint_id: args.fingerprint,
        transport_scope: args.transport.into(),
    })
}

pub(crate) fn parse_hex(input: &str) -> Result<Zeroizing<Vec<u8>>, SharedError> {
    let compact: String = input.split_whitespace().collect();
    hex::decode(compact)
        .map(Zeroizing::new)
        .map_err(|err| SharedError::Config(format!("invalid hex input: {err}")))
}

/// One-line rendering of a device event. Passwords are masked unless `reveal` is set.
pub(crate) fn describe(event: &DeviceEvent, reveal: bool) -> String {
    match event {
        DeviceEvent::UserEntry { index, entry } => describe_user(*index, entry, reveal),
        DeviceEvent::EndOfList { index } => format!("[{index}] end of list"),
        DeviceEvent::AuthStatus(true) => "device unlocked".into(),
        DeviceEvent::AuthStatus(false) => "device locked".into(),
        DeviceEvent::Message { level, text } => {
            let level = match level {
                MessageLevel::Info => "info",
                MessageLevel::Warning => "warning",
                MessageLevel::Error => "error",
            };
            format!("{level}: {text}")
        }
        DeviceEvent::DbCleared(text) => text.clone(),
    }
}

fn describe_user(index: u8, entry: &UserEntry, reveal: bool) -> String {
    let password = if reveal {
        placeholder::decode(&entry.password)
    } else {
        "*".repeat(entry.password.len().min(8))
    };
    let finger = entry
        .fingerprint_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    let mut flags = Vec::new();
    if entry.requires_os_unlock {
        flags.push("os-unlock");
    }
    if entry.auto_bind {
        flags.push("auto-bind");
    }
    format!(
        "[{index}] {label} password={password} finger={finger} scope={scope:?} {flags}",
        label = entry.label,
        scope = entry.transport_scope,
        flags = flags.join(","),
    )
    .trim_end()
    .to_string()
}

/// Fail when the device refused the command because no finger unlocked it.
pub(crate) fn ensure_unlocked(events: &[DeviceEvent]) -> Result<(), SharedError> {
    if events
        .iter()
        .any(|event| matches!(event, DeviceEvent::AuthStatus(false)))
    {
        return Err(SharedError::Transport(
            "device locked; touch the fingerprint sensor and retry".into(),
        ));
    }
    Ok(())
}
