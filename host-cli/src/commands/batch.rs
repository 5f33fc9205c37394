use std::fs;
use std::path::Path;

use serde::Deserialize;
use shared::error::SharedError;
use shared::placeholder;
use shared::protocol::{Command, DeviceEvent, MessageLevel, TransportScope, UserEntry};
use zeroize::Zeroizing;

use super::{describe, ensure_unlocked};
use crate::BatchArgs;
use crate::transport::{DeviceTransport, exchange};

/// Users to provision in one session, read from JSON.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    /// Erase the device's user table before adding.
    #[serde(default)]
    pub clear_first: bool,
    pub users: Vec<BatchUser>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchUser {
    pub label: String,
    /// Placeholder text, e.g. `hunter2{ENTER}`.
    pub password: String,
    #[serde(default)]
    pub os_unlock: bool,
    #[serde(default)]
    pub auto_bind: bool,
    #[serde(default)]
    pub fingerprint: Option<u8>,
    #[serde(default)]
    pub transport: TransportScope,
}

impl BatchFile {
    pub fn load(path: &Path) -> Result<Self, SharedError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            SharedError::Config(format!("Failed to read {}: {err}", path.display()))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, SharedError> {
        serde_json::from_str(contents)
            .map_err(|err| SharedError::Config(format!("Invalid batch file: {err}")))
    }

    /// Commands in send order. Every entry is validated before anything is returned.
    pub fn commands(&self) -> Result<Vec<Command>, SharedError> {
        let mut commands = Vec::with_capacity(self.users.len() + 1);
        if self.clear_first {
            commands.push(Command::ClearDb);
        }
        for (position, user) in self.users.iter().enumerate() {
            let entry = user.to_entry().map_err(|err| {
                SharedError::Config(format!("user #{position} ({}): {err}", user.label))
            })?;
            let command = Command::AddUser(entry);
            command.encode().map_err(|err| {
                SharedError::Config(format!("user #{position} ({}): {err}", user.label))
            })?;
            commands.push(command);
        }
        Ok(commands)
    }
}

impl BatchUser {
    fn to_entry(&self) -> Result<UserEntry, SharedError> {
        if self.auto_bind && self.fingerprint.is_none() {
            return Err(SharedError::Config(
                "auto_bind needs a fingerprint slot".into(),
            ));
        }
        Ok(UserEntry {
            label: self.label.clone(),
            password: Zeroizing::new(placeholder::encode(&self.password)?),
            requires_os_unlock: self.os_unlock,
            auto_bind: self.auto_bind,
            fingerprint_id: self.fingerprint,
            transport_scope: self.transport,
        })
    }
}

pub fn dry_run(args: &BatchArgs) -> Result<(), SharedError> {
    let batch = BatchFile::load(&args.file)?;
    for command in batch.commands()? {
        let frame = command.encode()?;
        println!("{:?}: {}", command.opcode(), hex::encode(frame.as_slice()));
    }
    Ok(())
}

pub fn run<T>(transport: &mut T, args: &BatchArgs) -> Result<(), SharedError>
where
    T: DeviceTransport + ?Sized,
{
    let batch = BatchFile::load(&args.file)?;
    let report = apply(transport, &batch.commands()?)?;
    println!("{} succeeded, {} failed", report.succeeded, report.failed);
    if report.failed > 0 {
        return Err(SharedError::Transport(format!(
            "{} of {} batch commands failed",
            report.failed,
            report.succeeded + report.failed
        )));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Send every command, continuing past rejected entries. A locked device aborts the run.
pub fn apply<T>(transport: &mut T, commands: &[Command]) -> Result<BatchReport, SharedError>
where
    T: DeviceTransport + ?Sized,
{
    let mut report = BatchReport::default();
    for command in commands {
        let events = exchange(transport, command)?;
        for event in &events {
            println!("{}", describe(event, false));
        }
        ensure_unlocked(&events)?;

        let rejected = events.iter().any(|event| {
            matches!(
                event,
                DeviceEvent::Message {
                    level: MessageLevel::Error,
                    ..
                }
            )
        });
        if rejected {
            report.failed += 1;
        } else {
            report.succeeded += 1;
        }
    }
    Ok(report)
}
