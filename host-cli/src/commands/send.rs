use shared::error::SharedError;
use shared::protocol::{Command, DeviceEvent};

use super::{describe, ensure_unlocked, frame};
use crate::constants::MAX_LIST_INDEX;
use crate::transport::{DeviceTransport, exchange};
use crate::{ListArgs, Request};

pub fn send<T>(transport: &mut T, request: &Request) -> Result<(), SharedError>
where
    T: DeviceTransport + ?Sized,
{
    let command = frame::build(request)?;
    let events = exchange(transport, &command)?;
    for event in &events {
        println!("{}", describe(event, false));
    }
    ensure_unlocked(&events)
}

/// Walk the user table from index 0 until the device reports the end.
pub fn list<T>(transport: &mut T, args: &ListArgs) -> Result<(), SharedError>
where
    T: DeviceTransport + ?Sized,
{
    for event in collect_users(transport)? {
        println!("{}", describe(&event, args.show_passwords));
    }
    Ok(())
}

pub(crate) fn collect_users<T>(transport: &mut T) -> Result<Vec<DeviceEvent>, SharedError>
where
    T: DeviceTransport + ?Sized,
{
    let mut users = Vec::new();
    for index in 0..MAX_LIST_INDEX {
        let events = exchange(transport, &Command::GetUserEntry { index })?;
        ensure_unlocked(&events)?;
        for event in events {
            match event {
                DeviceEvent::UserEntry { .. } => users.push(event),
                DeviceEvent::EndOfList { .. } => return Ok(users),
                other => {
                    return Err(SharedError::Transport(format!(
                        "unexpected reply while listing: {}",
                        describe(&other, false)
                    )));
                }
            }
        }
    }
    Ok(users)
}
