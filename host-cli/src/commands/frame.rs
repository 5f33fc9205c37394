use shared::error::SharedError;
use shared::protocol::{Command, ResponseFrame};

use super::{describe, parse_hex, user_entry};
use crate::Request;

/// Build the companion command described by `request`.
pub fn build(request: &Request) -> Result<Command, SharedError> {
    let command = match request {
        Request::ResetAll => Command::ResetAll,
        Request::AddUser(user) => Command::AddUser(user_entry(user)?),
        Request::EditUser { index, user } => Command::EditUser {
            index: *index,
            entry: user_entry(user)?,
        },
        Request::RemoveUser { index } => Command::RemoveUser { index: *index },
        Request::GetUser { index } => Command::GetUserEntry { index: *index },
        Request::ClearDb => Command::ClearDb,
        Request::Enroll => Command::EnrollFingerprint,
        Request::ClearFingerprints => Command::ClearFingerprintLibrary,
    };
    Ok(command)
}

pub fn print(request: &Request) -> Result<(), SharedError> {
    let command = build(request)?;
    let bytes = command.encode()?;
    println!("{}", hex::encode(bytes.as_slice()));
    Ok(())
}

pub fn inspect(input: &str) -> Result<(), SharedError> {
    let bytes = parse_hex(input)?;
    let frame = ResponseFrame::decode(&bytes)?;
    println!("{}", describe(&frame.event()?, true));
    Ok(())
}
