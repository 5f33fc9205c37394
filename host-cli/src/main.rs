use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use shared::error::SharedError;
use shared::protocol::TransportScope;

mod application;
mod commands;
mod constants;
mod transport;

#[cfg(test)]
mod tests_batch;
#[cfg(test)]
mod tests_codec;
#[cfg(test)]
mod tests_transport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fingerpass companion command line interface")]
pub struct Cli {
    /// Optional path to the serial device. Falls back to auto-detection when omitted.
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Skip Fingerpass VID/PID filtering and accept the first USB serial device.
    #[arg(long, global = true)]
    pub any_port: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert placeholder text into the stored password bytes (hex).
    Encode { text: String },
    /// Render stored password bytes (hex) back into placeholder text.
    Decode { hex: String },
    /// Show the keyboard actions a password produces.
    Preview(PreviewArgs),
    /// Print the wire bytes of a companion command.
    Frame {
        #[command(subcommand)]
        request: Request,
    },
    /// Decode a response frame (hex) received from a device.
    Inspect { hex: String },
    /// Send one command to the device and print its responses.
    Send {
        #[command(subcommand)]
        request: Request,
    },
    /// List every user stored on the device.
    List(ListArgs),
    /// Provision users from a JSON batch file.
    Batch(BatchArgs),
}

impl Command {
    pub fn needs_device(&self) -> bool {
        match self {
            Command::Send { .. } | Command::List(_) => true,
            Command::Batch(args) => !args.dry_run,
            _ => false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    /// Placeholder text such as `secret{ENTER}`, or hex bytes with `--stored`.
    pub text: String,
    /// Treat the input as stored password bytes in hex.
    #[arg(long)]
    pub stored: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Print decoded passwords instead of masking them.
    #[arg(long)]
    pub show_passwords: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// JSON file describing the users to provision.
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,
    /// Validate the file and print the frames without opening a port.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Request {
    /// Erase every user (opcode 0x00).
    ResetAll,
    /// Append a user.
    AddUser(UserArgs),
    /// Replace the user at `index`, keeping its usage count.
    EditUser {
        #[arg(long)]
        index: u8,
        #[command(flatten)]
        user: UserArgs,
    },
    /// Remove the user at `index`.
    RemoveUser {
        #[arg(long)]
        index: u8,
    },
    /// Fetch the user at `index`.
    GetUser {
        #[arg(long)]
        index: u8,
    },
    /// Erase every user (opcode 0x06).
    ClearDb,
    /// Start fingerprint enrollment on the device.
    Enroll,
    /// Wipe the sensor's fingerprint library after on-device confirmation.
    ClearFingerprints,
}

#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    #[arg(long)]
    pub label: String,
    /// Password in placeholder syntax, e.g. `hunter2{ENTER}`.
    #[arg(long)]
    pub password: String,
    /// Send CTRL+ALT+DEL before typing the password.
    #[arg(long)]
    pub os_unlock: bool,
    /// Type this user whenever its bound finger matches.
    #[arg(long, requires = "fingerprint")]
    pub auto_bind: bool,
    /// Sensor slot bound to this user.
    #[arg(long)]
    pub fingerprint: Option<u8>,
    #[arg(long, value_enum, default_value_t = ScopeArg::Either)]
    pub transport: ScopeArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeArg {
    Ble,
    Usb,
    Either,
}

impl From<ScopeArg> for TransportScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Ble => TransportScope::BluetoothOnly,
            ScopeArg::Usb => TransportScope::UsbOnly,
            ScopeArg::Either => TransportScope::Either,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = application::execute(cli, &application::SerialTransportProvider) {
        match &err {
            SharedError::Transport(_) => eprintln!("Transport failure: {err}"),
            SharedError::Config(_) => eprintln!("Invalid input: {err}"),
            _ => eprintln!("Encoding error: {err}"),
        }
        return Err(anyhow::Error::from(err));
    }

    Ok(())
}
