use shared::error::SharedError;
use shared::keys::{self, KeyAction};
use shared::placeholder::{self, PlaceholderError};

use super::parse_hex;
use crate::PreviewArgs;

pub fn encode(text: &str) -> Result<(), SharedError> {
    let bytes = placeholder::encode(text).inspect_err(|err| {
        if matches!(err, PlaceholderError::Unstorable(_)) {
            eprintln!("Storable placeholders: {}", placeholder::storable_tokens());
        }
    })?;
    let bytes = zeroize::Zeroizing::new(bytes);
    println!("{}", hex::encode(bytes.as_slice()));
    Ok(())
}

pub fn decode(input: &str) -> Result<(), SharedError> {
    let bytes = parse_hex(input)?;
    println!("{}", placeholder::decode(&bytes));
    Ok(())
}

pub fn preview(args: &PreviewArgs) -> Result<(), SharedError> {
    let actions = preview_actions(args)?;
    for line in render_actions(&actions) {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn preview_actions(args: &PreviewArgs) -> Result<Vec<KeyAction>, SharedError> {
    if args.stored {
        let bytes = parse_hex(&args.text)?;
        Ok(keys::actions_from_stored(&bytes)?)
    } else {
        Ok(keys::parse(&args.text)?)
    }
}

pub(crate) fn render_actions(actions: &[KeyAction]) -> Vec<String> {
    actions
        .iter()
        .map(|action| {
            if action.is_delay() {
                format!("wait {} ms", action.delay_ms)
            } else if action.is_raw {
                format!("raw 0x{:02X}", action.keycode)
            } else {
                format!(
                    "key 0x{:02X} modifiers 0x{:02X}",
                    action.keycode, action.modifiers
                )
            }
        })
        .collect()
}
