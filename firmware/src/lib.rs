#![cfg_attr(not(test), no_std)]
#![cfg_attr(all(not(test), target_arch = "xtensa"), no_main)]

//! Fingerprint-gated password keyboard.
//!
//! Passwords live AES-sealed in flash. A matched fingerprint unlocks the companion protocol for a
//! bounded window and types the selected (or auto-bound) password over USB or BLE HID.

extern crate alloc;

pub mod auth;
pub mod biometric;
pub mod config;
pub mod crypto;
pub mod device;
pub mod hid;
pub mod injection;
pub mod protocol;
pub mod sensor;
pub mod status;
pub mod storage;
pub mod transport;
pub mod vault;

#[cfg(target_arch = "xtensa")]
pub use hid::usb::runtime;

#[cfg(test)]
mod test_helpers;
