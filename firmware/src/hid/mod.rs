//! Keyboard output over BLE and USB, plus the Xtensa runtime that drives both links.
pub mod ble;
pub mod core;
#[cfg(target_arch = "xtensa")]
pub mod usb;

pub use self::core::actions;
