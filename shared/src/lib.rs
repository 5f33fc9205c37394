#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Wire-level types shared by the Fingerpass firmware and its companion tooling.

extern crate alloc;

#[cfg(feature = "std")]
pub mod error;
pub mod keymap;
pub mod keys;
pub mod link;
pub mod placeholder;
pub mod protocol;
