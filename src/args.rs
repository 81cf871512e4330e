// SPDX-License-Identifier: MIT

//! Launch argument handling.
//!
//! The target loader only accepts its arguments as a single encrypted token:
//!
//! ```text
//! //**sqex0003<base64url payload><checksum char>**//
//! ```
//!
//! The `ArgumentBuilder` collects the ordered key/value pairs, and turns them
//! into that token for a given launch key.  The same launch key must be used
//! by anyone wanting to read the arguments back.
//!
//! `launch_quote` builds the full Windows command line around the token.

pub mod builder;
pub mod cipher;
pub mod envelope;
pub mod launch_quote;

pub use builder::ArgumentBuilder;
pub use envelope::{checksum_char, ENVELOPE_PREFIX, ENVELOPE_SUFFIX};

/// Launch keys only keep the high word of the tick counter.
const LAUNCH_KEY_MASK: u32 = 0xFFFF_0000;

/// Derive a launch key from a millisecond tick counter value.
pub fn launch_key_from_ticks(ticks: u32) -> u32 {
    ticks & LAUNCH_KEY_MASK
}

/// Derive a launch key from the current system tick counter.
#[cfg(target_os = "windows")]
pub fn current_launch_key() -> u32 {
    let ticks = unsafe { windows_sys::Win32::System::SystemInformation::GetTickCount() };
    launch_key_from_ticks(ticks)
}

/// Derive a launch key from the current system tick counter.
#[cfg(not(target_os = "windows"))]
pub fn current_launch_key() -> u32 {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    // The tick counter wraps at 32 bits, so truncation matches its behavior.
    launch_key_from_ticks(millis as u32)
}
