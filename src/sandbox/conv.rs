// SPDX-License-Identifier: MIT

//! Wide string conversions for the Win32 calls.

use std::ffi::{OsStr, OsString};
use std::os::windows::ffi::{OsStrExt, OsStringExt};

/// Convert the OS string into a NUL terminated wide (16-bit) C string.
pub fn to_wide_os(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Copy a NUL terminated wide string owned by the OS.
///
/// # Safety
///
/// `ptr` must be null or point at a NUL terminated UTF-16 buffer.
pub unsafe fn from_wide_ptr(ptr: *const u16) -> OsString {
    if ptr.is_null() {
        return OsString::new();
    }
    let mut len = 0;
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
    }
    OsString::from_wide(unsafe { std::slice::from_raw_parts(ptr, len) })
}
