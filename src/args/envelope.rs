// SPDX-License-Identifier: MIT

//! The textual wrapper around the encrypted argument payload.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

use super::cipher;
use crate::error::BrokerError;

pub const ENVELOPE_PREFIX: &str = "//**sqex0003";
pub const ENVELOPE_SUFFIX: &str = "**//";

const CHECKSUM_TABLE: &[u8; 16] = b"fX1pGtdS5CAP4_VL";
const CHECKSUM_MASK: u32 = 0x000F_0000;
const CHECKSUM_SHIFT: u32 = 16;

/// The checksum character for a launch key.
///
/// Only bits 16..20 of the key select the character.
pub fn checksum_char(key: u32) -> char {
    let index = ((key & CHECKSUM_MASK) >> CHECKSUM_SHIFT) as usize;
    CHECKSUM_TABLE[index] as char
}

/// Encrypt the flattened argument string and wrap it in the envelope.
pub fn seal(plain: &str, key: u32) -> Result<String, BrokerError> {
    let mut payload = cipher::pad(plain.as_bytes().to_vec());
    cipher::encrypt(key, &mut payload)?;
    Ok(format!(
        "{}{}{}{}",
        ENVELOPE_PREFIX,
        URL_SAFE.encode(&payload),
        checksum_char(key),
        ENVELOPE_SUFFIX,
    ))
}

/// Unwrap and decrypt an envelope back into the flattened argument string.
pub fn open(envelope: &str, key: u32) -> Result<String, BrokerError> {
    let body = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .and_then(|s| s.strip_suffix(ENVELOPE_SUFFIX))
        .ok_or_else(|| BrokerError::Codec("missing envelope markers".to_string()))?;

    let mut chars = body.chars();
    let checksum = chars
        .next_back()
        .ok_or_else(|| BrokerError::Codec("empty envelope".to_string()))?;
    if checksum != checksum_char(key) {
        return Err(BrokerError::Codec(format!(
            "checksum '{checksum}' does not match the launch key"
        )));
    }

    let mut payload = URL_SAFE
        .decode(chars.as_str())
        .map_err(|e| BrokerError::Codec(format!("payload is not base64: {e}")))?;
    if payload.is_empty() {
        return Err(BrokerError::Codec("empty payload".to_string()));
    }
    cipher::decrypt(key, &mut payload)?;

    // The target reads the payload as a NUL terminated string.
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    payload.truncate(end);
    String::from_utf8(payload).map_err(|e| BrokerError::Codec(format!("payload is not UTF-8: {e}")))
}
