// SPDX-License-Identifier: MIT

//! Block handling for the argument payload.
//!
//! The target runs Blowfish over little-endian words, while the `blowfish`
//! crate works on big-endian words.  Swapping each 4-byte word before and after
//! the block operation bridges the two.

use blowfish::Blowfish;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::error::BrokerError;

/// Cipher block size, in bytes.
pub const BLOCK_SIZE: usize = 8;

const WORD_SIZE: usize = 4;

/// Zero pad the data to the next block boundary.
///
/// At least one zero byte is always added, so a block-aligned input gains a
/// whole block.  The result always ends with a NUL terminator.
pub fn pad(mut data: Vec<u8>) -> Vec<u8> {
    let padding = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    data.resize(data.len() + padding, 0);
    data
}

/// Reverse the byte order of every 4-byte word, in place.
pub fn swap_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(WORD_SIZE) {
        word.reverse();
    }
}

/// The cipher key is the 8 character lowercase hex rendering of the launch key.
pub fn key_bytes(key: u32) -> [u8; 8] {
    let mut ret = [0u8; 8];
    ret.copy_from_slice(format!("{key:08x}").as_bytes());
    ret
}

/// Encrypt block-aligned data in place: swap, Blowfish ECB, swap.
pub fn encrypt(key: u32, data: &mut [u8]) -> Result<(), BrokerError> {
    let cipher = new_cipher(key, data.len())?;
    swap_words(data);
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    swap_words(data);
    Ok(())
}

/// Decrypt block-aligned data in place; the inverse of `encrypt`.
pub fn decrypt(key: u32, data: &mut [u8]) -> Result<(), BrokerError> {
    let cipher = new_cipher(key, data.len())?;
    swap_words(data);
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    swap_words(data);
    Ok(())
}

fn new_cipher(key: u32, len: usize) -> Result<Blowfish, BrokerError> {
    if len % BLOCK_SIZE != 0 {
        return Err(BrokerError::Codec(format!(
            "payload length {len} is not a multiple of {BLOCK_SIZE}"
        )));
    }
    Blowfish::new_from_slice(&key_bytes(key))
        .map_err(|e| BrokerError::Codec(format!("invalid cipher key: {e}")))
}
