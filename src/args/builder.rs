// SPDX-License-Identifier: MIT

//! Ordered key/value launch arguments.
//!
//! Each pair flattens to ` /key=value`, with every space inside the key or
//! the value doubled.  Order is kept exactly as inserted, because it changes
//! the payload length and so the padding the target verifies.

use super::envelope;
use crate::error::BrokerError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentBuilder {
    arguments: Vec<(String, String)>,
}

impl ArgumentBuilder {
    pub fn new() -> Self {
        ArgumentBuilder { arguments: vec![] }
    }

    /// Append a key/value pair, builder style.
    pub fn append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Append a key/value pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.arguments.push((key.into(), value.into()));
    }

    pub fn arguments(&self) -> &[(String, String)] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// The flattened, unencrypted argument string.
    pub fn build(&self) -> String {
        let mut ret = String::new();
        for (key, value) in &self.arguments {
            ret.push_str(" /");
            ret.push_str(&escape(key));
            ret.push('=');
            ret.push_str(&escape(value));
        }
        ret
    }

    /// The encrypted argument envelope for the launch key.
    pub fn build_encrypted(&self, key: u32) -> Result<String, BrokerError> {
        envelope::seal(&self.build(), key)
    }

    /// Parse a flattened argument string, as produced by `build`.
    pub fn parse(plain: &str) -> Result<Self, BrokerError> {
        let bytes = plain.as_bytes();
        let mut arguments = vec![];
        let mut pos = 0;
        while pos < bytes.len() {
            if !bytes[pos..].starts_with(b" /") {
                return Err(BrokerError::Codec(format!("expected ' /' at offset {pos}")));
            }
            let (key, next) = unescape(bytes, pos + 2, b'=')?;
            if bytes.get(next) != Some(&b'=') {
                return Err(BrokerError::Codec(format!("argument '{key}' has no value")));
            }
            let (value, next) = unescape(bytes, next + 1, b' ')?;
            arguments.push((key, value));
            pos = next;
        }
        Ok(ArgumentBuilder { arguments })
    }

    /// Decrypt an argument envelope made with the same launch key.
    pub fn decode(envelope: &str, key: u32) -> Result<Self, BrokerError> {
        Self::parse(&envelope::open(envelope, key)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArgumentBuilder {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        ArgumentBuilder {
            arguments: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn escape(value: &str) -> String {
    value.replace(' ', "  ")
}

/// Read from `pos` until an unpaired space or the `stop` byte.
/// Space, '=' and '/' are single byte in UTF-8, so byte scanning is safe.
fn unescape(bytes: &[u8], mut pos: usize, stop: u8) -> Result<(String, usize), BrokerError> {
    let mut out = vec![];
    while pos < bytes.len() {
        let b = bytes[pos];
        if b == b' ' {
            if bytes.get(pos + 1) == Some(&b' ') {
                out.push(b' ');
                pos += 2;
                continue;
            }
            break;
        }
        if b == stop {
            break;
        }
        out.push(b);
        pos += 1;
    }
    let s = String::from_utf8(out).map_err(|e| BrokerError::Codec(e.to_string()))?;
    Ok((s, pos))
}
