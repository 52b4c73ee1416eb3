//! Ledger account addresses and the alias table applied before merging.
//!
//! An address is a 32-byte public key. Its text form is the ledger's
//! 58-character base32 encoding of `key || checksum`, the checksum being the
//! last four bytes of SHA-512/256 over the key. Registry boxes are keyed by
//! the raw 32 bytes.

use crate::error::AddressError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512_256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const ADDRESS_KEY_LEN: usize = 32;
const CHECKSUM_LEN: usize = 4;
const ADDRESS_TEXT_LEN: usize = 58;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_KEY_LEN]);

impl Address {
    pub const fn new(key: [u8; ADDRESS_KEY_LEN]) -> Self {
        Self(key)
    }

    /// Build an address from a box key, which must be exactly 32 bytes.
    pub fn from_key(key: &[u8]) -> Result<Self, AddressError> {
        let bytes: [u8; ADDRESS_KEY_LEN] = key
            .try_into()
            .map_err(|_| AddressError::KeyLength(key.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_KEY_LEN] {
        &self.0
    }

    /// `ABCDE..VWXYZ` form used in log lines.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}..{}", &full[..5], &full[full.len() - 5..])
    }

    fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let digest = Sha512_256::digest(self.0);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut raw = Vec::with_capacity(ADDRESS_KEY_LEN + CHECKSUM_LEN);
        raw.extend_from_slice(&self.0);
        raw.extend_from_slice(&self.checksum());
        f.write_str(&base32_encode(&raw))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ADDRESS_TEXT_LEN {
            return Err(AddressError::Length(s.len()));
        }
        let raw = base32_decode(s)?;
        let address = Address::from_key(&raw[..ADDRESS_KEY_LEN])?;
        if raw[ADDRESS_KEY_LEN..] != address.checksum() {
            return Err(AddressError::Checksum);
        }
        Ok(address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// --- base32 (RFC 4648, unpadded) ------------------------------------------

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(text: &str) -> Result<Vec<u8>, AddressError> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in text.chars() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a as char == c)
            .ok_or(AddressError::Alphabet(c))? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    // trailing bits of the last symbol must be zero padding
    if buffer & ((1 << bits) - 1) != 0 {
        return Err(AddressError::Padding);
    }
    Ok(out)
}

// --- aliases ---------------------------------------------------------------

/// Maps secondary addresses onto the canonical address they are merged into.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn canonical<'a>(&'a self, address: &'a str) -> &'a str {
        self.aliases
            .get(address)
            .map(String::as_str)
            .unwrap_or(address)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
