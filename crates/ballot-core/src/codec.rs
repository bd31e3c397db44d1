//! Typed contract arguments and the binary codec used by the contract ABI.
//!
//! Arguments are top-encoded (minimal big-endian for numbers, empty for zero
//! and `false`) and joined into call data as `function@hex@hex...`.
//! View results come back as base64 entries; each entry is top-encoded, and
//! struct fields inside an entry are nested-encoded (fixed-width numbers,
//! `u32` length prefix for buffers and lists).

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a raw account public key.
pub const ADDRESS_LEN: usize = 32;

// =============================================================================
// Address
// =============================================================================

/// Raw 32-byte account key, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|err| Error::InvalidArguments(format!("address {raw}: {err}")))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| Error::InvalidArguments(format!("address {raw}: expected 32 bytes")))
    }

    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; ADDRESS_LEN]>::try_from(bytes).ok().map(Self)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Typed values
// =============================================================================

/// Declared type of a contract argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    U64,
    U16,
    BigUint,
    BigInt,
    Bytes,
    Bool,
    Address,
}

impl ArgKind {
    /// Parse user-supplied text into a value of this kind.
    pub fn parse(self, raw: &str) -> Result<TypedValue> {
        let invalid = |what: &str| Error::InvalidArguments(format!("{raw:?} is not a valid {what}"));
        let raw_trimmed = raw.trim();
        Ok(match self {
            Self::U64 => TypedValue::U64(raw_trimmed.parse().map_err(|_| invalid("u64"))?),
            Self::U16 => TypedValue::U16(raw_trimmed.parse().map_err(|_| invalid("u16"))?),
            Self::BigUint => {
                TypedValue::BigUint(raw_trimmed.parse().map_err(|_| invalid("unsigned integer"))?)
            }
            Self::BigInt => {
                TypedValue::BigInt(raw_trimmed.parse().map_err(|_| invalid("integer"))?)
            }
            Self::Bytes => TypedValue::Bytes(raw.to_string()),
            Self::Bool => match raw_trimmed.to_lowercase().as_str() {
                "true" | "1" | "yes" => TypedValue::Bool(true),
                "false" | "0" | "no" => TypedValue::Bool(false),
                _ => return Err(invalid("boolean")),
            },
            Self::Address => TypedValue::Address(Address::from_hex(raw_trimmed)?),
        })
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::U64 => "u64",
            Self::U16 => "u16",
            Self::BigUint => "biguint",
            Self::BigInt => "bigint",
            Self::Bytes => "bytes",
            Self::Bool => "bool",
            Self::Address => "address",
        };
        f.write_str(label)
    }
}

/// One typed argument of a contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    U64(u64),
    U16(u16),
    BigUint(u128),
    BigInt(i128),
    Bytes(String),
    Bool(bool),
    Address(Address),
}

impl TypedValue {
    #[must_use]
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::U64(_) => ArgKind::U64,
            Self::U16(_) => ArgKind::U16,
            Self::BigUint(_) => ArgKind::BigUint,
            Self::BigInt(_) => ArgKind::BigInt,
            Self::Bytes(_) => ArgKind::Bytes,
            Self::Bool(_) => ArgKind::Bool,
            Self::Address(_) => ArgKind::Address,
        }
    }

    /// Top-encoded bytes of this value.
    #[must_use]
    pub fn top_encode(&self) -> Vec<u8> {
        match self {
            Self::U64(v) => trim_unsigned(&v.to_be_bytes()),
            Self::U16(v) => trim_unsigned(&v.to_be_bytes()),
            Self::BigUint(v) => trim_unsigned(&v.to_be_bytes()),
            Self::BigInt(v) => trim_signed(&v.to_be_bytes()),
            Self::Bytes(s) => s.as_bytes().to_vec(),
            Self::Bool(true) => vec![1],
            Self::Bool(false) => Vec::new(),
            Self::Address(addr) => addr.0.to_vec(),
        }
    }

    /// Hex form used in call data and query arguments.
    #[must_use]
    pub fn to_hex_arg(&self) -> String {
        hex::encode(self.top_encode())
    }
}

fn trim_unsigned(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

fn trim_signed(bytes: &[u8]) -> Vec<u8> {
    if bytes.iter().all(|b| *b == 0) {
        return Vec::new();
    }
    let mut start = 0;
    while start + 1 < bytes.len() {
        let (cur, next) = (bytes[start], bytes[start + 1]);
        let redundant = (cur == 0x00 && next & 0x80 == 0) || (cur == 0xff && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// A contract endpoint invocation: function name plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub function: String,
    pub args: Vec<TypedValue>,
}

impl ContractCall {
    #[must_use]
    pub fn new(function: impl Into<String>, args: Vec<TypedValue>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }

    /// `function@hex@hex...`
    #[must_use]
    pub fn data(&self) -> String {
        let mut out = self.function.clone();
        for arg in &self.args {
            out.push('@');
            out.push_str(&arg.to_hex_arg());
        }
        out
    }

    /// Arguments as hex strings, for view queries.
    #[must_use]
    pub fn hex_args(&self) -> Vec<String> {
        self.args.iter().map(TypedValue::to_hex_arg).collect()
    }

    pub fn validate(&self) -> Result<()> {
        let name = &self.function;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidArguments(format!(
                "function name {name:?} must be non-empty ASCII alphanumeric"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one base64 `returnData` entry.
pub fn decode_return_entry(entry: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(entry)
        .map_err(|err| Error::Decode(format!("return data is not base64: {err}")))
}

/// Top-decode an unsigned integer of at most `N` bytes.
fn top_decode_unsigned<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    if bytes.len() > N {
        return Err(Error::Decode(format!(
            "{what}: {} bytes exceed {N}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out[N - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

pub fn top_decode_u64(bytes: &[u8]) -> Result<u64> {
    top_decode_unsigned::<8>(bytes, "u64").map(u64::from_be_bytes)
}

pub fn top_decode_u16(bytes: &[u8]) -> Result<u16> {
    top_decode_unsigned::<2>(bytes, "u16").map(u16::from_be_bytes)
}

pub fn top_decode_biguint(bytes: &[u8]) -> Result<u128> {
    top_decode_unsigned::<16>(bytes, "biguint").map(u128::from_be_bytes)
}

/// Cursor over a nested-encoded payload.
#[derive(Debug)]
pub struct NestedReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> NestedReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::Decode(format!(
                    "{what}: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len().saturating_sub(self.pos)
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2, "u16")?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4, "u32")?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8, "u64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Decode(format!("bool: invalid byte {other:#04x}"))),
        }
    }

    /// Length-prefixed byte buffer.
    pub fn read_buffer(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len, "buffer")
    }

    /// Length-prefixed UTF-8 string (lossy on invalid bytes).
    pub fn read_string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_buffer()?).into_owned())
    }

    pub fn read_address(&mut self) -> Result<Address> {
        let bytes = self.take(ADDRESS_LEN, "address")?;
        Address::from_slice(bytes).ok_or_else(|| Error::Decode("address".to_string()))
    }

    /// Length-prefixed list.
    pub fn read_list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.read_u32()? as usize;
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(item(self)?);
        }
        Ok(out)
    }

    /// Fail if bytes remain; top-encoded structs must be consumed exactly.
    pub fn finish(self, what: &str) -> Result<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(Error::Decode(format!(
                "{what}: {} trailing bytes",
                self.buf.len() - self.pos
            )))
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}
