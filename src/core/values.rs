//! Typed value marshalling
//!
//! Stateless conversions between typed scalar values and arrays of 16-bit
//! controller words. Decoding reads a tag's words out of a freshly polled
//! block; encoding produces the exact inverse layout for writes. All type
//! dispatch happens on [`TagType`] in exhaustive matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{McSrvError, Result};

/// Scalar type of a tag or function argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Int16,
    Int32,
    Real,
    String,
    Bool,
}

impl TagType {
    /// Word footprint of the type; strings take their declared length
    pub fn default_word_length(self) -> u16 {
        match self {
            TagType::Int16 | TagType::Bool => 1,
            TagType::Int32 | TagType::Real => 2,
            TagType::String => 1,
        }
    }

    /// Fallback value cached when a read or decode fails
    pub fn empty_value(self) -> PlcValue {
        match self {
            TagType::Int16 | TagType::Int32 => PlcValue::Int(0),
            TagType::Real => PlcValue::Real(0.0),
            TagType::String => PlcValue::Text(String::new()),
            TagType::Bool => PlcValue::Bool(false),
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagType::Int16 => "int16",
            TagType::Int32 => "int32",
            TagType::Real => "real",
            TagType::String => "string",
            TagType::Bool => "bool",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TagType {
    type Err = McSrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int16" => Ok(TagType::Int16),
            "int32" => Ok(TagType::Int32),
            "real" => Ok(TagType::Real),
            "string" => Ok(TagType::String),
            "bool" => Ok(TagType::Bool),
            other => Err(McSrvError::InvalidParameter(format!(
                "Unknown data type: {}",
                other
            ))),
        }
    }
}

/// Decoded controller value
///
/// Serialized untagged so persisted cache rows carry plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlcValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlcValue::Bool(v) => write!(f, "{}", v),
            PlcValue::Int(v) => write!(f, "{}", v),
            PlcValue::Real(v) => write!(f, "{}", v),
            PlcValue::Text(v) => write!(f, "{}", v),
        }
    }
}

fn check_range(offset: usize, needed: usize, available: usize, ty: TagType) -> Result<()> {
    if offset + needed > available {
        return Err(McSrvError::InvalidData(format!(
            "Offset {} out of range for {} ({} words available)",
            offset, ty, available
        )));
    }
    Ok(())
}

/// Decode a typed value from `words` at `offset`.
///
/// `word_length` is only honored for strings; the numeric and bool types use
/// their fixed footprint. `bit` selects the tested bit for bools (0 = LSB).
pub fn decode_value(
    ty: TagType,
    words: &[u16],
    offset: usize,
    word_length: u16,
    bit: Option<u8>,
) -> Result<PlcValue> {
    match ty {
        TagType::Int16 => {
            check_range(offset, 1, words.len(), ty)?;
            Ok(PlcValue::Int(words[offset] as i16 as i64))
        }
        TagType::Int32 => {
            check_range(offset, 2, words.len(), ty)?;
            let low = words[offset] as u32;
            let high = words[offset + 1] as u32;
            Ok(PlcValue::Int(((high << 16) | low) as i32 as i64))
        }
        TagType::Real => {
            check_range(offset, 2, words.len(), ty)?;
            let low = words[offset].to_le_bytes();
            let high = words[offset + 1].to_le_bytes();
            let value = f32::from_le_bytes([low[0], low[1], high[0], high[1]]);
            Ok(PlcValue::Real(value as f64))
        }
        TagType::String => {
            let len = word_length.max(1) as usize;
            check_range(offset, len, words.len(), ty)?;
            let mut bytes = Vec::with_capacity(len * 2);
            for w in &words[offset..offset + len] {
                let lo = (w & 0xFF) as u8;
                let hi = (w >> 8) as u8;
                if lo != 0 {
                    bytes.push(lo);
                }
                if hi != 0 {
                    bytes.push(hi);
                }
            }
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            Ok(PlcValue::Text(text))
        }
        TagType::Bool => {
            check_range(offset, 1, words.len(), ty)?;
            let bit = bit.ok_or_else(|| {
                McSrvError::InvalidParameter("Bit position required for bool type".to_string())
            })?;
            if bit > 15 {
                return Err(McSrvError::InvalidParameter(
                    "Bit position must be between 0 and 15".to_string(),
                ));
            }
            Ok(PlcValue::Bool((words[offset] >> bit) & 1 == 1))
        }
    }
}

/// Encode a typed value into its word layout, the exact inverse of
/// [`decode_value`].
///
/// Always produces the declared word length (strings are truncated or
/// zero-padded to fit); value/type mismatches are rejected before any wire
/// access.
pub fn encode_value(
    ty: TagType,
    value: &PlcValue,
    word_length: u16,
    bit: Option<u8>,
) -> Result<Vec<u16>> {
    match (ty, value) {
        (TagType::Int16, PlcValue::Int(v)) => Ok(vec![(*v & 0xFFFF) as u16]),
        (TagType::Int32, PlcValue::Int(v)) => {
            let raw = *v as u32;
            Ok(vec![(raw & 0xFFFF) as u16, (raw >> 16) as u16])
        }
        (TagType::Real, PlcValue::Real(v)) => Ok(encode_real(*v as f32)),
        (TagType::Real, PlcValue::Int(v)) => Ok(encode_real(*v as f32)),
        (TagType::String, PlcValue::Text(text)) => {
            let len = word_length.max(1) as usize;
            let bytes = text.as_bytes();
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let lo = bytes.get(i * 2).copied().unwrap_or(0) as u16;
                let hi = bytes.get(i * 2 + 1).copied().unwrap_or(0) as u16;
                out.push((hi << 8) | lo);
            }
            Ok(out)
        }
        (TagType::Bool, PlcValue::Bool(v)) => {
            let bit = bit.unwrap_or(0);
            if bit > 15 {
                return Err(McSrvError::InvalidParameter(
                    "Bit position must be between 0 and 15".to_string(),
                ));
            }
            Ok(vec![if *v { 1 << bit } else { 0 }])
        }
        (ty, value) => Err(McSrvError::InvalidParameter(format!(
            "Value {:?} does not match type {}",
            value, ty
        ))),
    }
}

fn encode_real(value: f32) -> Vec<u16> {
    let bytes = value.to_le_bytes();
    vec![
        u16::from_le_bytes([bytes[0], bytes[1]]),
        u16::from_le_bytes([bytes[2], bytes[3]]),
    ]
}
