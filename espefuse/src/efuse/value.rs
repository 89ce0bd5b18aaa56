use std::fmt;

use super::{field::get_bit, EfuseField};
use crate::Error;

/// A value encoded for a specific eFuse field.
///
/// The bytes are little endian and exactly [EfuseField::byte_len] long; no
/// bit above the field's width is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedValue {
    bytes: Vec<u8>,
    bit_width: u32,
}

impl EncodedValue {
    /// Encode little endian `bytes` for `field`.
    ///
    /// Shorter inputs are zero-extended, any set bit beyond the field's width
    /// is an error.
    pub fn from_le_bytes(field: &EfuseField, bytes: &[u8]) -> Result<Self, Error> {
        let width = field.bit_width as usize;
        if let Some(bit) = (width..bytes.len() * 8).find(|&bit| get_bit(bytes, bit)) {
            return Err(Error::InvalidValue {
                field: field.name.clone(),
                value: hex_be(bytes),
                reason: format!(
                    "bit {bit} is set, but the field is only {width} bit{} wide",
                    if width == 1 { "" } else { "s" }
                ),
            });
        }

        let mut encoded = vec![0u8; field.byte_len()];
        let len = encoded.len().min(bytes.len());
        encoded[..len].copy_from_slice(&bytes[..len]);

        Ok(Self {
            bytes: encoded,
            bit_width: field.bit_width,
        })
    }

    /// Encode an integer for `field`.
    pub fn from_u64(field: &EfuseField, value: u64) -> Result<Self, Error> {
        Self::from_le_bytes(field, &value.to_le_bytes())
    }

    /// Parse a value given on the command line for `field`.
    ///
    /// Fields of up to 64 bits accept decimal, `0x`-prefixed hexadecimal or
    /// `0b`-prefixed binary integers; single-bit fields additionally accept
    /// `true`/`false`, and default to `1` when no value is given. Wider fields
    /// take a hexadecimal byte string, most significant byte first.
    pub fn parse(field: &EfuseField, input: Option<&str>) -> Result<Self, Error> {
        let invalid = |value: &str, reason: &str| Error::InvalidValue {
            field: field.name.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let Some(input) = input.map(str::trim) else {
            return if field.bit_width == 1 {
                Self::from_u64(field, 1)
            } else {
                Err(Error::MissingValue(field.name.clone()))
            };
        };

        if field.bit_width == 1 {
            match input.to_ascii_lowercase().as_str() {
                "true" => return Self::from_u64(field, 1),
                "false" => return Self::from_u64(field, 0),
                _ => {}
            }
        }

        if field.bit_width > 64 {
            let digits: String = input
                .trim_start_matches("0x")
                .chars()
                .filter(|c| !matches!(c, ' ' | ':' | '_'))
                .collect();
            if !digits.is_ascii() {
                return Err(invalid(input, "not a hexadecimal byte string"));
            }
            if digits.len() != field.byte_len() * 2 {
                return Err(invalid(
                    input,
                    &format!("expected {} hexadecimal bytes", field.byte_len()),
                ));
            }

            let mut bytes = (0..digits.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid(input, "not a hexadecimal byte string"))?;
            bytes.reverse();

            return Self::from_le_bytes(field, &bytes);
        }

        let parsed = if let Some(hex) = input.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
        } else if let Some(bin) = input.strip_prefix("0b") {
            u64::from_str_radix(bin, 2)
        } else {
            input.parse::<u64>()
        };

        let value = parsed.map_err(|_| invalid(input, "not an unsigned integer"))?;
        Self::from_u64(field, value)
    }

    /// The encoded bytes, little endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// The value as an integer, for fields of up to 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.bit_width > 64 {
            return None;
        }

        let mut bytes = [0u8; 8];
        bytes[..self.bytes.len()].copy_from_slice(&self.bytes);
        Some(u64::from_le_bytes(bytes))
    }

    /// Build a value straight from block storage, bypassing validation.
    pub(crate) fn from_field_bytes(field: &EfuseField, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            bit_width: field.bit_width,
        }
    }
}

impl fmt::Display for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u64() {
            Some(1) | Some(0) if self.bit_width == 1 => write!(f, "{}", self.bytes[0] != 0),
            Some(value) => write!(f, "{value:#x}"),
            None => write!(f, "0x{}", hex_be(&self.bytes)),
        }
    }
}

fn hex_be(bytes: &[u8]) -> String {
    bytes.iter().rev().map(|b| format!("{b:02x}")).collect()
}
